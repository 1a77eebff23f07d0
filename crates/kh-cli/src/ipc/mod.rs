//! Client side of the agent protocol
//!
//! Talks to the agent over the Unix socket named by `SSH_AUTH_SOCK` (or
//! `--socket`), one framed request at a time.

mod client;
mod identity;

pub use client::{resolve_socket, AgentClient, ExtensionError};
pub use identity::{Identity, KeyState};
