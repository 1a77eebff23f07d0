//! kh-agent: SSH authentication agent
//!
//! The agent holds private keys in memory and answers agent-protocol
//! requests from SSH clients over a local socket. Keys may be held in
//! encrypted form only, in which case the agent prompts for the passphrase
//! the first time the key is used.

pub mod agent;
pub mod clients;
pub mod event;
pub mod keys;
pub mod keystore;
pub mod ops;
pub mod prompt;
pub mod server;
pub mod service;
pub mod startup;

pub use agent::{Agent, Failure, HandlerResult};
pub use event::AgentEvent;
pub use prompt::{AskpassPrompter, NoPrompter, PassphrasePrompter};
pub use server::AgentListener;
pub use service::run_agent;
