//! kh-cli: Command-line client for keyhold
//!
//! Provides the `keyhold` CLI for listing, adding, removing and
//! re-encrypting the keys held by a running agent.

pub mod commands;
pub mod ipc;
pub mod output;
pub mod terminal;
