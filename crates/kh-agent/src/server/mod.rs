//! Unix socket server

mod connection;
mod listener;

pub use connection::{serve_connection, ResponseQueue};
pub use listener::{check_existing_agent, AgentListener};
