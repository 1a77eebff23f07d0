//! Core error types for keyhold

use kh_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type shared by the agent and the client
#[derive(Error, Debug)]
pub enum KhError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Another agent already owns the socket
    #[error("An agent is already listening on {0}")]
    AgentAlreadyRunning(PathBuf),

    /// No agent socket could be found
    #[error("No agent socket: set SSH_AUTH_SOCK or pass --socket")]
    NoAgentSocket,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
