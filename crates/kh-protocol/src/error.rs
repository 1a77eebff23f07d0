//! Protocol error types

use thiserror::Error;

/// Errors that can occur on the framed transport
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Outgoing message exceeds maximum size
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while decoding the fields of a single agent message.
///
/// These never travel on the wire: the agent answers every decode error with
/// a generic failure status and only logs the reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Message ended before the field could be read
    #[error("truncated {field}: needed {needed} bytes, {available} available")]
    Truncated {
        field: &'static str,
        needed: usize,
        available: usize,
    },

    /// A string field that must be UTF-8 was not
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
}
