//! Core domain types

use std::fmt;

/// Agent protocol generation a key belongs to
///
/// Ordering matters: the key store sorts every SSH-1 key before every
/// SSH-2 key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyVersion {
    /// SSH-1 RSA keys
    Ssh1 = 1,
    /// SSH-2 keys of any algorithm
    Ssh2 = 2,
}

impl KeyVersion {
    /// Numeric protocol version
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyVersion::Ssh1 => write!(f, "SSH-1"),
            KeyVersion::Ssh2 => write!(f, "SSH-2"),
        }
    }
}

/// Identifier of one connected client (one socket connection, or one
/// in-process query)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Create a new client ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c#{}", self.0)
    }
}

/// Identifier of one request within a client, in arrival order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r#{}", self.0)
    }
}

/// Identifier of one passphrase prompt
///
/// Prompt outcomes carry the dialog they answer, so an outcome for a
/// dialog that is no longer open can be recognised and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DialogId(pub u64);

impl DialogId {
    /// Create a new dialog ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dialog#{}", self.0)
    }
}
