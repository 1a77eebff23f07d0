//! Reply construction and request logging

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::info;

use kh_core::{ClientId, RequestId};
use kh_protocol::{DecodeError, MessageType};

use crate::keys::KeyError;

/// Outcome of handling one request: a reply body, or a failure status
pub type HandlerResult = Result<Bytes, Failure>;

/// A request that could not be carried out
///
/// Only `status` goes on the wire; `reason` is for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub status: MessageType,
    pub reason: String,
}

impl Failure {
    /// `SSH_AGENT_FAILURE`
    pub fn generic(reason: impl Into<String>) -> Self {
        Self {
            status: MessageType::Failure,
            reason: reason.into(),
        }
    }

    /// `SSH_AGENT_EXTENSION_FAILURE`
    pub fn extension(reason: impl Into<String>) -> Self {
        Self {
            status: MessageType::ExtensionFailure,
            reason: reason.into(),
        }
    }

    /// Same reason, reported as an extension failure
    pub fn into_extension(self) -> Self {
        Self::extension(self.reason)
    }

    pub fn payload(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.status.as_u8()])
    }
}

impl From<DecodeError> for Failure {
    fn from(_: DecodeError) -> Self {
        Failure::generic("unable to decode request")
    }
}

impl From<KeyError> for Failure {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Decode(_) => Failure::generic("unable to decode request"),
            KeyError::AlgorithmUnknown => Failure::generic("algorithm unknown"),
            KeyError::SetupFailed(_) => Failure::generic("key setup failed"),
            KeyError::Invalid => Failure::generic("key is invalid"),
            other => Failure::generic(other.to_string()),
        }
    }
}

/// Reply body consisting of a type code alone
pub fn status(msg_type: MessageType) -> Bytes {
    Bytes::copy_from_slice(&[msg_type.as_u8()])
}

/// `SSH_AGENT_SUCCESS`
pub fn success() -> Bytes {
    status(MessageType::Success)
}

/// Start a reply body with its type code
pub fn begin(msg_type: MessageType) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(msg_type.as_u8());
    buf
}

/// Log context for one request
///
/// Every line carries the client and request identifiers. Requests from
/// in-process clients are quiet and log nothing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestLog {
    client: ClientId,
    request: RequestId,
    quiet: bool,
}

impl RequestLog {
    pub(crate) fn new(client: ClientId, request: RequestId, quiet: bool) -> Self {
        Self {
            client,
            request,
            quiet,
        }
    }

    pub(crate) fn line(&self, message: impl fmt::Display) {
        if !self.quiet {
            info!(conn = %self.client, req = %self.request, "{}", message);
        }
    }

    pub(crate) fn request(&self, msg_type: MessageType) {
        self.line(format_args!("request: {}", msg_type));
    }

    pub(crate) fn reply(&self, result: &HandlerResult) {
        match result {
            Ok(payload) => {
                let name = payload
                    .first()
                    .and_then(|&code| MessageType::from_u8(code))
                    .map_or("unknown reply", |t| t.name());
                self.line(format_args!("reply: {}", name));
            }
            Err(failure) => {
                self.line(format_args!("reply: {} ({})", failure.status, failure.reason));
            }
        }
    }
}
