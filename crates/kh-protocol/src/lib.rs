//! kh-protocol: Wire protocol for the keyhold SSH agent
//!
//! This crate defines the binary protocol spoken between SSH clients and the
//! agent over a local socket: message and status codes, the table of
//! supported extensions, readers and writers for SSH wire fields, and the
//! length-prefixed frame codec.

pub mod codec;
pub mod error;
pub mod extension;
pub mod frame;
pub mod message;
pub mod wire;

pub use codec::{AgentCodec, Frame};
pub use error::{DecodeError, ProtocolError};
pub use extension::Extension;
pub use frame::{encode_frame, is_acceptable_length, AGENT_MAX_MSGLEN, LENGTH_PREFIX_SIZE};
pub use message::{ListExtendedFlags, MessageType, SignFlags};
pub use wire::{WireReader, WireWrite};
