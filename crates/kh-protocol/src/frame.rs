//! Message framing
//!
//! Every agent message travels as:
//! - length: 4 bytes (u32, big-endian)
//! - body: `length` bytes, the first of which is the message type
//!
//! Bodies are bounded by [`AGENT_MAX_MSGLEN`]. Longer messages are not
//! rejected at the transport level; the decoder reports them once their
//! length is known and then skips their body.

use bytes::{BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest message, including its length prefix, that the agent will handle
pub const AGENT_MAX_MSGLEN: usize = 262_144;

/// Whether a declared body length is small enough to be buffered and handled
pub fn is_acceptable_length(len: usize) -> bool {
    len < AGENT_MAX_MSGLEN - LENGTH_PREFIX_SIZE
}

/// Write one length-prefixed frame into `dst`
pub fn encode_frame(body: &[u8], dst: &mut BytesMut) -> Result<(), ProtocolError> {
    let size = body.len();
    if size > u32::MAX as usize {
        return Err(ProtocolError::MessageTooLarge {
            size,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(LENGTH_PREFIX_SIZE + size);
    dst.put_u32(size as u32);
    dst.extend_from_slice(body);
    Ok(())
}
