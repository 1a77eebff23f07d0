//! Tokio codec for length-prefixed agent messages

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{encode_frame, is_acceptable_length, LENGTH_PREFIX_SIZE};

/// One unit read from the byte stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete message body (type byte first)
    Message(Bytes),
    /// A message whose declared length is too large to handle.
    ///
    /// Emitted as soon as the length prefix is read. The decoder then
    /// consumes and drops `len` bytes of body before reading the next frame.
    Oversized { len: usize },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Waiting for a length prefix
    #[default]
    Header,
    /// Length read, waiting for the whole body
    Body(usize),
    /// Dropping the rest of an oversized body
    Discard(usize),
}

/// Codec for the agent's framed byte stream
#[derive(Debug, Default)]
pub struct AgentCodec {
    state: DecodeState,
}

impl AgentCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for AgentCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < LENGTH_PREFIX_SIZE {
                        return Ok(None);
                    }
                    let len = src.get_u32() as usize;
                    if is_acceptable_length(len) {
                        self.state = DecodeState::Body(len);
                    } else {
                        self.state = DecodeState::Discard(len);
                        return Ok(Some(Frame::Oversized { len }));
                    }
                }
                DecodeState::Body(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    self.state = DecodeState::Header;
                    return Ok(Some(Frame::Message(src.split_to(len).freeze())));
                }
                DecodeState::Discard(0) => {
                    self.state = DecodeState::Header;
                }
                DecodeState::Discard(left) => {
                    let n = left.min(src.len());
                    if n == 0 {
                        return Ok(None);
                    }
                    src.advance(n);
                    self.state = DecodeState::Discard(left - n);
                }
            }
        }
    }
}

impl Encoder<Bytes> for AgentCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(&body, dst)
    }
}
