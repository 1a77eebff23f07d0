//! SSH wire field encoding/decoding
//!
//! Field formats used by the agent protocol:
//! - byte: 1 byte
//! - uint32: 4 bytes, big-endian
//! - string: uint32 length followed by that many bytes
//! - SSH-1 mpint: uint16 bit count followed by `ceil(bits / 8)` big-endian bytes

use bytes::{Buf, BufMut, Bytes};

use crate::error::DecodeError;

/// Cursor over the body of one agent message.
///
/// Every getter either consumes exactly the bytes of one field or fails
/// without consuming anything.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
}

impl WireReader {
    /// Create a reader over a message body
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self { buf: buf.into() }
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// True if every byte has been read
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Unread bytes, without consuming them
    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Skip `n` bytes that were consumed by an external decoder
    pub fn advance(&mut self, n: usize, field: &'static str) -> Result<(), DecodeError> {
        self.ensure(n, field)?;
        self.buf.advance(n);
        Ok(())
    }

    fn ensure(&self, needed: usize, field: &'static str) -> Result<(), DecodeError> {
        if self.buf.len() < needed {
            return Err(DecodeError::Truncated {
                field,
                needed,
                available: self.buf.len(),
            });
        }
        Ok(())
    }

    /// Read a single byte
    pub fn get_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        self.ensure(1, field)?;
        Ok(self.buf.get_u8())
    }

    /// Read a big-endian uint32
    pub fn get_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        self.ensure(4, field)?;
        Ok(self.buf.get_u32())
    }

    /// Read a fixed number of raw bytes
    pub fn get_bytes(&mut self, len: usize, field: &'static str) -> Result<Bytes, DecodeError> {
        self.ensure(len, field)?;
        Ok(self.buf.split_to(len))
    }

    /// Read a length-prefixed string
    pub fn get_string(&mut self, field: &'static str) -> Result<Bytes, DecodeError> {
        self.ensure(4, field)?;
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        self.ensure(4 + len, field)?;
        self.buf.advance(4);
        Ok(self.buf.split_to(len))
    }

    /// Read a length-prefixed string that must be UTF-8
    pub fn get_utf8(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let mut probe = self.clone();
        let raw = probe.get_string(field)?;
        let text = String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { field })?;
        *self = probe;
        Ok(text)
    }

    /// Read a length-prefixed string, replacing invalid UTF-8
    ///
    /// Key comments are free text chosen by whoever added the key; they are
    /// kept displayable rather than rejected.
    pub fn get_text_lossy(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let raw = self.get_string(field)?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Read an SSH-1 style multi-precision integer, returning its magnitude
    pub fn get_mpint1(&mut self, field: &'static str) -> Result<Bytes, DecodeError> {
        self.ensure(2, field)?;
        let bits = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        let len = bits.div_ceil(8);
        self.ensure(2 + len, field)?;
        self.buf.advance(2);
        Ok(self.buf.split_to(len))
    }
}

/// Writers for SSH wire fields
pub trait WireWrite: BufMut {
    /// Write a length-prefixed string
    fn put_string(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.put_slice(data);
    }

    /// Write an SSH-1 multi-precision integer from big-endian magnitude bytes
    fn put_mpint1(&mut self, magnitude: &[u8]) {
        let start = magnitude
            .iter()
            .position(|&b| b != 0)
            .unwrap_or(magnitude.len());
        let digits = &magnitude[start..];
        let bits = match digits.first() {
            Some(&top) => (digits.len() - 1) * 8 + (8 - top.leading_zeros() as usize),
            None => 0,
        };
        self.put_u16(bits as u16);
        self.put_slice(digits);
    }
}

impl<B: BufMut + ?Sized> WireWrite for B {}
