//! Bridgelink Binary Codec
//!
//! Append-only encoder and forward-only decoder for the v1 wire format.
//! Every packet is a big-endian `i32` header followed by a header-specific
//! body. Bodies are not self-describing: each handler knows which fields to
//! read, in which order.
//!
//! Primitive layout:
//! - `short` / `int` / `long`: big-endian 16/32/64-bit two's complement
//! - `bool`: one byte, `0` or `1`
//! - `string`: `int` byte length + UTF-8 bytes, no terminator
//! - `payload`: `int` byte length + raw bytes
//! - nullable string / payload: length [`NULL_LENGTH`] marks absence
//! - array header: `int` element count, elements follow back to back

use bytes::{Buf, BufMut, BytesMut};

use super::constants::Header;
use crate::error::{DecodeError, EncodeError};

// ============================================================================
// CODEC CONSTANTS
// ============================================================================

/// Length prefix that marks an absent nullable string or payload
pub const NULL_LENGTH: i32 = -1;
/// Initial allocation for a fresh encoder; the buffer grows on demand
pub const INITIAL_CAPACITY: usize = 256;

const SHORT_SIZE: usize = 2;
const INT_SIZE: usize = 4;
const LONG_SIZE: usize = 8;
const BOOL_SIZE: usize = 1;

/// Upper bound on slots reserved up front for a decoded array
pub const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

// ============================================================================
// ENCODER
// ============================================================================

/// Builds one packet. Acquire it, write the fields in order, then call
/// [`Encoder::finish`] to take the bytes. The encoder is consumed by `finish`,
/// so a half-written buffer can never leak out.
#[derive(Debug)]
pub struct Encoder {
    buffer: BytesMut,
    limit: usize,
}

impl Encoder {
    /// Create an empty encoder that refuses to grow past `limit` bytes
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY.min(limit)),
            limit,
        }
    }

    /// Create an encoder with the packet header already written
    pub fn with_header(header: Header, limit: usize) -> Result<Self, EncodeError> {
        let mut encoder = Self::new(limit);
        encoder.write_int(header.code())?;
        Ok(encoder)
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Maximum number of bytes this encoder will hold
    pub fn limit(&self) -> usize {
        self.limit
    }

    fn reserve(&mut self, additional: usize) -> Result<(), EncodeError> {
        let requested = self.buffer.len() + additional;
        if requested > self.limit {
            return Err(EncodeError::CapacityExceeded {
                requested,
                limit: self.limit,
            });
        }
        self.buffer.reserve(additional);
        Ok(())
    }

    fn length_prefix(len: usize) -> Result<i32, EncodeError> {
        i32::try_from(len).map_err(|_| EncodeError::LengthOverflow(len))
    }

    pub fn write_short(&mut self, value: i16) -> Result<(), EncodeError> {
        self.reserve(SHORT_SIZE)?;
        self.buffer.put_i16(value);
        Ok(())
    }

    pub fn write_int(&mut self, value: i32) -> Result<(), EncodeError> {
        self.reserve(INT_SIZE)?;
        self.buffer.put_i32(value);
        Ok(())
    }

    pub fn write_long(&mut self, value: i64) -> Result<(), EncodeError> {
        self.reserve(LONG_SIZE)?;
        self.buffer.put_i64(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), EncodeError> {
        self.reserve(BOOL_SIZE)?;
        self.buffer.put_u8(u8::from(value));
        Ok(())
    }

    /// Write a length-prefixed byte payload
    pub fn write_payload(&mut self, value: &[u8]) -> Result<(), EncodeError> {
        let prefix = Self::length_prefix(value.len())?;
        self.reserve(INT_SIZE + value.len())?;
        self.buffer.put_i32(prefix);
        self.buffer.put_slice(value);
        Ok(())
    }

    /// Write a payload that may be absent
    pub fn write_nullable_payload(&mut self, value: Option<&[u8]>) -> Result<(), EncodeError> {
        match value {
            Some(bytes) => self.write_payload(bytes),
            None => self.write_int(NULL_LENGTH),
        }
    }

    /// Write a length-prefixed UTF-8 string
    pub fn write_string(&mut self, value: &str) -> Result<(), EncodeError> {
        self.write_payload(value.as_bytes())
    }

    /// Write a string that may be absent; an empty string stays distinct from `None`
    pub fn write_nullable_string(&mut self, value: Option<&str>) -> Result<(), EncodeError> {
        self.write_nullable_payload(value.map(str::as_bytes))
    }

    /// Write the element count of a following homogeneous run
    pub fn write_array_header(&mut self, count: usize) -> Result<(), EncodeError> {
        let count = Self::length_prefix(count)?;
        self.write_int(count)
    }

    /// Write an array of strings (header + elements)
    pub fn write_string_array<S: AsRef<str>>(&mut self, values: &[S]) -> Result<(), EncodeError> {
        self.write_array_header(values.len())?;
        for value in values {
            self.write_string(value.as_ref())?;
        }
        Ok(())
    }

    /// Finalize the packet and take its bytes
    pub fn finish(self) -> Vec<u8> {
        self.buffer.to_vec()
    }
}

// ============================================================================
// DECODER
// ============================================================================

/// Sequential, bounds-checked reader over one received packet.
///
/// There is no seek or rewind. A decoder lives for exactly one packet and is
/// dropped afterwards; trailing bytes left at the end are not an error.
#[derive(Debug)]
pub struct Decoder<'a> {
    buffer: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { buffer: data }
    }

    /// Unread bytes left in the packet
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        let remaining = self.buffer.remaining();
        if remaining < needed {
            return Err(DecodeError::Underflow { needed, remaining });
        }
        Ok(())
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(len)?;
        let (head, tail) = self.buffer.split_at(len);
        self.buffer = tail;
        Ok(head)
    }

    /// Read a length prefix; `None` for the null sentinel
    fn read_length(&mut self) -> Result<Option<usize>, DecodeError> {
        match self.read_int()? {
            NULL_LENGTH => Ok(None),
            len if len < 0 => Err(DecodeError::InvalidLength(len)),
            len => Ok(Some(len as usize)),
        }
    }

    pub fn read_short(&mut self) -> Result<i16, DecodeError> {
        self.ensure(SHORT_SIZE)?;
        Ok(self.buffer.get_i16())
    }

    pub fn read_int(&mut self) -> Result<i32, DecodeError> {
        self.ensure(INT_SIZE)?;
        Ok(self.buffer.get_i32())
    }

    pub fn read_long(&mut self) -> Result<i64, DecodeError> {
        self.ensure(LONG_SIZE)?;
        Ok(self.buffer.get_i64())
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        self.ensure(BOOL_SIZE)?;
        Ok(self.buffer.get_u8() != 0)
    }

    pub fn read_payload(&mut self) -> Result<Vec<u8>, DecodeError> {
        match self.read_length()? {
            Some(len) => Ok(self.take(len)?.to_vec()),
            None => Err(DecodeError::InvalidLength(NULL_LENGTH)),
        }
    }

    pub fn read_nullable_payload(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        match self.read_length()? {
            Some(len) => Ok(Some(self.take(len)?.to_vec())),
            None => Ok(None),
        }
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_payload()?;
        String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_nullable_string(&mut self) -> Result<Option<String>, DecodeError> {
        match self.read_nullable_payload()? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|_| DecodeError::InvalidUtf8),
            None => Ok(None),
        }
    }

    /// Read an array element count
    pub fn read_array_header(&mut self) -> Result<usize, DecodeError> {
        match self.read_int()? {
            count if count < 0 => Err(DecodeError::InvalidLength(count)),
            count => Ok(count as usize),
        }
    }

    /// Read an array of strings (header + elements)
    pub fn read_string_array(&mut self) -> Result<Vec<String>, DecodeError> {
        let count = self.read_array_header()?;
        let mut values = Vec::with_capacity(self.bounded_capacity(count));
        for _ in 0..count {
            values.push(self.read_string()?);
        }
        Ok(values)
    }

    /// Capacity hint for a declared element count. Every element starts with
    /// at least an `int` on the wire, and the hint never exceeds
    /// [`MAX_PREALLOCATED_ELEMENTS`]; larger arrays grow as they decode.
    pub fn bounded_capacity(&self, count: usize) -> usize {
        count
            .min(self.remaining() / INT_SIZE)
            .min(MAX_PREALLOCATED_ELEMENTS)
    }
}

// ============================================================================
// TESTS
// ============================================================================
