// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Varint / length-delimited primitives.
//!
//! The subset of the protobuf wire format the sync protocol needs:
//! varints, tags, and length-delimited fields. Fixed-width and group wire
//! types are recognized only so unknown fields can be skipped.

use integer_encoding::VarInt;
use thiserror::Error;

/// A varint never needs more than 10 bytes for 64 bits.
pub const MAX_VARINT_LEN: usize = 10;

/// Largest legal field number (2^29 - 1).
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// Wire-level decode failures.
///
/// Inside a sync batch these are isolated to the envelope that caused them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {offset}")]
    Truncated { offset: usize },

    #[error("varint longer than 64 bits at offset {offset}")]
    VarintOverflow { offset: usize },

    #[error("invalid wire type {0}")]
    InvalidWireType(u8),

    #[error("unsupported wire type {0:?}")]
    UnsupportedWireType(WireType),

    #[error("invalid field number {0}")]
    InvalidFieldNumber(u64),

    #[error("field {field} has wire type {actual:?}, expected {expected:?}")]
    WireTypeMismatch {
        field: u32,
        expected: WireType,
        actual: WireType,
    },

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid value encoding: {0:?}")]
    InvalidValue(String),

    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    #[error("envelope content is encrypted")]
    Encrypted,
}

impl DecodeError {
    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "truncated",
            Self::VarintOverflow { .. } => "varint_overflow",
            Self::InvalidWireType(_) => "invalid_wire_type",
            Self::UnsupportedWireType(_) => "unsupported_wire_type",
            Self::InvalidFieldNumber(_) => "invalid_field_number",
            Self::WireTypeMismatch { .. } => "wire_type_mismatch",
            Self::InvalidUtf8 => "invalid_utf8",
            Self::InvalidValue(_) => "invalid_value",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
            Self::Encrypted => "encrypted",
        }
    }
}

/// The low three bits of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    StartGroup = 3,
    EndGroup = 4,
    Fixed32 = 5,
}

impl TryFrom<u8> for WireType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            3 => Ok(Self::StartGroup),
            4 => Ok(Self::EndGroup),
            5 => Ok(Self::Fixed32),
            other => Err(DecodeError::InvalidWireType(other)),
        }
    }
}

/// Append-only encoder.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Little-endian base-128.
    pub fn write_varint(&mut self, value: u64) {
        let mut scratch = [0u8; MAX_VARINT_LEN];
        let len = value.encode_var(&mut scratch);
        self.buf.extend_from_slice(&scratch[..len]);
    }

    pub fn write_tag(&mut self, field: u32, wire_type: WireType) {
        self.write_varint((u64::from(field) << 3) | wire_type as u64);
    }

    /// Length-delimited field; omitted when empty.
    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.write_len_delimited(field, bytes);
    }

    /// String field; omitted when empty.
    pub fn write_string_field(&mut self, field: u32, value: &str) {
        self.write_bytes_field(field, value.as_bytes());
    }

    /// Bool field; omitted when false.
    pub fn write_bool_field(&mut self, field: u32, value: bool) {
        if value {
            self.write_tag(field, WireType::Varint);
            self.write_varint(1);
        }
    }

    /// Embedded message; always written, even when its encoding is empty.
    pub fn write_message_field(&mut self, field: u32, encoded: &[u8]) {
        self.write_len_delimited(field, encoded);
    }

    fn write_len_delimited(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, WireType::LengthDelimited);
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }
}

/// Sequential decoder over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.pos >= self.buf.len()
    }

    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let window = self.buf.get(start..).unwrap_or_default();
        let window = &window[..window.len().min(MAX_VARINT_LEN)];

        match u64::decode_var(window) {
            // The tenth byte may only carry the top bit of a u64
            Some((_, read)) if read == MAX_VARINT_LEN && window[MAX_VARINT_LEN - 1] > 1 => {
                Err(DecodeError::VarintOverflow { offset: start })
            }
            Some((value, read)) => {
                self.pos += read;
                Ok(value)
            }
            None if window.len() < MAX_VARINT_LEN => Err(DecodeError::Truncated {
                offset: start + window.len(),
            }),
            None => Err(DecodeError::VarintOverflow { offset: start }),
        }
    }

    pub fn read_tag(&mut self) -> Result<(u32, WireType), DecodeError> {
        let raw = self.read_varint()?;
        let wire_type = WireType::try_from((raw & 0x7) as u8)?;
        let field = raw >> 3;

        match u32::try_from(field) {
            Ok(field) if field != 0 && field <= MAX_FIELD_NUMBER => Ok((field, wire_type)),
            _ => Err(DecodeError::InvalidFieldNumber(field)),
        }
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8], DecodeError> {
        let offset = self.pos;
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated { offset })?;
        if len > self.remaining() {
            return Err(DecodeError::Truncated { offset });
        }

        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.read_varint()? != 0)
    }

    /// Skip over a field's payload. Used for field numbers a decoder does
    /// not recognize.
    pub fn skip_field(&mut self, wire_type: WireType) -> Result<(), DecodeError> {
        match wire_type {
            WireType::Varint => self.read_varint().map(|_| ()),
            WireType::LengthDelimited => self.read_bytes().map(|_| ()),
            WireType::Fixed64 => self.advance(8),
            WireType::Fixed32 => self.advance(4),
            WireType::StartGroup | WireType::EndGroup => {
                Err(DecodeError::UnsupportedWireType(wire_type))
            }
        }
    }

    fn advance(&mut self, n: usize) -> Result<(), DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::Truncated { offset: self.pos });
        }
        self.pos += n;
        Ok(())
    }

    /// Read a string, checking the tag's wire type first.
    pub fn string_field(&mut self, field: u32, wire_type: WireType) -> Result<String, DecodeError> {
        expect(field, WireType::LengthDelimited, wire_type)?;
        self.read_string()
    }

    /// Read raw bytes, checking the tag's wire type first.
    pub fn bytes_field(&mut self, field: u32, wire_type: WireType) -> Result<Vec<u8>, DecodeError> {
        expect(field, WireType::LengthDelimited, wire_type)?;
        self.read_bytes().map(<[u8]>::to_vec)
    }

    /// Read a bool, checking the tag's wire type first.
    pub fn bool_field(&mut self, field: u32, wire_type: WireType) -> Result<bool, DecodeError> {
        expect(field, WireType::Varint, wire_type)?;
        self.read_bool()
    }
}

fn expect(field: u32, expected: WireType, actual: WireType) -> Result<(), DecodeError> {
    if expected == actual {
        Ok(())
    } else {
        Err(DecodeError::WireTypeMismatch {
            field,
            expected,
            actual,
        })
    }
}
