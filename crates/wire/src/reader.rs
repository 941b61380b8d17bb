//! Protobuf-style input primitives

use crate::error::DecodeError;
use crate::writer::WireType;

/// Reads protobuf primitives from a byte slice
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..70).step_by(7) {
            let Some(&byte) = self.buf.get(self.pos) else {
                return Err(DecodeError::Truncated { offset: self.pos });
            };
            self.pos += 1;
            // The tenth byte may only carry the top bit of a u64
            if shift == 63 && byte > 1 {
                return Err(DecodeError::MalformedVarint { offset: start });
            }
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::MalformedVarint { offset: start })
    }

    /// Reads a field tag, returning the field number and wire type
    pub fn read_tag(&mut self) -> Result<(u32, WireType), DecodeError> {
        let offset = self.pos;
        let raw = self.read_varint()?;
        let wire_bits = (raw & 0x7) as u8;
        let wire_type = WireType::from_bits(wire_bits).ok_or(DecodeError::InvalidWireType(wire_bits))?;
        let field = u32::try_from(raw >> 3).map_err(|_| DecodeError::MalformedVarint { offset })?;
        if field == 0 {
            return Err(DecodeError::UnknownTag(0));
        }
        Ok((field, wire_type))
    }

    pub fn read_fixed64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(raw))
    }

    /// Reads a length prefix and returns the region it covers
    pub fn read_length_delimited(&mut self) -> Result<&'a [u8], DecodeError> {
        let offset = self.pos;
        let len = self.read_varint()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated { offset })?;
        self.take(len)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated { offset: self.buf.len() });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}
