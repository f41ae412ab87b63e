//! NDR20 marshalling, little-endian only
//!
//! Alignment is relative to the start of the stub, which DCE/RPC places on
//! an 8-byte boundary inside the PDU.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Referent ID the encoder writes for non-null unique pointers
const FIRST_REFERENT: u32 = 0x0002_0000;

/// NDR encoder
#[derive(Debug)]
pub struct NdrEncoder {
    buffer: Vec<u8>,
    next_referent: u32,
}

impl Default for NdrEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl NdrEncoder {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            next_referent: FIRST_REFERENT,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    fn align(&mut self, alignment: usize) {
        let padding = (alignment - self.buffer.len() % alignment) % alignment;
        self.buffer.resize(self.buffer.len() + padding, 0);
    }

    pub fn encode_u16(&mut self, value: u16) -> Result<()> {
        self.align(2);
        self.buffer.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn encode_u32(&mut self, value: u32) -> Result<()> {
        self.align(4);
        self.buffer.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    /// Conformant varying UTF-16 string with its NUL terminator
    pub fn encode_string(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().chain(std::iter::once(0)).collect();
        self.encode_u32(units.len() as u32)?;
        self.encode_u32(0)?;
        self.encode_u32(units.len() as u32)?;
        for unit in units {
            self.encode_u16(unit)?;
        }
        Ok(())
    }

    /// Referent ID of a unique pointer; the pointee is written by the caller
    pub fn encode_pointer(&mut self, present: bool) -> Result<()> {
        if present {
            let referent = self.next_referent;
            self.next_referent += 4;
            self.encode_u32(referent)
        } else {
            self.encode_u32(0)
        }
    }

    /// Unique pointer to a string, pointee inline
    pub fn encode_unique_string(&mut self, value: Option<&str>) -> Result<()> {
        self.encode_pointer(value.is_some())?;
        match value {
            Some(value) => self.encode_string(value),
            None => Ok(()),
        }
    }
}

/// NDR decoder
pub struct NdrDecoder<'a> {
    cursor: Cursor<&'a [u8]>,
}

fn truncated(_: std::io::Error) -> Error {
    Error::MalformedMessage("NDR stub ends early".into())
}

impl<'a> NdrDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn align(&mut self, alignment: u64) {
        let position = self.cursor.position();
        let padding = (alignment - position % alignment) % alignment;
        self.cursor.set_position(position + padding);
    }

    pub fn decode_u16(&mut self) -> Result<u16> {
        self.align(2);
        self.cursor.read_u16::<LittleEndian>().map_err(truncated)
    }

    pub fn decode_u32(&mut self) -> Result<u32> {
        self.align(4);
        self.cursor.read_u32::<LittleEndian>().map_err(truncated)
    }

    /// True for a non-null unique or full pointer
    pub fn decode_pointer(&mut self) -> Result<bool> {
        Ok(self.decode_u32()? != 0)
    }

    /// Conformant varying UTF-16 string; the terminator is dropped
    pub fn decode_string(&mut self) -> Result<String> {
        let max_count = self.decode_u32()?;
        let offset = self.decode_u32()?;
        let actual = self.decode_u32()?;
        if offset != 0 || actual > max_count {
            return Err(Error::MalformedMessage(format!(
                "bad string bounds: max {} offset {} actual {}",
                max_count, offset, actual
            )));
        }
        if actual as usize * 2 > self.remaining() {
            return Err(Error::MalformedMessage("NDR string longer than stub".into()));
        }
        let mut units = Vec::with_capacity(actual as usize);
        for _ in 0..actual {
            units.push(self.decode_u16()?);
        }
        let end = units.iter().position(|&unit| unit == 0).unwrap_or(units.len());
        String::from_utf16(&units[..end])
            .map_err(|e| Error::MalformedMessage(format!("invalid UTF-16 in NDR string: {}", e)))
    }

    /// Unique pointer to a string, pointee inline
    pub fn decode_unique_string(&mut self) -> Result<Option<String>> {
        if self.decode_pointer()? {
            self.decode_string().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_layout() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_string("ab").unwrap();
        let bytes = encoder.into_bytes();
        assert_eq!(
            bytes,
            [3, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, b'a', 0, b'b', 0, 0, 0]
        );
        let mut decoder = NdrDecoder::new(&bytes);
        assert_eq!(decoder.decode_string().unwrap(), "ab");
        assert_eq!(decoder.remaining(), 0);
    }

    #[test]
    fn test_alignment_after_string() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_string("a").unwrap();
        encoder.encode_u32(7).unwrap();
        let bytes = encoder.into_bytes();
        // 12 bytes of counts, 4 of characters, then the u32
        assert_eq!(bytes.len(), 20);

        let mut encoder = NdrEncoder::new();
        encoder.encode_string("ab").unwrap();
        encoder.encode_u32(7).unwrap();
        let bytes = encoder.into_bytes();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[18..20], &[0, 0]);

        let mut decoder = NdrDecoder::new(&bytes);
        decoder.decode_string().unwrap();
        assert_eq!(decoder.decode_u32().unwrap(), 7);
    }

    #[test]
    fn test_pointers_get_distinct_referents() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_pointer(true).unwrap();
        encoder.encode_pointer(false).unwrap();
        encoder.encode_pointer(true).unwrap();
        let bytes = encoder.into_bytes();
        let mut decoder = NdrDecoder::new(&bytes);
        assert_eq!(decoder.decode_u32().unwrap(), FIRST_REFERENT);
        assert_eq!(decoder.decode_u32().unwrap(), 0);
        assert_eq!(decoder.decode_u32().unwrap(), FIRST_REFERENT + 4);
    }

    #[test]
    fn test_unique_string() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_unique_string(Some("srv")).unwrap();
        encoder.encode_unique_string(None).unwrap();
        let bytes = encoder.into_bytes();
        let mut decoder = NdrDecoder::new(&bytes);
        assert_eq!(decoder.decode_unique_string().unwrap().as_deref(), Some("srv"));
        assert_eq!(decoder.decode_unique_string().unwrap(), None);
    }

    #[test]
    fn test_truncated_stub() {
        let mut decoder = NdrDecoder::new(&[1, 0]);
        assert!(matches!(decoder.decode_u32(), Err(Error::MalformedMessage(_))));

        let mut encoder = NdrEncoder::new();
        encoder.encode_u32(100).unwrap();
        encoder.encode_u32(0).unwrap();
        encoder.encode_u32(100).unwrap();
        let bytes = encoder.into_bytes();
        let mut decoder = NdrDecoder::new(&bytes);
        assert!(matches!(decoder.decode_string(), Err(Error::MalformedMessage(_))));
    }

    #[test]
    fn test_string_bounds_checked() {
        let mut encoder = NdrEncoder::new();
        encoder.encode_u32(1).unwrap();
        encoder.encode_u32(0).unwrap();
        encoder.encode_u32(2).unwrap();
        let bytes = encoder.into_bytes();
        let mut decoder = NdrDecoder::new(&bytes);
        assert!(decoder.decode_string().is_err());
    }
}
