//! Common types and traits for SMB2 messages

use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{structure_size, SMB2_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use std::io::{self, Read};

/// Trait for SMB message bodies that can be parsed from and serialized to bytes
///
/// `buf` is the body only; offsets inside bodies are relative to the start of
/// the SMB2 header, so parsers subtract [`SMB2_HEADER_SIZE`].
pub trait SmbMessage: Sized {
    /// Parse message from bytes
    fn parse(buf: &[u8]) -> Result<Self>;

    /// Serialize message to bytes
    fn serialize(&self) -> Result<Vec<u8>>;

    /// Get the size of the message when serialized
    fn size(&self) -> usize;
}

/// File ID for SMB2 operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub fn with_values(persistent: u64, volatile: u64) -> Self {
        Self {
            persistent,
            volatile,
        }
    }

    pub fn read_from(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        let persistent = cursor.read_u64::<LittleEndian>()?;
        let volatile = cursor.read_u64::<LittleEndian>()?;
        Ok(Self {
            persistent,
            volatile,
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u64::<LittleEndian>(self.persistent)?;
        buf.write_u64::<LittleEndian>(self.volatile)?;
        Ok(())
    }
}

/// Fail unless the body is at least `need` bytes long
pub(crate) fn require_len(buf: &[u8], need: usize, what: &str) -> Result<()> {
    if buf.len() < need {
        return Err(Error::MalformedMessage(format!(
            "{} needs {} bytes, have {}",
            what,
            need,
            buf.len()
        )));
    }
    Ok(())
}

/// Read and check the StructureSize field
pub(crate) fn expect_structure_size(
    cursor: &mut io::Cursor<&[u8]>,
    expected: u16,
    what: &str,
) -> Result<()> {
    let structure_size = cursor.read_u16::<LittleEndian>()?;
    if structure_size != expected {
        return Err(Error::MalformedMessage(format!(
            "Invalid {} structure size: {}",
            what, structure_size
        )));
    }
    Ok(())
}

/// Resolve a header-relative offset/length pair to a slice of the body
pub(crate) fn variable_field<'a>(
    body: &'a [u8],
    offset: usize,
    length: usize,
    what: &str,
) -> Result<&'a [u8]> {
    if length == 0 {
        return Ok(&[]);
    }
    let start = offset.checked_sub(SMB2_HEADER_SIZE).ok_or_else(|| {
        Error::MalformedMessage(format!("{} offset {} points into the header", what, offset))
    })?;
    let end = start
        .checked_add(length)
        .filter(|end| *end <= body.len())
        .ok_or_else(|| {
            Error::MalformedMessage(format!(
                "{} ({} bytes at {}) extends beyond message",
                what, length, offset
            ))
        })?;
    Ok(&body[start..end])
}

/// Header-relative offset of a buffer that follows a fixed body part
pub(crate) fn buffer_offset(fixed_len: usize) -> usize {
    SMB2_HEADER_SIZE + fixed_len
}

/// Encode a string as UTF-16LE
pub fn utf16le_encode(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

/// Decode UTF-16LE bytes
pub fn utf16le_decode(bytes: &[u8]) -> Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(Error::MalformedMessage(
            "UTF-16 string has odd byte length".into(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| Error::MalformedMessage(format!("invalid UTF-16 string: {}", e)))
}

/// Read a fixed-size byte array
pub(crate) fn read_array<const N: usize>(cursor: &mut io::Cursor<&[u8]>) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    cursor.read_exact(&mut out)?;
    Ok(out)
}

/// 100ns intervals between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_EPOCH: i64 = 116_444_736_000_000_000;

/// Convert a FILETIME to UTC; zero means "not set"
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let since_unix = i64::try_from(filetime).ok()? - FILETIME_UNIX_EPOCH;
    let secs = since_unix.div_euclid(10_000_000);
    let nanos = (since_unix.rem_euclid(10_000_000) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Convert UTC to a FILETIME
pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let intervals = time.timestamp() * 10_000_000 + i64::from(time.timestamp_subsec_nanos() / 100);
    (intervals + FILETIME_UNIX_EPOCH).max(0) as u64
}

/// Current time as FILETIME
pub fn filetime_now() -> u64 {
    datetime_to_filetime(Utc::now())
}

/// Body of an ERROR response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2ErrorResponse {
    pub error_context_count: u8,
    pub error_data: Vec<u8>,
}

impl SmbMessage for Smb2ErrorResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 8, "Error response")?;
        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::ERROR_RESPONSE, "error response")?;
        let error_context_count = cursor.read_u8()?;
        let _reserved = cursor.read_u8()?;
        let byte_count = cursor.read_u32::<LittleEndian>()? as usize;
        let error_data = variable_field(buf, buffer_offset(8), byte_count, "error data")?.to_vec();
        Ok(Self {
            error_context_count,
            error_data,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::ERROR_RESPONSE)?;
        buf.write_u8(self.error_context_count)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.error_data.len() as u32)?;
        if self.error_data.is_empty() {
            buf.push(0);
        } else {
            buf.extend_from_slice(&self.error_data);
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        8 + self.error_data.len().max(1)
    }
}

/// Four-byte body shared by ECHO, LOGOFF, TREE_DISCONNECT and FLUSH responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Smb2EmptyBody;

impl SmbMessage for Smb2EmptyBody {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 4, "Empty body")?;
        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, 4, "empty body")?;
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(4);
        buf.write_u16::<LittleEndian>(4)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_round_trip() {
        let bytes = utf16le_encode("dir\\файл.txt");
        assert_eq!(utf16le_decode(&bytes).unwrap(), "dir\\файл.txt");
        assert!(utf16le_decode(&[0x41]).is_err());
    }

    #[test]
    fn test_filetime_conversion() {
        let unix_epoch = filetime_to_datetime(116_444_736_000_000_000).unwrap();
        assert_eq!(unix_epoch.timestamp(), 0);

        let now = Utc::now();
        let back = filetime_to_datetime(datetime_to_filetime(now)).unwrap();
        assert_eq!(back.timestamp(), now.timestamp());
        assert!(filetime_to_datetime(0).is_none());
    }

    #[test]
    fn test_variable_field_bounds() {
        let body = [0u8; 16];
        assert_eq!(variable_field(&body, 72, 8, "x").unwrap().len(), 8);
        assert!(variable_field(&body, 72, 9, "x").is_err());
        assert!(variable_field(&body, 10, 2, "x").is_err());
        assert!(variable_field(&body, 0, 0, "x").unwrap().is_empty());
    }

    #[test]
    fn test_error_response_round_trip() {
        let empty = Smb2ErrorResponse::default();
        let bytes = empty.serialize().unwrap();
        assert_eq!(bytes.len(), 9);
        assert_eq!(Smb2ErrorResponse::parse(&bytes).unwrap(), empty);

        let with_data = Smb2ErrorResponse {
            error_context_count: 0,
            error_data: vec![1, 2, 3, 4],
        };
        let bytes = with_data.serialize().unwrap();
        assert_eq!(Smb2ErrorResponse::parse(&bytes).unwrap(), with_data);
    }
}
