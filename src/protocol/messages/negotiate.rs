//! SMB2 Negotiate messages

use super::common::{
    buffer_offset, expect_structure_size, read_array, require_len, variable_field, SmbMessage,
};
use crate::error::Result;
use crate::protocol::smb2_constants::{
    structure_size, SecurityMode, Smb2Capabilities, Smb2Dialect,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};
use uuid::Uuid;

const REQUEST_FIXED: usize = 36;
const RESPONSE_FIXED: usize = 64;

/// SMB2 Negotiate Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateRequest {
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub client_guid: Uuid,
    pub client_start_time: u64,
    pub dialects: Vec<Smb2Dialect>,
}

impl Smb2NegotiateRequest {
    pub fn new(dialects: Vec<Smb2Dialect>) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::empty(),
            client_guid: Uuid::new_v4(),
            client_start_time: 0,
            dialects,
        }
    }
}

impl SmbMessage for Smb2NegotiateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, REQUEST_FIXED, "Negotiate request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::NEGOTIATE_REQUEST, "negotiate request")?;

        let dialect_count = cursor.read_u16::<LittleEndian>()? as usize;
        let security_mode = SecurityMode::from_bits_retain(cursor.read_u16::<LittleEndian>()?);
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let capabilities = Smb2Capabilities::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let client_guid = Uuid::from_bytes(read_array::<16>(&mut cursor)?);
        let client_start_time = cursor.read_u64::<LittleEndian>()?;

        require_len(buf, REQUEST_FIXED + dialect_count * 2, "Negotiate dialect list")?;
        let mut dialects = Vec::with_capacity(dialect_count);
        for _ in 0..dialect_count {
            dialects.push(Smb2Dialect::try_from(cursor.read_u16::<LittleEndian>()?)?);
        }

        Ok(Self {
            security_mode,
            capabilities,
            client_guid,
            client_start_time,
            dialects,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::NEGOTIATE_REQUEST)?;
        buf.write_u16::<LittleEndian>(self.dialects.len() as u16)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_all(self.client_guid.as_bytes())?;
        buf.write_u64::<LittleEndian>(self.client_start_time)?;

        for dialect in &self.dialects {
            buf.write_u16::<LittleEndian>(dialect.to_u16())?;
        }

        Ok(buf)
    }

    fn size(&self) -> usize {
        REQUEST_FIXED + self.dialects.len() * 2
    }
}

/// SMB2 Negotiate Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateResponse {
    pub security_mode: SecurityMode,
    /// Raw revision; may name a dialect this client does not speak
    pub dialect_revision: u16,
    pub server_guid: Uuid,
    pub capabilities: Smb2Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: u64,
    pub server_start_time: u64,
    pub security_blob: Vec<u8>,
}

impl Smb2NegotiateResponse {
    pub fn new(dialect: Smb2Dialect) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialect_revision: dialect.to_u16(),
            server_guid: Uuid::new_v4(),
            capabilities: Smb2Capabilities::empty(),
            max_transact_size: 1048576,
            max_read_size: 1048576,
            max_write_size: 1048576,
            system_time: 0,
            server_start_time: 0,
            security_blob: Vec::new(),
        }
    }

    /// The selected dialect, if it is one this client implements
    pub fn dialect(&self) -> Option<Smb2Dialect> {
        Smb2Dialect::try_from(self.dialect_revision).ok()
    }
}

impl SmbMessage for Smb2NegotiateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, RESPONSE_FIXED, "Negotiate response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::NEGOTIATE_RESPONSE, "negotiate response")?;

        let security_mode = SecurityMode::from_bits_retain(cursor.read_u16::<LittleEndian>()?);
        let dialect_revision = cursor.read_u16::<LittleEndian>()?;
        let _context_count = cursor.read_u16::<LittleEndian>()?;
        let server_guid = Uuid::from_bytes(read_array::<16>(&mut cursor)?);
        let capabilities = Smb2Capabilities::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let max_transact_size = cursor.read_u32::<LittleEndian>()?;
        let max_read_size = cursor.read_u32::<LittleEndian>()?;
        let max_write_size = cursor.read_u32::<LittleEndian>()?;
        let system_time = cursor.read_u64::<LittleEndian>()?;
        let server_start_time = cursor.read_u64::<LittleEndian>()?;
        let blob_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let blob_length = cursor.read_u16::<LittleEndian>()? as usize;
        let _context_offset = cursor.read_u32::<LittleEndian>()?;

        let security_blob = variable_field(buf, blob_offset, blob_length, "security buffer")?.to_vec();

        Ok(Self {
            security_mode,
            dialect_revision,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            server_start_time,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::NEGOTIATE_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.security_mode.bits())?;
        buf.write_u16::<LittleEndian>(self.dialect_revision)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_all(self.server_guid.as_bytes())?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u32::<LittleEndian>(self.max_transact_size)?;
        buf.write_u32::<LittleEndian>(self.max_read_size)?;
        buf.write_u32::<LittleEndian>(self.max_write_size)?;
        buf.write_u64::<LittleEndian>(self.system_time)?;
        buf.write_u64::<LittleEndian>(self.server_start_time)?;
        let blob_offset = if self.security_blob.is_empty() {
            0
        } else {
            buffer_offset(RESPONSE_FIXED)
        };
        buf.write_u16::<LittleEndian>(blob_offset as u16)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_all(&self.security_blob)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        RESPONSE_FIXED + self.security_blob.len()
    }
}
