//! SMB2 Session Setup messages

use super::common::{buffer_offset, expect_structure_size, require_len, variable_field, SmbMessage};
use crate::error::Result;
use crate::protocol::smb2_constants::{structure_size, SecurityMode, SessionFlags, Smb2Capabilities};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

const REQUEST_FIXED: usize = 24;
const RESPONSE_FIXED: usize = 8;

/// SMB2 SessionSetup Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupRequest {
    pub flags: u8,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub channel: u32,
    pub previous_session_id: u64,
    pub security_blob: Vec<u8>,
}

impl Smb2SessionSetupRequest {
    pub fn new() -> Self {
        Self {
            flags: 0,
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::empty(),
            channel: 0,
            previous_session_id: 0,
            security_blob: Vec::new(),
        }
    }

    pub fn with_security_blob(mut self, blob: Vec<u8>) -> Self {
        self.security_blob = blob;
        self
    }
}

impl Default for Smb2SessionSetupRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl SmbMessage for Smb2SessionSetupRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, REQUEST_FIXED, "SessionSetup request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(
            &mut cursor,
            structure_size::SESSION_SETUP_REQUEST,
            "SessionSetup request",
        )?;

        let flags = cursor.read_u8()?;
        let security_mode = SecurityMode::from_bits_retain(u16::from(cursor.read_u8()?));
        let capabilities = Smb2Capabilities::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let channel = cursor.read_u32::<LittleEndian>()?;
        let blob_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let blob_length = cursor.read_u16::<LittleEndian>()? as usize;
        let previous_session_id = cursor.read_u64::<LittleEndian>()?;

        let security_blob = variable_field(buf, blob_offset, blob_length, "security buffer")?.to_vec();

        Ok(Self {
            flags,
            security_mode,
            capabilities,
            channel,
            previous_session_id,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::SESSION_SETUP_REQUEST)?;
        buf.write_u8(self.flags)?;
        buf.write_u8(self.security_mode.bits() as u8)?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u32::<LittleEndian>(self.channel)?;

        let blob_offset = if self.security_blob.is_empty() {
            0
        } else {
            buffer_offset(REQUEST_FIXED)
        };
        buf.write_u16::<LittleEndian>(blob_offset as u16)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        buf.write_u64::<LittleEndian>(self.previous_session_id)?;
        buf.write_all(&self.security_blob)?;

        Ok(buf)
    }

    fn size(&self) -> usize {
        REQUEST_FIXED + self.security_blob.len()
    }
}

/// SMB2 SessionSetup Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupResponse {
    pub session_flags: SessionFlags,
    pub security_blob: Vec<u8>,
}

impl Smb2SessionSetupResponse {
    pub fn new() -> Self {
        Self {
            session_flags: SessionFlags::empty(),
            security_blob: Vec::new(),
        }
    }

    pub fn with_security_blob(mut self, blob: Vec<u8>) -> Self {
        self.security_blob = blob;
        self
    }
}

impl Default for Smb2SessionSetupResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl SmbMessage for Smb2SessionSetupResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, RESPONSE_FIXED, "SessionSetup response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(
            &mut cursor,
            structure_size::SESSION_SETUP_RESPONSE,
            "SessionSetup response",
        )?;

        let session_flags = SessionFlags::from_bits_retain(cursor.read_u16::<LittleEndian>()?);
        let blob_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let blob_length = cursor.read_u16::<LittleEndian>()? as usize;

        let security_blob = variable_field(buf, blob_offset, blob_length, "security buffer")?.to_vec();

        Ok(Self {
            session_flags,
            security_blob,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::SESSION_SETUP_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.session_flags.bits())?;
        let blob_offset = if self.security_blob.is_empty() {
            0
        } else {
            buffer_offset(RESPONSE_FIXED)
        };
        buf.write_u16::<LittleEndian>(blob_offset as u16)?;
        buf.write_u16::<LittleEndian>(self.security_blob.len() as u16)?;
        if self.security_blob.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&self.security_blob)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        RESPONSE_FIXED + self.security_blob.len().max(1)
    }
}
