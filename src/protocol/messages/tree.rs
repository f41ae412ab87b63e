//! SMB2 Tree Connect messages

use super::common::{
    buffer_offset, expect_structure_size, require_len, utf16le_decode, utf16le_encode,
    variable_field, SmbMessage,
};
use crate::error::Result;
use crate::protocol::smb2_constants::{
    structure_size, DesiredAccess, ShareCapabilities, ShareFlags, ShareType,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

const REQUEST_FIXED: usize = 8;

/// SMB2 TreeConnect Request
///
/// `path` is the UNC path of the share, e.g. `\\server\share`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectRequest {
    pub flags: u16,
    pub path: String,
}

impl Smb2TreeConnectRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            flags: 0,
            path: path.into(),
        }
    }
}

impl SmbMessage for Smb2TreeConnectRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, REQUEST_FIXED, "TreeConnect request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(
            &mut cursor,
            structure_size::TREE_CONNECT_REQUEST,
            "TreeConnect request",
        )?;

        let flags = cursor.read_u16::<LittleEndian>()?;
        let path_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let path_length = cursor.read_u16::<LittleEndian>()? as usize;
        let path = utf16le_decode(variable_field(buf, path_offset, path_length, "share path")?)?;

        Ok(Self { flags, path })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let path = utf16le_encode(&self.path);
        let mut buf = Vec::with_capacity(REQUEST_FIXED + path.len());
        buf.write_u16::<LittleEndian>(structure_size::TREE_CONNECT_REQUEST)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(buffer_offset(REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(path.len() as u16)?;
        if path.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&path)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        REQUEST_FIXED + (self.path.encode_utf16().count() * 2).max(1)
    }
}

/// SMB2 TreeConnect Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectResponse {
    pub share_type: ShareType,
    pub share_flags: ShareFlags,
    pub capabilities: ShareCapabilities,
    pub maximal_access: DesiredAccess,
}

impl Smb2TreeConnectResponse {
    pub fn new(share_type: ShareType) -> Self {
        Self {
            share_type,
            share_flags: ShareFlags::empty(),
            capabilities: ShareCapabilities::empty(),
            maximal_access: DesiredAccess::FILE_ALL_ACCESS,
        }
    }
}

impl SmbMessage for Smb2TreeConnectResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 16, "TreeConnect response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(
            &mut cursor,
            structure_size::TREE_CONNECT_RESPONSE,
            "TreeConnect response",
        )?;

        let share_type = ShareType::from_u8(cursor.read_u8()?);
        let _reserved = cursor.read_u8()?;
        let share_flags = ShareFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let capabilities = ShareCapabilities::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let maximal_access = DesiredAccess::from_bits_retain(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            share_type,
            share_flags,
            capabilities,
            maximal_access,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(16);
        buf.write_u16::<LittleEndian>(structure_size::TREE_CONNECT_RESPONSE)?;
        buf.write_u8(self.share_type.to_u8())?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.share_flags.bits())?;
        buf.write_u32::<LittleEndian>(self.capabilities.bits())?;
        buf.write_u32::<LittleEndian>(self.maximal_access.bits())?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        16
    }
}
