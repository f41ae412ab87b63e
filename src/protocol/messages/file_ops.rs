//! SMB2 file operation messages (Create, Close, Read, Write, Flush)

use super::common::{
    buffer_offset, expect_structure_size, require_len, utf16le_decode, utf16le_encode,
    variable_field, FileId, SmbMessage,
};
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{
    create_action, impersonation_level, oplock_level, structure_size, CloseFlags,
    CreateDisposition, CreateOptions, DesiredAccess, FileAttributes, ShareAccess, WriteFlags,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

const CREATE_REQUEST_FIXED: usize = 56;
const CREATE_RESPONSE_FIXED: usize = 88;
const READ_REQUEST_FIXED: usize = 48;
const READ_RESPONSE_FIXED: usize = 16;
const WRITE_REQUEST_FIXED: usize = 48;
const WRITE_RESPONSE_FIXED: usize = 16;

/// Times, sizes and attributes in the order CREATE, CLOSE and
/// FileNetworkOpenInformation carry them. Times are raw FILETIMEs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub attributes: FileAttributes,
}

impl Default for FileStat {
    fn default() -> Self {
        Self {
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            change_time: 0,
            allocation_size: 0,
            end_of_file: 0,
            attributes: FileAttributes::NORMAL,
        }
    }
}

impl FileStat {
    pub const SIZE: usize = 52;

    pub fn read_from(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            creation_time: cursor.read_u64::<LittleEndian>()?,
            last_access_time: cursor.read_u64::<LittleEndian>()?,
            last_write_time: cursor.read_u64::<LittleEndian>()?,
            change_time: cursor.read_u64::<LittleEndian>()?,
            allocation_size: cursor.read_u64::<LittleEndian>()?,
            end_of_file: cursor.read_u64::<LittleEndian>()?,
            attributes: FileAttributes::from_bits_retain(cursor.read_u32::<LittleEndian>()?),
        })
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u64::<LittleEndian>(self.creation_time)?;
        buf.write_u64::<LittleEndian>(self.last_access_time)?;
        buf.write_u64::<LittleEndian>(self.last_write_time)?;
        buf.write_u64::<LittleEndian>(self.change_time)?;
        buf.write_u64::<LittleEndian>(self.allocation_size)?;
        buf.write_u64::<LittleEndian>(self.end_of_file)?;
        buf.write_u32::<LittleEndian>(self.attributes.bits())?;
        Ok(())
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// SMB2 Create Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateRequest {
    pub requested_oplock_level: u8,
    pub impersonation_level: u32,
    pub desired_access: DesiredAccess,
    pub file_attributes: FileAttributes,
    pub share_access: ShareAccess,
    pub create_disposition: CreateDisposition,
    pub create_options: CreateOptions,
    /// Share-relative path with backslash separators; empty opens the root
    pub file_name: String,
}

impl Smb2CreateRequest {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            requested_oplock_level: oplock_level::NONE,
            impersonation_level: impersonation_level::IMPERSONATION,
            desired_access: DesiredAccess::FILE_GENERIC_READ,
            file_attributes: FileAttributes::NORMAL,
            share_access: ShareAccess::FILE_SHARE_READ | ShareAccess::FILE_SHARE_WRITE,
            create_disposition: CreateDisposition::Open,
            create_options: CreateOptions::empty(),
            file_name: file_name.into(),
        }
    }
}

impl SmbMessage for Smb2CreateRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, CREATE_REQUEST_FIXED, "Create request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::CREATE_REQUEST, "Create request")?;

        let _security_flags = cursor.read_u8()?;
        let requested_oplock_level = cursor.read_u8()?;
        let impersonation_level = cursor.read_u32::<LittleEndian>()?;
        let _smb_create_flags = cursor.read_u64::<LittleEndian>()?;
        let _reserved = cursor.read_u64::<LittleEndian>()?;
        let desired_access = DesiredAccess::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let file_attributes = FileAttributes::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let share_access = ShareAccess::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let create_disposition = CreateDisposition::try_from(cursor.read_u32::<LittleEndian>()?)?;
        let create_options = CreateOptions::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let name_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let name_length = cursor.read_u16::<LittleEndian>()? as usize;

        let file_name = utf16le_decode(variable_field(buf, name_offset, name_length, "file name")?)?;

        Ok(Self {
            requested_oplock_level,
            impersonation_level,
            desired_access,
            file_attributes,
            share_access,
            create_disposition,
            create_options,
            file_name,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16le_encode(&self.file_name);
        let mut buf = Vec::with_capacity(CREATE_REQUEST_FIXED + name.len().max(1));

        buf.write_u16::<LittleEndian>(structure_size::CREATE_REQUEST)?;
        buf.write_u8(0)?;
        buf.write_u8(self.requested_oplock_level)?;
        buf.write_u32::<LittleEndian>(self.impersonation_level)?;
        buf.write_u64::<LittleEndian>(0)?;
        buf.write_u64::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.desired_access.bits())?;
        buf.write_u32::<LittleEndian>(self.file_attributes.bits())?;
        buf.write_u32::<LittleEndian>(self.share_access.bits())?;
        buf.write_u32::<LittleEndian>(self.create_disposition as u32)?;
        buf.write_u32::<LittleEndian>(self.create_options.bits())?;
        buf.write_u16::<LittleEndian>(buffer_offset(CREATE_REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(name.len() as u16)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(0)?;

        // The buffer must hold at least one byte even for the share root
        if name.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&name)?;
        }

        Ok(buf)
    }

    fn size(&self) -> usize {
        CREATE_REQUEST_FIXED + (self.file_name.encode_utf16().count() * 2).max(1)
    }
}

/// SMB2 Create Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateResponse {
    pub oplock_level: u8,
    pub flags: u8,
    pub create_action: u32,
    pub stat: FileStat,
    pub file_id: FileId,
}

impl Smb2CreateResponse {
    pub fn new(file_id: FileId, stat: FileStat) -> Self {
        Self {
            oplock_level: oplock_level::NONE,
            flags: 0,
            create_action: create_action::OPENED,
            stat,
            file_id,
        }
    }
}

impl SmbMessage for Smb2CreateResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, CREATE_RESPONSE_FIXED, "Create response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::CREATE_RESPONSE, "Create response")?;

        let oplock_level = cursor.read_u8()?;
        let flags = cursor.read_u8()?;
        let create_action = cursor.read_u32::<LittleEndian>()?;
        let stat = FileStat::read_from(&mut cursor)?;
        let _reserved2 = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;
        let _contexts_offset = cursor.read_u32::<LittleEndian>()?;
        let _contexts_length = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            oplock_level,
            flags,
            create_action,
            stat,
            file_id,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(CREATE_RESPONSE_FIXED);
        buf.write_u16::<LittleEndian>(structure_size::CREATE_RESPONSE)?;
        buf.write_u8(self.oplock_level)?;
        buf.write_u8(self.flags)?;
        buf.write_u32::<LittleEndian>(self.create_action)?;
        self.stat.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(0)?;
        self.file_id.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        CREATE_RESPONSE_FIXED
    }
}

/// SMB2 Close Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CloseRequest {
    pub flags: CloseFlags,
    pub file_id: FileId,
}

impl Smb2CloseRequest {
    pub fn new(file_id: FileId) -> Self {
        Self {
            flags: CloseFlags::empty(),
            file_id,
        }
    }
}

impl SmbMessage for Smb2CloseRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 24, "Close request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::CLOSE_REQUEST, "Close request")?;

        let flags = CloseFlags::from_bits_retain(cursor.read_u16::<LittleEndian>()?);
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;

        Ok(Self { flags, file_id })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(24);
        buf.write_u16::<LittleEndian>(structure_size::CLOSE_REQUEST)?;
        buf.write_u16::<LittleEndian>(self.flags.bits())?;
        buf.write_u32::<LittleEndian>(0)?;
        self.file_id.write_to(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        24
    }
}

/// SMB2 Close Response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2CloseResponse {
    pub flags: u16,
    pub stat: FileStat,
}

impl SmbMessage for Smb2CloseResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 60, "Close response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::CLOSE_RESPONSE, "Close response")?;

        let flags = cursor.read_u16::<LittleEndian>()?;
        let _reserved = cursor.read_u32::<LittleEndian>()?;
        let stat = FileStat::read_from(&mut cursor)?;

        Ok(Self { flags, stat })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(60);
        buf.write_u16::<LittleEndian>(structure_size::CLOSE_RESPONSE)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u32::<LittleEndian>(0)?;
        self.stat.write_to(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        60
    }
}

/// SMB2 Read Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2ReadRequest {
    pub length: u32,
    pub offset: u64,
    pub file_id: FileId,
    pub minimum_count: u32,
}

impl Smb2ReadRequest {
    pub fn new(file_id: FileId, offset: u64, length: u32) -> Self {
        Self {
            length,
            offset,
            file_id,
            minimum_count: 0,
        }
    }
}

impl SmbMessage for Smb2ReadRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, READ_REQUEST_FIXED, "Read request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::READ_REQUEST, "Read request")?;

        let _padding = cursor.read_u8()?;
        let _flags = cursor.read_u8()?;
        let length = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;
        let minimum_count = cursor.read_u32::<LittleEndian>()?;

        Ok(Self {
            length,
            offset,
            file_id,
            minimum_count,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(READ_REQUEST_FIXED + 1);
        buf.write_u16::<LittleEndian>(structure_size::READ_REQUEST)?;
        buf.write_u8(0)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.length)?;
        buf.write_u64::<LittleEndian>(self.offset)?;
        self.file_id.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.minimum_count)?;
        buf.write_u32::<LittleEndian>(0)?; // Channel
        buf.write_u32::<LittleEndian>(0)?; // RemainingBytes
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.push(0);
        Ok(buf)
    }

    fn size(&self) -> usize {
        READ_REQUEST_FIXED + 1
    }
}

/// SMB2 Read Response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2ReadResponse {
    pub data_remaining: u32,
    pub data: Vec<u8>,
}

impl Smb2ReadResponse {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data_remaining: 0,
            data,
        }
    }
}

impl SmbMessage for Smb2ReadResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, READ_RESPONSE_FIXED, "Read response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::READ_RESPONSE, "Read response")?;

        let data_offset = cursor.read_u8()? as usize;
        let _reserved = cursor.read_u8()?;
        let data_length = cursor.read_u32::<LittleEndian>()? as usize;
        let data_remaining = cursor.read_u32::<LittleEndian>()?;

        if data_length > 0 && data_offset < buffer_offset(READ_RESPONSE_FIXED) {
            return Err(Error::MalformedMessage(format!(
                "read data offset {} overlaps the fixed response",
                data_offset
            )));
        }
        let data = variable_field(buf, data_offset, data_length, "read data")?.to_vec();

        Ok(Self {
            data_remaining,
            data,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::READ_RESPONSE)?;
        buf.write_u8(buffer_offset(READ_RESPONSE_FIXED) as u8)?;
        buf.write_u8(0)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.data_remaining)?;
        buf.write_u32::<LittleEndian>(0)?;
        if self.data.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&self.data)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        READ_RESPONSE_FIXED + self.data.len().max(1)
    }
}

/// SMB2 Write Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2WriteRequest {
    pub offset: u64,
    pub file_id: FileId,
    pub flags: WriteFlags,
    pub data: Vec<u8>,
}

impl Smb2WriteRequest {
    pub fn new(file_id: FileId, offset: u64, data: Vec<u8>) -> Self {
        Self {
            offset,
            file_id,
            flags: WriteFlags::empty(),
            data,
        }
    }
}

impl SmbMessage for Smb2WriteRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, WRITE_REQUEST_FIXED, "Write request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::WRITE_REQUEST, "Write request")?;

        let data_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let length = cursor.read_u32::<LittleEndian>()? as usize;
        let offset = cursor.read_u64::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;
        let _channel = cursor.read_u32::<LittleEndian>()?;
        let _remaining = cursor.read_u32::<LittleEndian>()?;
        let _channel_info_offset = cursor.read_u16::<LittleEndian>()?;
        let _channel_info_length = cursor.read_u16::<LittleEndian>()?;
        let flags = WriteFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);

        let data = variable_field(buf, data_offset, length, "write data")?.to_vec();

        Ok(Self {
            offset,
            file_id,
            flags,
            data,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::WRITE_REQUEST)?;
        buf.write_u16::<LittleEndian>(buffer_offset(WRITE_REQUEST_FIXED) as u16)?;
        buf.write_u32::<LittleEndian>(self.data.len() as u32)?;
        buf.write_u64::<LittleEndian>(self.offset)?;
        self.file_id.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        if self.data.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&self.data)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        WRITE_REQUEST_FIXED + self.data.len().max(1)
    }
}

/// SMB2 Write Response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Smb2WriteResponse {
    pub count: u32,
}

impl SmbMessage for Smb2WriteResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, WRITE_RESPONSE_FIXED, "Write response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::WRITE_RESPONSE, "Write response")?;

        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let count = cursor.read_u32::<LittleEndian>()?;

        Ok(Self { count })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(WRITE_RESPONSE_FIXED);
        buf.write_u16::<LittleEndian>(structure_size::WRITE_RESPONSE)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.count)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u16::<LittleEndian>(0)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        WRITE_RESPONSE_FIXED
    }
}

/// SMB2 Flush Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2FlushRequest {
    pub file_id: FileId,
}

impl SmbMessage for Smb2FlushRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 24, "Flush request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::FLUSH_REQUEST, "Flush request")?;

        let _reserved1 = cursor.read_u16::<LittleEndian>()?;
        let _reserved2 = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;

        Ok(Self { file_id })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(24);
        buf.write_u16::<LittleEndian>(structure_size::FLUSH_REQUEST)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(0)?;
        self.file_id.write_to(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        24
    }
}
