//! SMB2 Query Info and Set Info messages plus the file information
//! records this client reads and writes through them.

use super::common::{
    buffer_offset, expect_structure_size, require_len, utf16le_decode, utf16le_encode,
    variable_field, FileId, SmbMessage,
};
use super::file_ops::FileStat;
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::structure_size;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

const QUERY_REQUEST_FIXED: usize = 40;
const QUERY_RESPONSE_FIXED: usize = 8;
const SET_REQUEST_FIXED: usize = 32;

/// Info type selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InfoType {
    File = 0x01,
    FileSystem = 0x02,
    Security = 0x03,
    Quota = 0x04,
}

impl TryFrom<u8> for InfoType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(InfoType::File),
            0x02 => Ok(InfoType::FileSystem),
            0x03 => Ok(InfoType::Security),
            0x04 => Ok(InfoType::Quota),
            _ => Err(Error::MalformedMessage(format!(
                "Invalid info type: {}",
                value
            ))),
        }
    }
}

/// File information classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FileInfoClass {
    DirectoryInformation = 0x01,
    BasicInformation = 0x04,
    StandardInformation = 0x05,
    RenameInformation = 0x0A,
    DispositionInformation = 0x0D,
    EndOfFileInformation = 0x14,
    NetworkOpenInformation = 0x22,
}

impl TryFrom<u8> for FileInfoClass {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(FileInfoClass::DirectoryInformation),
            0x04 => Ok(FileInfoClass::BasicInformation),
            0x05 => Ok(FileInfoClass::StandardInformation),
            0x0A => Ok(FileInfoClass::RenameInformation),
            0x0D => Ok(FileInfoClass::DispositionInformation),
            0x14 => Ok(FileInfoClass::EndOfFileInformation),
            0x22 => Ok(FileInfoClass::NetworkOpenInformation),
            _ => Err(Error::MalformedMessage(format!(
                "Unsupported file information class: {}",
                value
            ))),
        }
    }
}

/// SMB2 QueryInfo Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2QueryInfoRequest {
    pub info_type: InfoType,
    pub file_info_class: u8,
    pub output_buffer_length: u32,
    pub additional_information: u32,
    pub flags: u32,
    pub file_id: FileId,
    pub input_buffer: Vec<u8>,
}

impl Smb2QueryInfoRequest {
    pub fn file(file_id: FileId, class: FileInfoClass, output_buffer_length: u32) -> Self {
        Self {
            info_type: InfoType::File,
            file_info_class: class as u8,
            output_buffer_length,
            additional_information: 0,
            flags: 0,
            file_id,
            input_buffer: Vec::new(),
        }
    }
}

impl SmbMessage for Smb2QueryInfoRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, QUERY_REQUEST_FIXED, "QueryInfo request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::QUERY_INFO_REQUEST, "QueryInfo request")?;

        let info_type = InfoType::try_from(cursor.read_u8()?)?;
        let file_info_class = cursor.read_u8()?;
        let output_buffer_length = cursor.read_u32::<LittleEndian>()?;
        let input_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let input_length = cursor.read_u32::<LittleEndian>()? as usize;
        let additional_information = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;

        let input_buffer = variable_field(buf, input_offset, input_length, "query input")?.to_vec();

        Ok(Self {
            info_type,
            file_info_class,
            output_buffer_length,
            additional_information,
            flags,
            file_id,
            input_buffer,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::QUERY_INFO_REQUEST)?;
        buf.write_u8(self.info_type as u8)?;
        buf.write_u8(self.file_info_class)?;
        buf.write_u32::<LittleEndian>(self.output_buffer_length)?;
        let input_offset = if self.input_buffer.is_empty() {
            0
        } else {
            buffer_offset(QUERY_REQUEST_FIXED)
        };
        buf.write_u16::<LittleEndian>(input_offset as u16)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.input_buffer.len() as u32)?;
        buf.write_u32::<LittleEndian>(self.additional_information)?;
        buf.write_u32::<LittleEndian>(self.flags)?;
        self.file_id.write_to(&mut buf)?;
        if self.input_buffer.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&self.input_buffer)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        QUERY_REQUEST_FIXED + self.input_buffer.len().max(1)
    }
}

/// SMB2 QueryInfo Response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2QueryInfoResponse {
    pub output_buffer: Vec<u8>,
}

impl SmbMessage for Smb2QueryInfoResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, QUERY_RESPONSE_FIXED, "QueryInfo response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::QUERY_INFO_RESPONSE, "QueryInfo response")?;

        let offset = cursor.read_u16::<LittleEndian>()? as usize;
        let length = cursor.read_u32::<LittleEndian>()? as usize;
        let output_buffer = variable_field(buf, offset, length, "info buffer")?.to_vec();

        Ok(Self { output_buffer })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::QUERY_INFO_RESPONSE)?;
        buf.write_u16::<LittleEndian>(buffer_offset(QUERY_RESPONSE_FIXED) as u16)?;
        buf.write_u32::<LittleEndian>(self.output_buffer.len() as u32)?;
        if self.output_buffer.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&self.output_buffer)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        QUERY_RESPONSE_FIXED + self.output_buffer.len().max(1)
    }
}

/// SMB2 SetInfo Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SetInfoRequest {
    pub info_type: InfoType,
    pub file_info_class: u8,
    pub additional_information: u32,
    pub file_id: FileId,
    pub buffer: Vec<u8>,
}

impl Smb2SetInfoRequest {
    pub fn file(file_id: FileId, class: FileInfoClass, buffer: Vec<u8>) -> Self {
        Self {
            info_type: InfoType::File,
            file_info_class: class as u8,
            additional_information: 0,
            file_id,
            buffer,
        }
    }
}

impl SmbMessage for Smb2SetInfoRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, SET_REQUEST_FIXED, "SetInfo request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::SET_INFO_REQUEST, "SetInfo request")?;

        let info_type = InfoType::try_from(cursor.read_u8()?)?;
        let file_info_class = cursor.read_u8()?;
        let length = cursor.read_u32::<LittleEndian>()? as usize;
        let offset = cursor.read_u16::<LittleEndian>()? as usize;
        let _reserved = cursor.read_u16::<LittleEndian>()?;
        let additional_information = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;

        let buffer = variable_field(buf, offset, length, "set info buffer")?.to_vec();

        Ok(Self {
            info_type,
            file_info_class,
            additional_information,
            file_id,
            buffer,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::SET_INFO_REQUEST)?;
        buf.write_u8(self.info_type as u8)?;
        buf.write_u8(self.file_info_class)?;
        buf.write_u32::<LittleEndian>(self.buffer.len() as u32)?;
        buf.write_u16::<LittleEndian>(buffer_offset(SET_REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(self.additional_information)?;
        self.file_id.write_to(&mut buf)?;
        if self.buffer.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&self.buffer)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        SET_REQUEST_FIXED + self.buffer.len().max(1)
    }
}

/// SMB2 SetInfo Response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Smb2SetInfoResponse;

impl SmbMessage for Smb2SetInfoResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 2, "SetInfo response")?;
        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(&mut cursor, structure_size::SET_INFO_RESPONSE, "SetInfo response")?;
        Ok(Self)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(2);
        buf.write_u16::<LittleEndian>(structure_size::SET_INFO_RESPONSE)?;
        Ok(buf)
    }

    fn size(&self) -> usize {
        2
    }
}

/// FileNetworkOpenInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileNetworkOpenInformation {
    pub stat: FileStat,
}

impl FileNetworkOpenInformation {
    pub const SIZE: usize = FileStat::SIZE + 4;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, Self::SIZE, "FileNetworkOpenInformation")?;
        let mut cursor = io::Cursor::new(buf);
        let stat = FileStat::read_from(&mut cursor)?;
        Ok(Self { stat })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.stat.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(0)?;
        Ok(buf)
    }
}

/// FileRenameInformation (SMB2 layout)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRenameInformation {
    pub replace_if_exists: bool,
    /// Destination, relative to the share root
    pub file_name: String,
}

impl FileRenameInformation {
    const FIXED: usize = 20;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, Self::FIXED, "FileRenameInformation")?;
        let mut cursor = io::Cursor::new(buf);
        let replace_if_exists = cursor.read_u8()? != 0;
        let mut reserved = [0u8; 7];
        io::Read::read_exact(&mut cursor, &mut reserved)?;
        let _root_directory = cursor.read_u64::<LittleEndian>()?;
        let name_length = cursor.read_u32::<LittleEndian>()? as usize;

        let name = buf
            .get(Self::FIXED..Self::FIXED + name_length)
            .ok_or_else(|| Error::MalformedMessage("rename target extends beyond buffer".into()))?;

        Ok(Self {
            replace_if_exists,
            file_name: utf16le_decode(name)?,
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16le_encode(&self.file_name);
        let mut buf = Vec::with_capacity(Self::FIXED + name.len());
        buf.write_u8(u8::from(self.replace_if_exists))?;
        buf.write_all(&[0u8; 7])?;
        buf.write_u64::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(name.len() as u32)?;
        buf.write_all(&name)?;
        Ok(buf)
    }
}

/// FileDispositionInformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileDispositionInformation {
    pub delete_pending: bool,
}

impl FileDispositionInformation {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, 1, "FileDispositionInformation")?;
        Ok(Self {
            delete_pending: buf[0] != 0,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        vec![u8::from(self.delete_pending)]
    }
}
