//! SMB2 Query Directory messages and directory entry records

use super::common::{
    buffer_offset, expect_structure_size, require_len, utf16le_decode, utf16le_encode,
    variable_field, FileId, SmbMessage,
};
use super::info::FileInfoClass;
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::{structure_size, FileAttributes};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Write};

const REQUEST_FIXED: usize = 32;
const RESPONSE_FIXED: usize = 8;

/// SMB2 QueryDirectory Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2QueryDirectoryRequest {
    pub file_information_class: FileInfoClass,
    pub flags: u8,
    pub file_index: u32,
    pub file_id: FileId,
    /// Search pattern, `*` for everything
    pub file_name: String,
    pub output_buffer_length: u32,
}

impl Smb2QueryDirectoryRequest {
    pub fn new(file_id: FileId, pattern: impl Into<String>, output_buffer_length: u32) -> Self {
        Self {
            file_information_class: FileInfoClass::DirectoryInformation,
            flags: 0,
            file_index: 0,
            file_id,
            file_name: pattern.into(),
            output_buffer_length,
        }
    }
}

impl SmbMessage for Smb2QueryDirectoryRequest {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, REQUEST_FIXED, "QueryDirectory request")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(
            &mut cursor,
            structure_size::QUERY_DIRECTORY_REQUEST,
            "QueryDirectory request",
        )?;

        let file_information_class = FileInfoClass::try_from(cursor.read_u8()?)?;
        let flags = cursor.read_u8()?;
        let file_index = cursor.read_u32::<LittleEndian>()?;
        let file_id = FileId::read_from(&mut cursor)?;
        let name_offset = cursor.read_u16::<LittleEndian>()? as usize;
        let name_length = cursor.read_u16::<LittleEndian>()? as usize;
        let output_buffer_length = cursor.read_u32::<LittleEndian>()?;

        let file_name = utf16le_decode(variable_field(buf, name_offset, name_length, "search pattern")?)?;

        Ok(Self {
            file_information_class,
            flags,
            file_index,
            file_id,
            file_name,
            output_buffer_length,
        })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let name = utf16le_encode(&self.file_name);
        let mut buf = Vec::with_capacity(REQUEST_FIXED + name.len().max(1));
        buf.write_u16::<LittleEndian>(structure_size::QUERY_DIRECTORY_REQUEST)?;
        buf.write_u8(self.file_information_class as u8)?;
        buf.write_u8(self.flags)?;
        buf.write_u32::<LittleEndian>(self.file_index)?;
        self.file_id.write_to(&mut buf)?;
        buf.write_u16::<LittleEndian>(buffer_offset(REQUEST_FIXED) as u16)?;
        buf.write_u16::<LittleEndian>(name.len() as u16)?;
        buf.write_u32::<LittleEndian>(self.output_buffer_length)?;
        if name.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&name)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        REQUEST_FIXED + (self.file_name.encode_utf16().count() * 2).max(1)
    }
}

/// SMB2 QueryDirectory Response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Smb2QueryDirectoryResponse {
    pub output_buffer: Vec<u8>,
}

impl SmbMessage for Smb2QueryDirectoryResponse {
    fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, RESPONSE_FIXED, "QueryDirectory response")?;

        let mut cursor = io::Cursor::new(buf);
        expect_structure_size(
            &mut cursor,
            structure_size::QUERY_DIRECTORY_RESPONSE,
            "QueryDirectory response",
        )?;

        let offset = cursor.read_u16::<LittleEndian>()? as usize;
        let length = cursor.read_u32::<LittleEndian>()? as usize;
        let output_buffer = variable_field(buf, offset, length, "directory buffer")?.to_vec();

        Ok(Self { output_buffer })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.size());
        buf.write_u16::<LittleEndian>(structure_size::QUERY_DIRECTORY_RESPONSE)?;
        buf.write_u16::<LittleEndian>(buffer_offset(RESPONSE_FIXED) as u16)?;
        buf.write_u32::<LittleEndian>(self.output_buffer.len() as u32)?;
        if self.output_buffer.is_empty() {
            buf.push(0);
        } else {
            buf.write_all(&self.output_buffer)?;
        }
        Ok(buf)
    }

    fn size(&self) -> usize {
        RESPONSE_FIXED + self.output_buffer.len().max(1)
    }
}

/// One FileDirectoryInformation record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDirectoryInformation {
    pub file_index: u32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub end_of_file: u64,
    pub allocation_size: u64,
    pub attributes: FileAttributes,
    pub file_name: String,
}

impl FileDirectoryInformation {
    const FIXED: usize = 64;

    /// Parse a packed chain of records linked by NextEntryOffset
    pub fn parse_all(buf: &[u8]) -> Result<Vec<Self>> {
        let mut entries = Vec::new();
        let mut start = 0usize;

        while start < buf.len() {
            let record = &buf[start..];
            require_len(record, Self::FIXED, "directory entry")?;

            let mut cursor = io::Cursor::new(record);
            let next_entry_offset = cursor.read_u32::<LittleEndian>()? as usize;
            let file_index = cursor.read_u32::<LittleEndian>()?;
            let creation_time = cursor.read_u64::<LittleEndian>()?;
            let last_access_time = cursor.read_u64::<LittleEndian>()?;
            let last_write_time = cursor.read_u64::<LittleEndian>()?;
            let change_time = cursor.read_u64::<LittleEndian>()?;
            let end_of_file = cursor.read_u64::<LittleEndian>()?;
            let allocation_size = cursor.read_u64::<LittleEndian>()?;
            let attributes = FileAttributes::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
            let name_length = cursor.read_u32::<LittleEndian>()? as usize;

            let name_end = Self::FIXED
                .checked_add(name_length)
                .filter(|end| *end <= record.len())
                .ok_or_else(|| {
                    Error::MalformedMessage("directory entry name extends beyond buffer".into())
                })?;
            let file_name = utf16le_decode(&record[Self::FIXED..name_end])?;

            entries.push(Self {
                file_index,
                creation_time,
                last_access_time,
                last_write_time,
                change_time,
                end_of_file,
                allocation_size,
                attributes,
                file_name,
            });

            if next_entry_offset == 0 {
                break;
            }
            if next_entry_offset < name_end {
                return Err(Error::MalformedMessage(format!(
                    "directory entry offset {} overlaps previous entry",
                    next_entry_offset
                )));
            }
            start += next_entry_offset;
        }

        Ok(entries)
    }

    /// Pack records into a chain, each aligned to 8 bytes
    pub fn serialize_all(entries: &[Self]) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for (i, entry) in entries.iter().enumerate() {
            let name = utf16le_encode(&entry.file_name);
            let len = Self::FIXED + name.len();
            let next = if i + 1 == entries.len() {
                0
            } else {
                (len + 7) & !7
            };

            buf.write_u32::<LittleEndian>(next as u32)?;
            buf.write_u32::<LittleEndian>(entry.file_index)?;
            buf.write_u64::<LittleEndian>(entry.creation_time)?;
            buf.write_u64::<LittleEndian>(entry.last_access_time)?;
            buf.write_u64::<LittleEndian>(entry.last_write_time)?;
            buf.write_u64::<LittleEndian>(entry.change_time)?;
            buf.write_u64::<LittleEndian>(entry.end_of_file)?;
            buf.write_u64::<LittleEndian>(entry.allocation_size)?;
            buf.write_u32::<LittleEndian>(entry.attributes.bits())?;
            buf.write_u32::<LittleEndian>(name.len() as u32)?;
            buf.write_all(&name)?;
            if next > len {
                buf.resize(buf.len() + next - len, 0);
            }
        }
        Ok(buf)
    }

    /// Serialized length of this record without trailing alignment
    pub fn encoded_len(&self) -> usize {
        Self::FIXED + self.file_name.encode_utf16().count() * 2
    }
}
