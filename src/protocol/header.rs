//! SMB2 protocol header

use super::smb2_constants::*;
use crate::error::{Error, NtStatus, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read};

/// Byte range of the signature inside the header
pub const SIGNATURE_OFFSET: usize = 48;
pub const SIGNATURE_LEN: usize = 16;

/// SMB2 sync header (64 bytes)
///
/// For async responses the process ID and tree ID fields carry the async ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub credit_charge: u16,
    pub status: u32,
    pub command: Smb2Command,
    pub credits: u16,
    pub flags: Smb2HeaderFlags,
    pub next_command: u32,
    pub message_id: u64,
    pub process_id: u32,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    pub const SIZE: usize = SMB2_HEADER_SIZE;

    pub fn new(command: Smb2Command) -> Self {
        Self {
            credit_charge: 0,
            status: 0,
            command,
            credits: 1,
            flags: Smb2HeaderFlags::empty(),
            next_command: 0,
            message_id: 0,
            process_id: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    /// Header for a response to `request`
    pub fn response_to(request: &Smb2Header, status: NtStatus) -> Self {
        Self {
            credit_charge: request.credit_charge,
            status: status.to_u32(),
            command: request.command,
            credits: request.credits.max(1),
            flags: Smb2HeaderFlags::SERVER_TO_REDIR,
            next_command: 0,
            message_id: request.message_id,
            process_id: request.process_id,
            tree_id: request.tree_id,
            session_id: request.session_id,
            signature: [0; 16],
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::MalformedMessage(format!(
                "header needs {} bytes, have {}",
                Self::SIZE,
                buf.len()
            )));
        }

        if buf[0..4] != SMB2_MAGIC {
            return Err(Error::MalformedMessage(format!(
                "Invalid protocol ID: {:02x?}",
                &buf[0..4]
            )));
        }

        let mut cursor = io::Cursor::new(&buf[4..Self::SIZE]);
        let structure_size = cursor.read_u16::<LittleEndian>()?;
        if structure_size != structure_size::HEADER {
            return Err(Error::MalformedMessage(format!(
                "Invalid header structure size: {}",
                structure_size
            )));
        }

        let credit_charge = cursor.read_u16::<LittleEndian>()?;
        let status = cursor.read_u32::<LittleEndian>()?;
        let command = Smb2Command::try_from(cursor.read_u16::<LittleEndian>()?)?;
        let credits = cursor.read_u16::<LittleEndian>()?;
        let flags = Smb2HeaderFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let next_command = cursor.read_u32::<LittleEndian>()?;
        let message_id = cursor.read_u64::<LittleEndian>()?;
        let process_id = cursor.read_u32::<LittleEndian>()?;
        let tree_id = cursor.read_u32::<LittleEndian>()?;
        let session_id = cursor.read_u64::<LittleEndian>()?;

        let mut signature = [0u8; 16];
        cursor.read_exact(&mut signature)?;

        Ok(Self {
            credit_charge,
            status,
            command,
            credits,
            flags,
            next_command,
            message_id,
            process_id,
            tree_id,
            session_id,
            signature,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&SMB2_MAGIC);
        buf.write_u16::<LittleEndian>(structure_size::HEADER)?;
        buf.write_u16::<LittleEndian>(self.credit_charge)?;
        buf.write_u32::<LittleEndian>(self.status)?;
        buf.write_u16::<LittleEndian>(self.command.to_u16())?;
        buf.write_u16::<LittleEndian>(self.credits)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.write_u32::<LittleEndian>(self.next_command)?;
        buf.write_u64::<LittleEndian>(self.message_id)?;
        buf.write_u32::<LittleEndian>(self.process_id)?;
        buf.write_u32::<LittleEndian>(self.tree_id)?;
        buf.write_u64::<LittleEndian>(self.session_id)?;
        buf.extend_from_slice(&self.signature);
        Ok(())
    }

    pub fn nt_status(&self) -> NtStatus {
        NtStatus::from_u32(self.status)
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::SERVER_TO_REDIR)
    }

    pub fn is_async(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::ASYNC_COMMAND)
    }

    pub fn is_signed(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::SIGNED)
    }

    /// Async ID of an async header
    pub fn async_id(&self) -> Option<u64> {
        self.is_async()
            .then(|| (u64::from(self.tree_id) << 32) | u64::from(self.process_id))
    }

    /// Interim response announcing that the final one will follow
    pub fn is_interim(&self) -> bool {
        self.is_response() && self.is_async() && self.nt_status() == NtStatus::Pending
    }
}
