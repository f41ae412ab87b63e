//! Connection-oriented DCE/RPC PDUs

use crate::error::{Error, Result};
use crate::protocol::messages::common::require_len;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use uuid::Uuid;

pub const RPC_VERSION_MAJOR: u8 = 5;
pub const RPC_VERSION_MINOR: u8 = 0;

/// Common header of every PDU
pub const HEADER_LEN: usize = 16;

/// Header plus alloc hint, context ID and opnum (or cancel count)
pub const CALL_HEADER_LEN: usize = 24;

/// Little-endian integers, ASCII characters, IEEE floats
const DATA_REPRESENTATION: [u8; 4] = [0x10, 0, 0, 0];

/// NDR20 transfer syntax
pub const NDR_SYNTAX: SyntaxId = SyntaxId {
    uuid: uuid::uuid!("8A885D04-1CEB-11C9-9FE8-08002B104860"),
    version_major: 2,
    version_minor: 0,
};

/// PDU types the client sends or expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Request = 0,
    Response = 2,
    Fault = 3,
    Bind = 11,
    BindAck = 12,
    BindNak = 13,
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PacketType::Request),
            2 => Ok(PacketType::Response),
            3 => Ok(PacketType::Fault),
            11 => Ok(PacketType::Bind),
            12 => Ok(PacketType::BindAck),
            13 => Ok(PacketType::BindNak),
            other => Err(Error::MalformedMessage(format!(
                "unknown RPC packet type {}",
                other
            ))),
        }
    }
}

bitflags! {
    /// PDU flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const FIRST_FRAG = 0x01;
        const LAST_FRAG = 0x02;
    }
}

/// Interface identifier plus version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxId {
    pub uuid: Uuid,
    pub version_major: u16,
    pub version_minor: u16,
}

impl SyntaxId {
    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.uuid.to_bytes_le());
        buf.write_u16::<LittleEndian>(self.version_major)?;
        buf.write_u16::<LittleEndian>(self.version_minor)?;
        Ok(())
    }

    fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let mut uuid = [0u8; 16];
        cursor.read_exact(&mut uuid)?;
        Ok(Self {
            uuid: Uuid::from_bytes_le(uuid),
            version_major: cursor.read_u16::<LittleEndian>()?,
            version_minor: cursor.read_u16::<LittleEndian>()?,
        })
    }
}

/// Common PDU header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHeader {
    pub packet_type: PacketType,
    pub flags: PacketFlags,
    pub frag_length: u16,
    pub auth_length: u16,
    pub call_id: u32,
}

impl RpcHeader {
    pub fn new(packet_type: PacketType, call_id: u32) -> Self {
        Self {
            packet_type,
            flags: PacketFlags::FIRST_FRAG | PacketFlags::LAST_FRAG,
            frag_length: 0,
            auth_length: 0,
            call_id,
        }
    }

    pub fn is_last(&self) -> bool {
        self.flags.contains(PacketFlags::LAST_FRAG)
    }

    /// Written with a zero fragment length; [`finish`] patches it
    fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u8(RPC_VERSION_MAJOR)?;
        buf.write_u8(RPC_VERSION_MINOR)?;
        buf.write_u8(self.packet_type as u8)?;
        buf.write_u8(self.flags.bits())?;
        buf.extend_from_slice(&DATA_REPRESENTATION);
        buf.write_u16::<LittleEndian>(self.frag_length)?;
        buf.write_u16::<LittleEndian>(self.auth_length)?;
        buf.write_u32::<LittleEndian>(self.call_id)?;
        Ok(())
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        require_len(buf, HEADER_LEN, "RPC header")?;
        if buf[0] != RPC_VERSION_MAJOR || buf[1] != RPC_VERSION_MINOR {
            return Err(Error::MalformedMessage(format!(
                "RPC version {}.{}",
                buf[0], buf[1]
            )));
        }
        if buf[4] & 0xF0 != DATA_REPRESENTATION[0] {
            return Err(Error::MalformedMessage(
                "big-endian RPC data representation".into(),
            ));
        }
        let mut cursor = Cursor::new(&buf[8..HEADER_LEN]);
        let header = Self {
            packet_type: PacketType::try_from(buf[2])?,
            flags: PacketFlags::from_bits_retain(buf[3]),
            frag_length: cursor.read_u16::<LittleEndian>()?,
            auth_length: cursor.read_u16::<LittleEndian>()?,
            call_id: cursor.read_u32::<LittleEndian>()?,
        };
        if (header.frag_length as usize) < HEADER_LEN {
            return Err(Error::MalformedMessage(format!(
                "RPC fragment length {}",
                header.frag_length
            )));
        }
        Ok(header)
    }
}

/// Fragment length of the PDU at the start of `buf`, once its header is in
pub fn frag_length(buf: &[u8]) -> Option<usize> {
    (buf.len() >= 10).then(|| u16::from_le_bytes([buf[8], buf[9]]) as usize)
}

fn finish(mut buf: Vec<u8>) -> Result<Vec<u8>> {
    let len = u16::try_from(buf.len())
        .map_err(|_| Error::InvalidParameter(format!("RPC fragment of {} bytes", buf.len())))?;
    buf[8..10].copy_from_slice(&len.to_le_bytes());
    Ok(buf)
}

/// Split a stub into per-fragment pieces with their FIRST/LAST flags
pub fn fragments(stub: &[u8], max_frag: u16) -> Vec<(PacketFlags, &[u8])> {
    let room = (max_frag as usize).saturating_sub(CALL_HEADER_LEN).max(8);
    if stub.is_empty() {
        return vec![(PacketFlags::FIRST_FRAG | PacketFlags::LAST_FRAG, stub)];
    }
    let count = stub.chunks(room).count();
    stub.chunks(room)
        .enumerate()
        .map(|(index, piece)| {
            let mut flags = PacketFlags::empty();
            if index == 0 {
                flags |= PacketFlags::FIRST_FRAG;
            }
            if index + 1 == count {
                flags |= PacketFlags::LAST_FRAG;
            }
            (flags, piece)
        })
        .collect()
}

/// BIND: one presentation context, NDR20 only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindPacket {
    pub call_id: u32,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group: u32,
    pub context_id: u16,
    pub abstract_syntax: SyntaxId,
    pub transfer_syntax: SyntaxId,
}

impl BindPacket {
    pub fn new(call_id: u32, context_id: u16, abstract_syntax: SyntaxId, max_frag: u16) -> Self {
        Self {
            call_id,
            max_xmit_frag: max_frag,
            max_recv_frag: max_frag,
            assoc_group: 0,
            context_id,
            abstract_syntax,
            transfer_syntax: NDR_SYNTAX,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(72);
        RpcHeader::new(PacketType::Bind, self.call_id).write_to(&mut buf)?;
        buf.write_u16::<LittleEndian>(self.max_xmit_frag)?;
        buf.write_u16::<LittleEndian>(self.max_recv_frag)?;
        buf.write_u32::<LittleEndian>(self.assoc_group)?;
        buf.write_u8(1)?;
        buf.extend_from_slice(&[0; 3]);
        buf.write_u16::<LittleEndian>(self.context_id)?;
        buf.write_u8(1)?;
        buf.write_u8(0)?;
        self.abstract_syntax.write_to(&mut buf)?;
        self.transfer_syntax.write_to(&mut buf)?;
        finish(buf)
    }

    #[cfg(test)]
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = RpcHeader::parse(buf)?;
        require_len(buf, 72, "RPC bind")?;
        let mut cursor = Cursor::new(&buf[HEADER_LEN..]);
        let max_xmit_frag = cursor.read_u16::<LittleEndian>()?;
        let max_recv_frag = cursor.read_u16::<LittleEndian>()?;
        let assoc_group = cursor.read_u32::<LittleEndian>()?;
        let _contexts = cursor.read_u32::<LittleEndian>()?;
        let context_id = cursor.read_u16::<LittleEndian>()?;
        let _syntaxes = cursor.read_u16::<LittleEndian>()?;
        Ok(Self {
            call_id: header.call_id,
            max_xmit_frag,
            max_recv_frag,
            assoc_group,
            context_id,
            abstract_syntax: SyntaxId::read_from(&mut cursor)?,
            transfer_syntax: SyntaxId::read_from(&mut cursor)?,
        })
    }
}

/// BIND_ACK with its first presentation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAck {
    pub call_id: u32,
    pub max_xmit_frag: u16,
    pub max_recv_frag: u16,
    pub assoc_group: u32,
    pub secondary_address: String,
    /// 0 accepted, 1 user rejection, 2 provider rejection
    pub result: u16,
    pub reason: u16,
    pub transfer_syntax: SyntaxId,
}

impl BindAck {
    pub fn accepted(&self) -> bool {
        self.result == 0
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = RpcHeader::parse(buf)?;
        require_len(buf, HEADER_LEN + 10, "RPC bind ack")?;
        let mut cursor = Cursor::new(buf);
        cursor.set_position(HEADER_LEN as u64);
        let max_xmit_frag = cursor.read_u16::<LittleEndian>()?;
        let max_recv_frag = cursor.read_u16::<LittleEndian>()?;
        let assoc_group = cursor.read_u32::<LittleEndian>()?;
        let address_len = cursor.read_u16::<LittleEndian>()? as usize;

        // results start 4-aligned from the PDU start
        let address_end = HEADER_LEN + 10 + address_len;
        let results_at = (address_end + 3) & !3;
        require_len(buf, results_at + 28, "RPC bind ack results")?;
        let address = &buf[HEADER_LEN + 10..address_end];
        let address = address.split(|&b| b == 0).next().unwrap_or(&[]);
        cursor.set_position(results_at as u64);

        let results = cursor.read_u8()?;
        if results == 0 {
            return Err(Error::MalformedMessage("bind ack without results".into()));
        }
        cursor.set_position(results_at as u64 + 4);
        Ok(Self {
            call_id: header.call_id,
            max_xmit_frag,
            max_recv_frag,
            assoc_group,
            secondary_address: String::from_utf8_lossy(address).into_owned(),
            result: cursor.read_u16::<LittleEndian>()?,
            reason: cursor.read_u16::<LittleEndian>()?,
            transfer_syntax: SyntaxId::read_from(&mut cursor)?,
        })
    }

    #[cfg(test)]
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        RpcHeader::new(PacketType::BindAck, self.call_id).write_to(&mut buf)?;
        buf.write_u16::<LittleEndian>(self.max_xmit_frag)?;
        buf.write_u16::<LittleEndian>(self.max_recv_frag)?;
        buf.write_u32::<LittleEndian>(self.assoc_group)?;
        let mut address = self.secondary_address.as_bytes().to_vec();
        address.push(0);
        buf.write_u16::<LittleEndian>(address.len() as u16)?;
        buf.extend_from_slice(&address);
        buf.resize((buf.len() + 3) & !3, 0);
        buf.write_u8(1)?;
        buf.extend_from_slice(&[0; 3]);
        buf.write_u16::<LittleEndian>(self.result)?;
        buf.write_u16::<LittleEndian>(self.reason)?;
        self.transfer_syntax.write_to(&mut buf)?;
        finish(buf)
    }
}

/// Reject reason carried by a BIND_NAK
pub fn parse_bind_nak(buf: &[u8]) -> Result<u16> {
    RpcHeader::parse(buf)?;
    require_len(buf, HEADER_LEN + 2, "RPC bind nak")?;
    Ok(u16::from_le_bytes([buf[HEADER_LEN], buf[HEADER_LEN + 1]]))
}

/// One REQUEST fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    pub call_id: u32,
    pub flags: PacketFlags,
    /// Size of the whole stub across fragments
    pub alloc_hint: u32,
    pub context_id: u16,
    pub opnum: u16,
    pub stub: Vec<u8>,
}

impl RequestPacket {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(CALL_HEADER_LEN + self.stub.len());
        let mut header = RpcHeader::new(PacketType::Request, self.call_id);
        header.flags = self.flags;
        header.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.alloc_hint)?;
        buf.write_u16::<LittleEndian>(self.context_id)?;
        buf.write_u16::<LittleEndian>(self.opnum)?;
        buf.extend_from_slice(&self.stub);
        finish(buf)
    }

    #[cfg(test)]
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = RpcHeader::parse(buf)?;
        let end = header.frag_length as usize;
        require_len(buf, end.max(CALL_HEADER_LEN), "RPC request")?;
        let mut cursor = Cursor::new(&buf[HEADER_LEN..CALL_HEADER_LEN]);
        Ok(Self {
            call_id: header.call_id,
            flags: header.flags,
            alloc_hint: cursor.read_u32::<LittleEndian>()?,
            context_id: cursor.read_u16::<LittleEndian>()?,
            opnum: cursor.read_u16::<LittleEndian>()?,
            stub: buf[CALL_HEADER_LEN..end].to_vec(),
        })
    }
}

/// One RESPONSE fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePacket {
    pub header: RpcHeader,
    pub alloc_hint: u32,
    pub context_id: u16,
    pub stub: Vec<u8>,
}

impl ResponsePacket {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let header = RpcHeader::parse(buf)?;
        let end = header.frag_length as usize;
        require_len(buf, end, "RPC response")?;
        if end < CALL_HEADER_LEN {
            return Err(Error::MalformedMessage(format!(
                "RPC response fragment of {} bytes",
                end
            )));
        }
        let mut cursor = Cursor::new(&buf[HEADER_LEN..CALL_HEADER_LEN]);
        let alloc_hint = cursor.read_u32::<LittleEndian>()?;
        let context_id = cursor.read_u16::<LittleEndian>()?;
        let stub_end = end.saturating_sub(header.auth_length as usize);
        Ok(Self {
            header,
            alloc_hint,
            context_id,
            stub: buf[CALL_HEADER_LEN..stub_end.max(CALL_HEADER_LEN)].to_vec(),
        })
    }

    #[cfg(test)]
    pub fn serialize(
        call_id: u32,
        flags: PacketFlags,
        alloc_hint: u32,
        context_id: u16,
        stub: &[u8],
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(CALL_HEADER_LEN + stub.len());
        let mut header = RpcHeader::new(PacketType::Response, call_id);
        header.flags = flags;
        header.write_to(&mut buf)?;
        buf.write_u32::<LittleEndian>(alloc_hint)?;
        buf.write_u16::<LittleEndian>(context_id)?;
        buf.write_u8(0)?;
        buf.write_u8(0)?;
        buf.extend_from_slice(stub);
        finish(buf)
    }
}

/// Status carried by a FAULT
pub fn parse_fault(buf: &[u8]) -> Result<u32> {
    RpcHeader::parse(buf)?;
    require_len(buf, CALL_HEADER_LEN + 4, "RPC fault")?;
    let at = CALL_HEADER_LEN;
    Ok(u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]))
}

#[cfg(test)]
pub fn serialize_fault(call_id: u32, status: u32) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32);
    RpcHeader::new(PacketType::Fault, call_id).write_to(&mut buf)?;
    buf.write_u32::<LittleEndian>(0)?;
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u32::<LittleEndian>(status)?;
    buf.write_u32::<LittleEndian>(0)?;
    finish(buf)
}
