//! Server service (srvsvc): share enumeration

use super::ndr::{NdrDecoder, NdrEncoder};
use super::packet::SyntaxId;
use super::{RpcClient, RpcInterface};
use crate::error::{Error, Result};

pub const SRVSVC: RpcInterface = RpcInterface {
    name: "srvsvc",
    syntax: SyntaxId {
        uuid: uuid::uuid!("4B324FC8-1670-01D3-1278-5A47BF6EE188"),
        version_major: 3,
        version_minor: 0,
    },
};

/// Pipe the service listens on, relative to IPC$
pub const PIPE_NAME: &str = "srvsvc";

const OP_NETR_SHARE_ENUM: u16 = 15;

/// No limit on the returned buffer
const MAX_PREFERRED_LENGTH: u32 = 0xFFFF_FFFF;

/// Administrative share created by the server
pub const STYPE_SPECIAL: u32 = 0x8000_0000;
pub const STYPE_TEMPORARY: u32 = 0x4000_0000;
const STYPE_MASK: u32 = 0x0FFF_FFFF;

/// Share type without the special and temporary bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareKind {
    Disk,
    PrintQueue,
    Device,
    Ipc,
}

/// SHARE_INFO_1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo1 {
    pub name: String,
    pub share_type: u32,
    pub comment: String,
}

impl ShareInfo1 {
    pub fn kind(&self) -> Option<ShareKind> {
        match self.share_type & STYPE_MASK {
            0 => Some(ShareKind::Disk),
            1 => Some(ShareKind::PrintQueue),
            2 => Some(ShareKind::Device),
            3 => Some(ShareKind::Ipc),
            _ => None,
        }
    }

    pub fn is_special(&self) -> bool {
        self.share_type & STYPE_SPECIAL != 0
    }
}

/// NetrShareEnum at information level 1
pub async fn net_share_enum(client: &mut RpcClient, server_name: &str) -> Result<Vec<ShareInfo1>> {
    let stub = encode_share_enum_request(server_name)?;
    let reply = client.call(OP_NETR_SHARE_ENUM, &stub).await?;
    decode_share_enum_response(&reply)
}

pub fn encode_share_enum_request(server_name: &str) -> Result<Vec<u8>> {
    let mut encoder = NdrEncoder::new();
    let unc = format!("\\\\{}", server_name.trim_start_matches('\\'));
    encoder.encode_unique_string(Some(&unc))?;
    // SHARE_ENUM_STRUCT: level, union arm, container with no entries yet
    encoder.encode_u32(1)?;
    encoder.encode_u32(1)?;
    encoder.encode_pointer(true)?;
    encoder.encode_u32(0)?;
    encoder.encode_pointer(false)?;
    encoder.encode_u32(MAX_PREFERRED_LENGTH)?;
    // resume handle
    encoder.encode_pointer(true)?;
    encoder.encode_u32(0)?;
    Ok(encoder.into_bytes())
}

pub fn decode_share_enum_response(stub: &[u8]) -> Result<Vec<ShareInfo1>> {
    let mut decoder = NdrDecoder::new(stub);
    let level = decoder.decode_u32()?;
    let arm = decoder.decode_u32()?;
    if level != 1 || arm != 1 {
        return Err(Error::MalformedMessage(format!(
            "share enum answered level {} arm {}",
            level, arm
        )));
    }

    let mut shares = Vec::new();
    if decoder.decode_pointer()? {
        let count = decoder.decode_u32()? as usize;
        if decoder.decode_pointer()? {
            let max_count = decoder.decode_u32()? as usize;
            // each fixed entry is three 4-byte fields
            if max_count < count || count * 12 > decoder.remaining() {
                return Err(Error::MalformedMessage(format!(
                    "share array of {} entries (max {})",
                    count, max_count
                )));
            }
            let mut fixed = Vec::with_capacity(count);
            for _ in 0..count {
                let has_name = decoder.decode_pointer()?;
                let share_type = decoder.decode_u32()?;
                let has_comment = decoder.decode_pointer()?;
                fixed.push((has_name, share_type, has_comment));
            }
            for (has_name, share_type, has_comment) in fixed {
                let name = if has_name { decoder.decode_string()? } else { String::new() };
                let comment = if has_comment {
                    decoder.decode_string()?
                } else {
                    String::new()
                };
                shares.push(ShareInfo1 {
                    name,
                    share_type,
                    comment,
                });
            }
        }
    }

    let _total_entries = decoder.decode_u32()?;
    if decoder.decode_pointer()? {
        let _resume = decoder.decode_u32()?;
    }
    let status = decoder.decode_u32()?;
    if status != 0 {
        return Err(Error::Rpc(format!("NetrShareEnum returned WERROR {}", status)));
    }
    Ok(shares)
}

/// Server name and level from a NetrShareEnum request
#[cfg(test)]
pub fn decode_share_enum_request(stub: &[u8]) -> Result<(Option<String>, u32)> {
    let mut decoder = NdrDecoder::new(stub);
    let server = decoder.decode_unique_string()?;
    let level = decoder.decode_u32()?;
    Ok((server, level))
}

#[cfg(test)]
pub fn encode_share_enum_response(shares: &[ShareInfo1], status: u32) -> Result<Vec<u8>> {
    let mut encoder = NdrEncoder::new();
    encoder.encode_u32(1)?;
    encoder.encode_u32(1)?;
    encoder.encode_pointer(true)?;
    encoder.encode_u32(shares.len() as u32)?;
    encoder.encode_pointer(true)?;
    encoder.encode_u32(shares.len() as u32)?;
    for share in shares {
        encoder.encode_pointer(true)?;
        encoder.encode_u32(share.share_type)?;
        encoder.encode_pointer(true)?;
    }
    for share in shares {
        encoder.encode_string(&share.name)?;
        encoder.encode_string(&share.comment)?;
    }
    encoder.encode_u32(shares.len() as u32)?;
    encoder.encode_pointer(false)?;
    encoder.encode_u32(status)?;
    Ok(encoder.into_bytes())
}
