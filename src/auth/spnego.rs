//! Minimal SPNEGO (RFC 4178) framing around NTLMSSP tokens
//!
//! Only the shapes exchanged during an NTLM handshake are produced: the
//! initial `negTokenInit` offering NTLM, and `negTokenResp` carrying a
//! response token and optionally a negotiation result.

use crate::error::{Error, Result};

/// SPNEGO mechanism OID 1.3.6.1.5.5.2
const SPNEGO_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x05, 0x05, 0x02];

/// NTLMSSP mechanism OID 1.3.6.1.4.1.311.2.2.10
const NTLMSSP_OID: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x02, 0x0a];

const NTLMSSP_MAGIC: &[u8] = b"NTLMSSP\0";

/// negResult values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegResult {
    AcceptCompleted,
    AcceptIncomplete,
    Reject,
    RequestMic,
}

impl NegResult {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(NegResult::AcceptCompleted),
            1 => Some(NegResult::AcceptIncomplete),
            2 => Some(NegResult::Reject),
            3 => Some(NegResult::RequestMic),
            _ => None,
        }
    }

    #[cfg(test)]
    fn to_u8(self) -> u8 {
        match self {
            NegResult::AcceptCompleted => 0,
            NegResult::AcceptIncomplete => 1,
            NegResult::Reject => 2,
            NegResult::RequestMic => 3,
        }
    }
}

fn push_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xff {
        out.push(0x81);
        out.push(len as u8);
    } else if len <= 0xffff {
        out.push(0x82);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(0x83);
        out.extend_from_slice(&(len as u32).to_be_bytes()[1..]);
    }
}

fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len() + 6);
    out.push(tag);
    push_length(&mut out, content.len());
    out.extend_from_slice(content);
    out
}

fn mech_type_list() -> Vec<u8> {
    tlv(0x30, &tlv(0x06, NTLMSSP_OID))
}

/// Wrap the NTLM NEGOTIATE message in a `negTokenInit`
pub fn wrap_neg_token_init(ntlm_token: &[u8]) -> Vec<u8> {
    let mut fields = tlv(0xa0, &mech_type_list());
    fields.extend_from_slice(&tlv(0xa2, &tlv(0x04, ntlm_token)));
    let neg_token_init = tlv(0xa0, &tlv(0x30, &fields));

    let mut content = tlv(0x06, SPNEGO_OID);
    content.extend_from_slice(&neg_token_init);
    tlv(0x60, &content)
}

/// Wrap a follow-up token in a `negTokenResp` without a result
pub fn wrap_neg_token_resp(ntlm_token: &[u8]) -> Vec<u8> {
    let fields = tlv(0xa2, &tlv(0x04, ntlm_token));
    tlv(0xa1, &tlv(0x30, &fields))
}

/// Server side `negTokenResp`: accept-incomplete, NTLM selected, challenge token
#[cfg(test)]
pub fn wrap_challenge(ntlm_token: &[u8]) -> Vec<u8> {
    let mut fields = tlv(0xa0, &tlv(0x0a, &[NegResult::AcceptIncomplete.to_u8()]));
    fields.extend_from_slice(&tlv(0xa1, &tlv(0x06, NTLMSSP_OID)));
    fields.extend_from_slice(&tlv(0xa2, &tlv(0x04, ntlm_token)));
    tlv(0xa1, &tlv(0x30, &fields))
}

/// Server side `negTokenResp` carrying only a result
#[cfg(test)]
pub fn neg_result_token(result: NegResult) -> Vec<u8> {
    let fields = tlv(0xa0, &tlv(0x0a, &[result.to_u8()]));
    tlv(0xa1, &tlv(0x30, &fields))
}

/// Locate the NTLMSSP token inside a SPNEGO blob, or accept a raw token
pub fn unwrap_ntlm(blob: &[u8]) -> Result<&[u8]> {
    if blob.starts_with(NTLMSSP_MAGIC) {
        return Ok(blob);
    }
    if blob.is_empty() || (blob[0] != 0x60 && blob[0] != 0xa1) {
        return Err(Error::AuthenticationRejected(
            "security blob is neither SPNEGO nor NTLMSSP".into(),
        ));
    }
    blob.windows(NTLMSSP_MAGIC.len())
        .position(|w| w == NTLMSSP_MAGIC)
        .map(|at| &blob[at..])
        .ok_or_else(|| Error::AuthenticationRejected("no NTLMSSP token in SPNEGO blob".into()))
}

/// negResult of a `negTokenResp`, if it carries one
pub fn neg_result(blob: &[u8]) -> Option<NegResult> {
    if blob.first() != Some(&0xa1) {
        return None;
    }
    // a1 L 30 L a0 03 0a 01 XX, with short or long form lengths
    let mut at = 1;
    at += length_size(blob.get(at..)?)?;
    if blob.get(at) != Some(&0x30) {
        return None;
    }
    at += 1;
    at += length_size(blob.get(at..)?)?;
    match blob.get(at..at + 5)? {
        [0xa0, 0x03, 0x0a, 0x01, value] => NegResult::from_u8(*value),
        _ => None,
    }
}

fn length_size(buf: &[u8]) -> Option<usize> {
    let first = *buf.first()?;
    if first < 0x80 {
        Some(1)
    } else {
        Some(1 + (first & 0x7f) as usize)
    }
}
