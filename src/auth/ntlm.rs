//! NTLM authentication messages and the client-side NTLMv2 context
//!
//! Only the three-message NTLMv2 exchange is implemented. The client never
//! sets NEGOTIATE_KEY_EXCHANGE, so the session key is the NTLMv2 session
//! base key itself.

use super::ntlm_crypto::{
    generate_client_challenge, get_windows_timestamp, lmv2_response, ntlmv2_hash,
    ntlmv2_response, ntlmv2_session_key, NtlmV2Blob,
};
use super::{AuthMechanism, Credentials};
use crate::error::{Error, Result};
use crate::protocol::messages::common::{utf16le_decode, utf16le_encode};
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use tracing::debug;

/// NTLM signature - "NTLMSSP\0"
pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

/// NTLM message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum NtlmMessageType {
    /// Type 1: Negotiate message (client -> server)
    Negotiate = 0x00000001,
    /// Type 2: Challenge message (server -> client)
    Challenge = 0x00000002,
    /// Type 3: Authenticate message (client -> server)
    Authenticate = 0x00000003,
}

impl TryFrom<u32> for NtlmMessageType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0x00000001 => Ok(Self::Negotiate),
            0x00000002 => Ok(Self::Challenge),
            0x00000003 => Ok(Self::Authenticate),
            _ => Err(Error::AuthenticationRejected(format!(
                "Invalid NTLM message type: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// NTLM negotiation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NtlmFlags: u32 {
        const NEGOTIATE_UNICODE = 0x00000001;
        const NEGOTIATE_OEM = 0x00000002;
        const REQUEST_TARGET = 0x00000004;
        const NEGOTIATE_SIGN = 0x00000010;
        const NEGOTIATE_SEAL = 0x00000020;
        const NEGOTIATE_NTLM = 0x00000200;
        const NEGOTIATE_ANONYMOUS = 0x00000800;
        const NEGOTIATE_ALWAYS_SIGN = 0x00008000;
        const TARGET_TYPE_DOMAIN = 0x00010000;
        const TARGET_TYPE_SERVER = 0x00020000;
        const NEGOTIATE_EXTENDED_SECURITY = 0x00080000;
        const NEGOTIATE_TARGET_INFO = 0x00800000;
        const NEGOTIATE_VERSION = 0x02000000;
        const NEGOTIATE_128 = 0x20000000;
        const NEGOTIATE_KEY_EXCHANGE = 0x40000000;
        const NEGOTIATE_56 = 0x80000000;
    }
}

impl NtlmFlags {
    /// Flags this client offers in its NEGOTIATE message
    pub fn client_default() -> Self {
        NtlmFlags::NEGOTIATE_UNICODE
            | NtlmFlags::REQUEST_TARGET
            | NtlmFlags::NEGOTIATE_SIGN
            | NtlmFlags::NEGOTIATE_NTLM
            | NtlmFlags::NEGOTIATE_ALWAYS_SIGN
            | NtlmFlags::NEGOTIATE_EXTENDED_SECURITY
            | NtlmFlags::NEGOTIATE_TARGET_INFO
            | NtlmFlags::NEGOTIATE_128
            | NtlmFlags::NEGOTIATE_56
    }
}

/// Security buffer descriptor for NTLM messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecurityBuffer {
    pub length: u16,
    pub max_length: u16,
    /// Offset from the beginning of the NTLM message
    pub offset: u32,
}

impl SecurityBuffer {
    pub fn with_data(data_len: usize, offset: usize) -> Self {
        Self {
            length: data_len as u16,
            max_length: data_len as u16,
            offset: offset as u32,
        }
    }

    pub fn parse(cursor: &mut io::Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            length: cursor.read_u16::<LittleEndian>()?,
            max_length: cursor.read_u16::<LittleEndian>()?,
            offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.write_u16::<LittleEndian>(self.length)?;
        buf.write_u16::<LittleEndian>(self.max_length)?;
        buf.write_u32::<LittleEndian>(self.offset)?;
        Ok(())
    }

    pub fn extract_data<'a>(&self, message: &'a [u8]) -> Result<&'a [u8]> {
        if self.length == 0 {
            return Ok(&[]);
        }
        let start = self.offset as usize;
        let end = start + self.length as usize;
        message.get(start..end).ok_or_else(|| {
            Error::AuthenticationRejected("NTLM security buffer extends beyond message".into())
        })
    }
}

/// Lays out variable fields after a fixed header and records their buffers
struct PayloadWriter {
    offset: usize,
    payload: Vec<u8>,
}

impl PayloadWriter {
    fn new(fixed_len: usize) -> Self {
        Self {
            offset: fixed_len,
            payload: Vec::new(),
        }
    }

    fn push(&mut self, data: &[u8]) -> SecurityBuffer {
        let buffer = if data.is_empty() {
            SecurityBuffer::with_data(0, self.offset)
        } else {
            SecurityBuffer::with_data(data.len(), self.offset)
        };
        self.offset += data.len();
        self.payload.extend_from_slice(data);
        buffer
    }
}

fn read_header(data: &[u8], min_len: usize, expected: NtlmMessageType) -> Result<io::Cursor<&[u8]>> {
    if data.len() < min_len {
        return Err(Error::AuthenticationRejected(format!(
            "NTLM {:?} message too short",
            expected
        )));
    }
    let mut cursor = io::Cursor::new(data);
    let mut signature = [0u8; 8];
    cursor.read_exact(&mut signature)?;
    if &signature != NTLMSSP_SIGNATURE {
        return Err(Error::AuthenticationRejected("Invalid NTLM signature".into()));
    }
    let message_type = NtlmMessageType::try_from(cursor.read_u32::<LittleEndian>()?)?;
    if message_type != expected {
        return Err(Error::AuthenticationRejected(format!(
            "Expected NTLM {:?}, got {:?}",
            expected, message_type
        )));
    }
    Ok(cursor)
}

fn decode_string(flags: NtlmFlags, bytes: &[u8]) -> Result<String> {
    if flags.contains(NtlmFlags::NEGOTIATE_UNICODE) {
        utf16le_decode(bytes)
    } else {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

fn encode_string(flags: NtlmFlags, s: &str) -> Vec<u8> {
    if flags.contains(NtlmFlags::NEGOTIATE_UNICODE) {
        utf16le_encode(s)
    } else {
        s.as_bytes().to_vec()
    }
}

/// NTLM Type 1 Message - Negotiate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmNegotiateMessage {
    pub flags: NtlmFlags,
    /// OEM encoded, usually empty
    pub domain: String,
    pub workstation: String,
}

impl NtlmNegotiateMessage {
    const FIXED: usize = 32;

    pub fn new(flags: NtlmFlags) -> Self {
        Self {
            flags,
            domain: String::new(),
            workstation: String::new(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = read_header(data, Self::FIXED, NtlmMessageType::Negotiate)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;

        Ok(Self {
            flags,
            domain: String::from_utf8_lossy(domain.extract_data(data)?).into_owned(),
            workstation: String::from_utf8_lossy(workstation.extract_data(data)?).into_owned(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(Self::FIXED);
        let domain = payload.push(self.domain.as_bytes());
        let workstation = payload.push(self.workstation.as_bytes());

        let mut buf = Vec::with_capacity(Self::FIXED + payload.payload.len());
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(NtlmMessageType::Negotiate as u32)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        domain.serialize(&mut buf)?;
        workstation.serialize(&mut buf)?;
        buf.extend_from_slice(&payload.payload);
        Ok(buf)
    }
}

/// NTLM Type 2 Message - Challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmChallengeMessage {
    pub flags: NtlmFlags,
    pub challenge: [u8; 8],
    pub target_name: String,
    /// Raw AV_PAIR list, echoed back inside the NTLMv2 blob
    pub target_info: Vec<u8>,
}

impl NtlmChallengeMessage {
    const FIXED: usize = 48;

    #[cfg(test)]
    pub fn new(target_name: impl Into<String>, challenge: [u8; 8]) -> Self {
        Self {
            flags: NtlmFlags::NEGOTIATE_UNICODE
                | NtlmFlags::NEGOTIATE_NTLM
                | NtlmFlags::NEGOTIATE_SIGN
                | NtlmFlags::NEGOTIATE_ALWAYS_SIGN
                | NtlmFlags::TARGET_TYPE_SERVER
                | NtlmFlags::NEGOTIATE_TARGET_INFO
                | NtlmFlags::NEGOTIATE_EXTENDED_SECURITY
                | NtlmFlags::NEGOTIATE_128,
            challenge,
            target_name: target_name.into(),
            target_info: Vec::new(),
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = read_header(data, Self::FIXED, NtlmMessageType::Challenge)?;
        let target_name = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);
        let mut challenge = [0u8; 8];
        cursor.read_exact(&mut challenge)?;
        let _context = cursor.read_u64::<LittleEndian>()?;
        let target_info = SecurityBuffer::parse(&mut cursor)?;

        Ok(Self {
            flags,
            challenge,
            target_name: decode_string(flags, target_name.extract_data(data)?)?,
            target_info: target_info.extract_data(data)?.to_vec(),
        })
    }

    #[cfg(test)]
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(Self::FIXED);
        let target_name = payload.push(&encode_string(self.flags, &self.target_name));
        let target_info = payload.push(&self.target_info);

        let mut buf = Vec::with_capacity(Self::FIXED + payload.payload.len());
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(NtlmMessageType::Challenge as u32)?;
        target_name.serialize(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.write_all(&self.challenge)?;
        buf.write_u64::<LittleEndian>(0)?;
        target_info.serialize(&mut buf)?;
        buf.extend_from_slice(&payload.payload);
        Ok(buf)
    }
}

/// NTLM Type 3 Message - Authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NtlmAuthenticateMessage {
    pub flags: NtlmFlags,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub user_name: String,
    pub workstation: String,
    pub encrypted_session_key: Vec<u8>,
}

impl NtlmAuthenticateMessage {
    const FIXED: usize = 64;

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut cursor = read_header(data, Self::FIXED, NtlmMessageType::Authenticate)?;
        let lm_response = SecurityBuffer::parse(&mut cursor)?;
        let nt_response = SecurityBuffer::parse(&mut cursor)?;
        let domain = SecurityBuffer::parse(&mut cursor)?;
        let user_name = SecurityBuffer::parse(&mut cursor)?;
        let workstation = SecurityBuffer::parse(&mut cursor)?;
        let session_key = SecurityBuffer::parse(&mut cursor)?;
        let flags = NtlmFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?);

        Ok(Self {
            flags,
            lm_response: lm_response.extract_data(data)?.to_vec(),
            nt_response: nt_response.extract_data(data)?.to_vec(),
            domain: decode_string(flags, domain.extract_data(data)?)?,
            user_name: decode_string(flags, user_name.extract_data(data)?)?,
            workstation: decode_string(flags, workstation.extract_data(data)?)?,
            encrypted_session_key: session_key.extract_data(data)?.to_vec(),
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut payload = PayloadWriter::new(Self::FIXED);
        let lm_response = payload.push(&self.lm_response);
        let nt_response = payload.push(&self.nt_response);
        let domain = payload.push(&encode_string(self.flags, &self.domain));
        let user_name = payload.push(&encode_string(self.flags, &self.user_name));
        let workstation = payload.push(&encode_string(self.flags, &self.workstation));
        let session_key = payload.push(&self.encrypted_session_key);

        let mut buf = Vec::with_capacity(Self::FIXED + payload.payload.len());
        buf.write_all(NTLMSSP_SIGNATURE)?;
        buf.write_u32::<LittleEndian>(NtlmMessageType::Authenticate as u32)?;
        lm_response.serialize(&mut buf)?;
        nt_response.serialize(&mut buf)?;
        domain.serialize(&mut buf)?;
        user_name.serialize(&mut buf)?;
        workstation.serialize(&mut buf)?;
        session_key.serialize(&mut buf)?;
        buf.write_u32::<LittleEndian>(self.flags.bits())?;
        buf.extend_from_slice(&payload.payload);
        Ok(buf)
    }
}

/// NTLM client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtlmState {
    Initial,
    NegotiateSent,
    Authenticated,
}

/// Client side of one NTLMv2 exchange
pub struct NtlmClient {
    state: NtlmState,
    flags: NtlmFlags,
    username: String,
    password: String,
    domain: String,
    workstation: String,
    session_key: Option<[u8; 16]>,
}

impl NtlmClient {
    pub fn new(credentials: &Credentials, workstation: impl Into<String>) -> Self {
        Self {
            state: NtlmState::Initial,
            flags: NtlmFlags::client_default(),
            username: credentials.username().to_string(),
            password: credentials.password().to_string(),
            domain: credentials.domain().to_string(),
            workstation: workstation.into(),
            session_key: None,
        }
    }

    pub fn state(&self) -> NtlmState {
        self.state
    }

    /// Generate the Type 1 (Negotiate) message
    pub fn create_negotiate_message(&mut self) -> Result<Vec<u8>> {
        if self.state != NtlmState::Initial {
            return Err(Error::InvalidState(format!(
                "NTLM negotiate in state {:?}",
                self.state
            )));
        }
        let token = NtlmNegotiateMessage::new(self.flags).serialize()?;
        self.state = NtlmState::NegotiateSent;
        Ok(token)
    }

    /// Process the Type 2 (Challenge) message and generate Type 3 (Authenticate)
    pub fn create_authenticate_message(&mut self, challenge_data: &[u8]) -> Result<Vec<u8>> {
        if self.state != NtlmState::NegotiateSent {
            return Err(Error::InvalidState(format!(
                "NTLM challenge in state {:?}",
                self.state
            )));
        }

        let challenge = NtlmChallengeMessage::parse(challenge_data)?;
        debug!(
            "NTLM challenge from {:?}, flags {:?}",
            challenge.target_name, challenge.flags
        );

        let hash = ntlmv2_hash(&self.username, &self.domain, &self.password)?;
        let client_challenge = generate_client_challenge();
        let blob = NtlmV2Blob::new(
            get_windows_timestamp(),
            client_challenge,
            challenge.target_info.clone(),
        );
        let nt_response = ntlmv2_response(&hash, &challenge.challenge, &blob)?;
        let lm_response = lmv2_response(&hash, &challenge.challenge, &client_challenge)?;
        let session_key = ntlmv2_session_key(&hash, &nt_response)?;

        let flags = (challenge.flags & self.flags) | NtlmFlags::NEGOTIATE_UNICODE;
        let message = NtlmAuthenticateMessage {
            flags: flags - NtlmFlags::NEGOTIATE_KEY_EXCHANGE,
            lm_response,
            nt_response,
            domain: self.domain.clone(),
            user_name: self.username.clone(),
            workstation: self.workstation.clone(),
            encrypted_session_key: Vec::new(),
        };

        self.session_key = Some(session_key);
        self.state = NtlmState::Authenticated;
        message.serialize()
    }
}

impl AuthMechanism for NtlmClient {
    fn initial_token(&mut self) -> Result<Vec<u8>> {
        self.create_negotiate_message()
    }

    fn respond(&mut self, server_token: &[u8]) -> Result<Vec<u8>> {
        self.create_authenticate_message(server_token)
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_ref().map(|key| key.as_slice())
    }
}
