//! SMB2 protocol messages organized by category
//!
//! [`encode`] and [`decode`] convert between a [`Message`] and the bytes of
//! one frame payload. Neither touches the network.

pub mod common;
pub mod directory;
pub mod file_ops;
pub mod info;
pub mod negotiate;
pub mod session;
pub mod tree;

pub use common::{FileId, Smb2EmptyBody, Smb2ErrorResponse, SmbMessage};
pub use directory::{FileDirectoryInformation, Smb2QueryDirectoryRequest, Smb2QueryDirectoryResponse};
pub use file_ops::{FileStat, Smb2CloseRequest, Smb2CloseResponse, Smb2CreateRequest, Smb2CreateResponse};
pub use file_ops::{Smb2FlushRequest, Smb2ReadRequest, Smb2ReadResponse, Smb2WriteRequest, Smb2WriteResponse};
pub use info::{
    FileDispositionInformation, FileInfoClass, FileNetworkOpenInformation, FileRenameInformation,
    InfoType,
};
pub use info::{
    Smb2QueryInfoRequest, Smb2QueryInfoResponse, Smb2SetInfoRequest, Smb2SetInfoResponse,
};
pub use negotiate::{Smb2NegotiateRequest, Smb2NegotiateResponse};
pub use session::{Smb2SessionSetupRequest, Smb2SessionSetupResponse};
pub use tree::{Smb2TreeConnectRequest, Smb2TreeConnectResponse};

use super::header::Smb2Header;
use super::smb2_constants::{Smb2Command, SMB2_HEADER_SIZE};
use crate::error::{Error, NtStatus, Result};

/// Command-specific part of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    NegotiateRequest(Smb2NegotiateRequest),
    NegotiateResponse(Smb2NegotiateResponse),
    SessionSetupRequest(Smb2SessionSetupRequest),
    SessionSetupResponse(Smb2SessionSetupResponse),
    TreeConnectRequest(Smb2TreeConnectRequest),
    TreeConnectResponse(Smb2TreeConnectResponse),
    CreateRequest(Smb2CreateRequest),
    CreateResponse(Smb2CreateResponse),
    CloseRequest(Smb2CloseRequest),
    CloseResponse(Smb2CloseResponse),
    FlushRequest(Smb2FlushRequest),
    ReadRequest(Smb2ReadRequest),
    ReadResponse(Smb2ReadResponse),
    WriteRequest(Smb2WriteRequest),
    WriteResponse(Smb2WriteResponse),
    QueryDirectoryRequest(Smb2QueryDirectoryRequest),
    QueryDirectoryResponse(Smb2QueryDirectoryResponse),
    QueryInfoRequest(Smb2QueryInfoRequest),
    QueryInfoResponse(Smb2QueryInfoResponse),
    SetInfoRequest(Smb2SetInfoRequest),
    SetInfoResponse(Smb2SetInfoResponse),
    /// LOGOFF, TREE_DISCONNECT and ECHO in both directions, FLUSH response
    Empty,
    Error(Smb2ErrorResponse),
}

impl Body {
    /// Command this body belongs to; `None` for bodies shared across commands
    pub fn command(&self) -> Option<Smb2Command> {
        use Body::*;
        let command = match self {
            NegotiateRequest(_) | NegotiateResponse(_) => Smb2Command::Negotiate,
            SessionSetupRequest(_) | SessionSetupResponse(_) => Smb2Command::SessionSetup,
            TreeConnectRequest(_) | TreeConnectResponse(_) => Smb2Command::TreeConnect,
            CreateRequest(_) | CreateResponse(_) => Smb2Command::Create,
            CloseRequest(_) | CloseResponse(_) => Smb2Command::Close,
            FlushRequest(_) => Smb2Command::Flush,
            ReadRequest(_) | ReadResponse(_) => Smb2Command::Read,
            WriteRequest(_) | WriteResponse(_) => Smb2Command::Write,
            QueryDirectoryRequest(_) | QueryDirectoryResponse(_) => Smb2Command::QueryDirectory,
            QueryInfoRequest(_) | QueryInfoResponse(_) => Smb2Command::QueryInfo,
            SetInfoRequest(_) | SetInfoResponse(_) => Smb2Command::SetInfo,
            Empty | Error(_) => return None,
        };
        Some(command)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        use Body::*;
        match self {
            NegotiateRequest(m) => m.serialize(),
            NegotiateResponse(m) => m.serialize(),
            SessionSetupRequest(m) => m.serialize(),
            SessionSetupResponse(m) => m.serialize(),
            TreeConnectRequest(m) => m.serialize(),
            TreeConnectResponse(m) => m.serialize(),
            CreateRequest(m) => m.serialize(),
            CreateResponse(m) => m.serialize(),
            CloseRequest(m) => m.serialize(),
            CloseResponse(m) => m.serialize(),
            FlushRequest(m) => m.serialize(),
            ReadRequest(m) => m.serialize(),
            ReadResponse(m) => m.serialize(),
            WriteRequest(m) => m.serialize(),
            WriteResponse(m) => m.serialize(),
            QueryDirectoryRequest(m) => m.serialize(),
            QueryDirectoryResponse(m) => m.serialize(),
            QueryInfoRequest(m) => m.serialize(),
            QueryInfoResponse(m) => m.serialize(),
            SetInfoRequest(m) => m.serialize(),
            SetInfoResponse(m) => m.serialize(),
            Empty => Smb2EmptyBody.serialize(),
            Error(m) => m.serialize(),
        }
    }
}

/// A header plus its body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Smb2Header,
    pub body: Body,
}

impl Message {
    pub fn new(header: Smb2Header, body: Body) -> Self {
        Self { header, body }
    }

    /// Request with a fresh header for `command`
    pub fn request(command: Smb2Command, body: Body) -> Self {
        Self {
            header: Smb2Header::new(command),
            body,
        }
    }

    pub fn status(&self) -> NtStatus {
        self.header.nt_status()
    }
}

/// Whether a response with this status carries the command's own body
/// rather than an ERROR body
fn has_command_body(command: Smb2Command, status: NtStatus) -> bool {
    match status {
        NtStatus::Success => true,
        NtStatus::MoreProcessingRequired => command == Smb2Command::SessionSetup,
        NtStatus::BufferOverflow => matches!(
            command,
            Smb2Command::Read | Smb2Command::QueryInfo | Smb2Command::QueryDirectory
        ),
        _ => false,
    }
}

/// Serialize a message into one frame payload
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    if let Some(command) = message.body.command() {
        if command != message.header.command {
            return Err(Error::InvalidParameter(format!(
                "{:?} body under a {:?} header",
                command, message.header.command
            )));
        }
    }

    let body = message.body.serialize()?;
    let mut buf = Vec::with_capacity(SMB2_HEADER_SIZE + body.len());
    message.header.serialize(&mut buf)?;
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Parse one frame payload
pub fn decode(bytes: &[u8]) -> Result<Message> {
    decode_inner(bytes).map_err(|e| match e {
        Error::Io(e) => Error::MalformedMessage(format!("truncated message: {}", e)),
        other => other,
    })
}

fn decode_inner(bytes: &[u8]) -> Result<Message> {
    let header = Smb2Header::parse(bytes)?;
    let body = &bytes[SMB2_HEADER_SIZE..];
    let command = header.command;

    let body = if header.is_response() {
        if !has_command_body(command, header.nt_status()) {
            Body::Error(Smb2ErrorResponse::parse(body)?)
        } else {
            decode_response(command, body)?
        }
    } else {
        decode_request(command, body)?
    };

    Ok(Message { header, body })
}

fn decode_request(command: Smb2Command, body: &[u8]) -> Result<Body> {
    Ok(match command {
        Smb2Command::Negotiate => Body::NegotiateRequest(Smb2NegotiateRequest::parse(body)?),
        Smb2Command::SessionSetup => Body::SessionSetupRequest(Smb2SessionSetupRequest::parse(body)?),
        Smb2Command::TreeConnect => Body::TreeConnectRequest(Smb2TreeConnectRequest::parse(body)?),
        Smb2Command::Create => Body::CreateRequest(Smb2CreateRequest::parse(body)?),
        Smb2Command::Close => Body::CloseRequest(Smb2CloseRequest::parse(body)?),
        Smb2Command::Flush => Body::FlushRequest(Smb2FlushRequest::parse(body)?),
        Smb2Command::Read => Body::ReadRequest(Smb2ReadRequest::parse(body)?),
        Smb2Command::Write => Body::WriteRequest(Smb2WriteRequest::parse(body)?),
        Smb2Command::QueryDirectory => {
            Body::QueryDirectoryRequest(Smb2QueryDirectoryRequest::parse(body)?)
        }
        Smb2Command::QueryInfo => Body::QueryInfoRequest(Smb2QueryInfoRequest::parse(body)?),
        Smb2Command::SetInfo => Body::SetInfoRequest(Smb2SetInfoRequest::parse(body)?),
        Smb2Command::Logoff | Smb2Command::TreeDisconnect | Smb2Command::Echo => {
            Smb2EmptyBody::parse(body)?;
            Body::Empty
        }
        other => {
            return Err(Error::MalformedMessage(format!(
                "unsupported request command {:?}",
                other
            )))
        }
    })
}

fn decode_response(command: Smb2Command, body: &[u8]) -> Result<Body> {
    Ok(match command {
        Smb2Command::Negotiate => Body::NegotiateResponse(Smb2NegotiateResponse::parse(body)?),
        Smb2Command::SessionSetup => {
            Body::SessionSetupResponse(Smb2SessionSetupResponse::parse(body)?)
        }
        Smb2Command::TreeConnect => Body::TreeConnectResponse(Smb2TreeConnectResponse::parse(body)?),
        Smb2Command::Create => Body::CreateResponse(Smb2CreateResponse::parse(body)?),
        Smb2Command::Close => Body::CloseResponse(Smb2CloseResponse::parse(body)?),
        Smb2Command::Read => Body::ReadResponse(Smb2ReadResponse::parse(body)?),
        Smb2Command::Write => Body::WriteResponse(Smb2WriteResponse::parse(body)?),
        Smb2Command::QueryDirectory => {
            Body::QueryDirectoryResponse(Smb2QueryDirectoryResponse::parse(body)?)
        }
        Smb2Command::QueryInfo => Body::QueryInfoResponse(Smb2QueryInfoResponse::parse(body)?),
        Smb2Command::SetInfo => Body::SetInfoResponse(Smb2SetInfoResponse::parse(body)?),
        Smb2Command::Logoff
        | Smb2Command::TreeDisconnect
        | Smb2Command::Echo
        | Smb2Command::Flush => {
            Smb2EmptyBody::parse(body)?;
            Body::Empty
        }
        other => {
            return Err(Error::MalformedMessage(format!(
                "unsupported response command {:?}",
                other
            )))
        }
    })
}
