//! Error types for the SMB client engine

use std::fmt;
use std::io;
use thiserror::Error;

use crate::protocol::smb2_constants::Smb2Command;

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SMB client operations
#[derive(Debug, Error)]
pub enum Error {
    /// The remote host could not be reached
    #[error("Connect error: {0}")]
    Connect(String),

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the connection
    #[error("Disconnected")]
    Disconnected,

    /// The connection failed underneath an operation
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Framing or sequencing rule broken on the wire
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// A message could not be decoded
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The server picked none of the offered dialects
    #[error("No compatible dialect")]
    NoCompatibleDialect,

    /// The server refused the credentials
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(String),

    /// A handshake is already running on this connection
    #[error("Handshake already in progress")]
    HandshakeInProgress,

    /// Access denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The share does not exist on the server
    #[error("Share not found: {0}")]
    ShareNotFound(String),

    /// File or directory not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The handle was closed or never existed
    #[error("Invalid handle")]
    HandleInvalid,

    /// File or directory already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The operation was cancelled locally or by teardown
    #[error("Operation cancelled")]
    Cancelled,

    /// Timeout occurred
    #[error("Operation timed out")]
    Timeout,

    /// An RPC call over a named pipe was refused or faulted
    #[error("RPC error: {0}")]
    Rpc(String),

    /// Server returned a status with no dedicated variant
    #[error("{command:?} failed: {status}")]
    Status { command: Smb2Command, status: NtStatus },

    /// Signing error
    #[error("Message signing error: {0}")]
    SigningError(String),

    /// Encryption error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A host name could not be resolved
    #[error("Name not found: {0}")]
    NameNotFound(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// A local file used by a transfer could not be read or written
    #[error("Local file error: {0}")]
    LocalFile(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection level, caller may reconnect
    Transport,
    /// Local validation of wire data failed
    Protocol,
    /// Handshake failure
    Negotiation,
    /// A single operation failed, the connection is fine
    Operation,
    /// Cancellation, timeouts and misuse of the API
    Local,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connect(_)
            | Error::Io(_)
            | Error::Disconnected
            | Error::ConnectionLost(_)
            | Error::NameNotFound(_) => ErrorKind::Transport,
            Error::ProtocolViolation(_) | Error::MalformedMessage(_) | Error::SigningError(_) => {
                ErrorKind::Protocol
            }
            Error::NoCompatibleDialect
            | Error::AuthenticationRejected(_)
            | Error::HandshakeInProgress
            | Error::CryptoError(_) => ErrorKind::Negotiation,
            Error::AccessDenied(_)
            | Error::ShareNotFound(_)
            | Error::NotFound(_)
            | Error::HandleInvalid
            | Error::AlreadyExists(_)
            | Error::Rpc(_)
            | Error::Status { .. } => ErrorKind::Operation,
            Error::Cancelled
            | Error::Timeout
            | Error::InvalidParameter(_)
            | Error::InvalidState(_)
            | Error::Config(_)
            | Error::LocalFile(_) => ErrorKind::Local,
        }
    }

    /// True when the connection can no longer be used after this error
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Disconnected
                | Error::ConnectionLost(_)
                | Error::ProtocolViolation(_)
                | Error::MalformedMessage(_)
        )
    }

    /// Map a failure status returned for `command` to an operation error
    pub fn from_status(command: Smb2Command, status: NtStatus, context: &str) -> Self {
        match status {
            NtStatus::AccessDenied => Error::AccessDenied(context.to_string()),
            NtStatus::BadNetworkName | NtStatus::BadNetworkPath => {
                Error::ShareNotFound(context.to_string())
            }
            NtStatus::ObjectNameNotFound | NtStatus::ObjectPathNotFound | NtStatus::NoSuchFile => {
                Error::NotFound(context.to_string())
            }
            NtStatus::FileClosed | NtStatus::InvalidHandle => Error::HandleInvalid,
            NtStatus::ObjectNameCollision => Error::AlreadyExists(context.to_string()),
            NtStatus::Cancelled => Error::Cancelled,
            NtStatus::IoTimeout => Error::Timeout,
            NtStatus::LogonFailure | NtStatus::AccountDisabled | NtStatus::WrongPassword => {
                Error::AuthenticationRejected(status.to_string())
            }
            NtStatus::NetworkNameDeleted | NtStatus::UserSessionDeleted => {
                Error::ConnectionLost(status.to_string())
            }
            _ => Error::Status { command, status },
        }
    }

    /// Copy of this error suitable for fanning out to several waiters
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Error::Io(e) => Error::ConnectionLost(e.to_string()),
            Error::Connect(s) => Error::Connect(s.clone()),
            Error::Disconnected => Error::Disconnected,
            Error::ConnectionLost(s) => Error::ConnectionLost(s.clone()),
            Error::ProtocolViolation(s) => Error::ProtocolViolation(s.clone()),
            Error::MalformedMessage(s) => Error::MalformedMessage(s.clone()),
            Error::NoCompatibleDialect => Error::NoCompatibleDialect,
            Error::AuthenticationRejected(s) => Error::AuthenticationRejected(s.clone()),
            Error::HandshakeInProgress => Error::HandshakeInProgress,
            Error::AccessDenied(s) => Error::AccessDenied(s.clone()),
            Error::ShareNotFound(s) => Error::ShareNotFound(s.clone()),
            Error::NotFound(s) => Error::NotFound(s.clone()),
            Error::HandleInvalid => Error::HandleInvalid,
            Error::AlreadyExists(s) => Error::AlreadyExists(s.clone()),
            Error::Cancelled => Error::Cancelled,
            Error::Timeout => Error::Timeout,
            Error::Rpc(s) => Error::Rpc(s.clone()),
            Error::Status { command, status } => Error::Status {
                command: *command,
                status: *status,
            },
            Error::SigningError(s) => Error::SigningError(s.clone()),
            Error::CryptoError(s) => Error::CryptoError(s.clone()),
            Error::InvalidParameter(s) => Error::InvalidParameter(s.clone()),
            Error::InvalidState(s) => Error::InvalidState(s.clone()),
            Error::NameNotFound(s) => Error::NameNotFound(s.clone()),
            Error::Config(s) => Error::Config(s.clone()),
            Error::LocalFile(s) => Error::LocalFile(s.clone()),
        }
    }
}

/// SMB protocol status codes (subset of NTSTATUS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NtStatus {
    /// The operation completed successfully
    Success,
    /// The operation is still running, a final response follows
    Pending,
    /// More processing required
    MoreProcessingRequired,
    /// Data did not fit, a partial result was returned
    BufferOverflow,
    /// No more files
    NoMoreFiles,
    /// The specified handle is invalid
    InvalidHandle,
    /// The parameter is incorrect
    InvalidParameter,
    /// No such file
    NoSuchFile,
    /// End of file reached
    EndOfFile,
    /// Access denied
    AccessDenied,
    /// The buffer is too small
    BufferTooSmall,
    /// The object name is not found
    ObjectNameNotFound,
    /// Cannot create a file that already exists
    ObjectNameCollision,
    /// Part of the path does not exist
    ObjectPathNotFound,
    /// Sharing violation
    SharingViolation,
    /// Delete is pending on the file
    DeletePending,
    /// The password is incorrect
    WrongPassword,
    /// The user name or password is incorrect
    LogonFailure,
    /// Account is disabled
    AccountDisabled,
    /// Insufficient resources
    InsufficientResources,
    /// The file is a directory
    FileIsADirectory,
    /// The request is not supported
    NotSupported,
    /// The request timed out
    IoTimeout,
    /// Bad network path
    BadNetworkPath,
    /// The specified network name is no longer available
    NetworkNameDeleted,
    /// Bad network name
    BadNetworkName,
    /// Directory is not empty
    DirectoryNotEmpty,
    /// Not a directory
    NotADirectory,
    /// The request was cancelled
    Cancelled,
    /// The handle was closed
    FileClosed,
    /// The session was deleted on the server
    UserSessionDeleted,
    /// The disk is full
    DiskFull,
    /// Any other status value
    Other(u32),
}

impl NtStatus {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x00000000 => NtStatus::Success,
            0x00000103 => NtStatus::Pending,
            0xC0000016 => NtStatus::MoreProcessingRequired,
            0x80000005 => NtStatus::BufferOverflow,
            0x80000006 => NtStatus::NoMoreFiles,
            0xC0000008 => NtStatus::InvalidHandle,
            0xC000000D => NtStatus::InvalidParameter,
            0xC000000F => NtStatus::NoSuchFile,
            0xC0000011 => NtStatus::EndOfFile,
            0xC0000022 => NtStatus::AccessDenied,
            0xC0000023 => NtStatus::BufferTooSmall,
            0xC0000034 => NtStatus::ObjectNameNotFound,
            0xC0000035 => NtStatus::ObjectNameCollision,
            0xC000003A => NtStatus::ObjectPathNotFound,
            0xC0000043 => NtStatus::SharingViolation,
            0xC0000056 => NtStatus::DeletePending,
            0xC000006A => NtStatus::WrongPassword,
            0xC000006D => NtStatus::LogonFailure,
            0xC0000072 => NtStatus::AccountDisabled,
            0xC000009A => NtStatus::InsufficientResources,
            0xC00000BA => NtStatus::FileIsADirectory,
            0xC00000BB => NtStatus::NotSupported,
            0xC00000B5 => NtStatus::IoTimeout,
            0xC00000BE => NtStatus::BadNetworkPath,
            0xC00000C9 => NtStatus::NetworkNameDeleted,
            0xC00000CC => NtStatus::BadNetworkName,
            0xC0000101 => NtStatus::DirectoryNotEmpty,
            0xC0000103 => NtStatus::NotADirectory,
            0xC0000120 => NtStatus::Cancelled,
            0xC0000128 => NtStatus::FileClosed,
            0xC0000203 => NtStatus::UserSessionDeleted,
            0xC000007F => NtStatus::DiskFull,
            other => NtStatus::Other(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            NtStatus::Success => 0x00000000,
            NtStatus::Pending => 0x00000103,
            NtStatus::MoreProcessingRequired => 0xC0000016,
            NtStatus::BufferOverflow => 0x80000005,
            NtStatus::NoMoreFiles => 0x80000006,
            NtStatus::InvalidHandle => 0xC0000008,
            NtStatus::InvalidParameter => 0xC000000D,
            NtStatus::NoSuchFile => 0xC000000F,
            NtStatus::EndOfFile => 0xC0000011,
            NtStatus::AccessDenied => 0xC0000022,
            NtStatus::BufferTooSmall => 0xC0000023,
            NtStatus::ObjectNameNotFound => 0xC0000034,
            NtStatus::ObjectNameCollision => 0xC0000035,
            NtStatus::ObjectPathNotFound => 0xC000003A,
            NtStatus::SharingViolation => 0xC0000043,
            NtStatus::DeletePending => 0xC0000056,
            NtStatus::WrongPassword => 0xC000006A,
            NtStatus::LogonFailure => 0xC000006D,
            NtStatus::AccountDisabled => 0xC0000072,
            NtStatus::InsufficientResources => 0xC000009A,
            NtStatus::FileIsADirectory => 0xC00000BA,
            NtStatus::NotSupported => 0xC00000BB,
            NtStatus::IoTimeout => 0xC00000B5,
            NtStatus::BadNetworkPath => 0xC00000BE,
            NtStatus::NetworkNameDeleted => 0xC00000C9,
            NtStatus::BadNetworkName => 0xC00000CC,
            NtStatus::DirectoryNotEmpty => 0xC0000101,
            NtStatus::NotADirectory => 0xC0000103,
            NtStatus::Cancelled => 0xC0000120,
            NtStatus::FileClosed => 0xC0000128,
            NtStatus::UserSessionDeleted => 0xC0000203,
            NtStatus::DiskFull => 0xC000007F,
            NtStatus::Other(value) => value,
        }
    }

    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        self.to_u32() & 0xC0000000 == 0xC0000000
    }

    /// Check if this is a warning status
    pub fn is_warning(self) -> bool {
        self.to_u32() & 0x80000000 == 0x80000000 && !self.is_error()
    }
}

impl From<u32> for NtStatus {
    fn from(value: u32) -> Self {
        NtStatus::from_u32(value)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NtStatus::Success => "Success",
            NtStatus::Pending => "Pending",
            NtStatus::MoreProcessingRequired => "More processing required",
            NtStatus::BufferOverflow => "Buffer overflow",
            NtStatus::NoMoreFiles => "No more files",
            NtStatus::InvalidHandle => "Invalid handle",
            NtStatus::InvalidParameter => "Invalid parameter",
            NtStatus::NoSuchFile => "No such file",
            NtStatus::EndOfFile => "End of file",
            NtStatus::AccessDenied => "Access denied",
            NtStatus::BufferTooSmall => "Buffer too small",
            NtStatus::ObjectNameNotFound => "Object name not found",
            NtStatus::ObjectNameCollision => "Object name collision",
            NtStatus::ObjectPathNotFound => "Object path not found",
            NtStatus::SharingViolation => "Sharing violation",
            NtStatus::DeletePending => "Delete pending",
            NtStatus::WrongPassword => "Wrong password",
            NtStatus::LogonFailure => "Logon failure",
            NtStatus::AccountDisabled => "Account disabled",
            NtStatus::InsufficientResources => "Insufficient resources",
            NtStatus::FileIsADirectory => "File is a directory",
            NtStatus::NotSupported => "Not supported",
            NtStatus::IoTimeout => "I/O timeout",
            NtStatus::BadNetworkPath => "Bad network path",
            NtStatus::NetworkNameDeleted => "Network name deleted",
            NtStatus::BadNetworkName => "Bad network name",
            NtStatus::DirectoryNotEmpty => "Directory not empty",
            NtStatus::NotADirectory => "Not a directory",
            NtStatus::Cancelled => "Cancelled",
            NtStatus::FileClosed => "File closed",
            NtStatus::UserSessionDeleted => "User session deleted",
            NtStatus::DiskFull => "Disk full",
            NtStatus::Other(_) => "Unknown status",
        };
        write!(f, "{} (0x{:08X})", msg, self.to_u32())
    }
}
