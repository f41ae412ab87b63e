//! SMB2/3 protocol constants

use bitflags::bitflags;
use std::fmt;

/// SMB2 magic as bytes
pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];

/// SMB2 header size
pub const SMB2_HEADER_SIZE: usize = 64;

/// Structure sizes for SMB2 messages
pub mod structure_size {
    pub const HEADER: u16 = 64;
    pub const NEGOTIATE_REQUEST: u16 = 36;
    pub const NEGOTIATE_RESPONSE: u16 = 65;
    pub const SESSION_SETUP_REQUEST: u16 = 25;
    pub const SESSION_SETUP_RESPONSE: u16 = 9;
    pub const LOGOFF: u16 = 4;
    pub const TREE_CONNECT_REQUEST: u16 = 9;
    pub const TREE_CONNECT_RESPONSE: u16 = 16;
    pub const TREE_DISCONNECT: u16 = 4;
    pub const CREATE_REQUEST: u16 = 57;
    pub const CREATE_RESPONSE: u16 = 89;
    pub const CLOSE_REQUEST: u16 = 24;
    pub const CLOSE_RESPONSE: u16 = 60;
    pub const FLUSH_REQUEST: u16 = 24;
    pub const FLUSH_RESPONSE: u16 = 4;
    pub const READ_REQUEST: u16 = 49;
    pub const READ_RESPONSE: u16 = 17;
    pub const WRITE_REQUEST: u16 = 49;
    pub const WRITE_RESPONSE: u16 = 17;
    pub const ECHO: u16 = 4;
    pub const QUERY_DIRECTORY_REQUEST: u16 = 33;
    pub const QUERY_DIRECTORY_RESPONSE: u16 = 9;
    pub const QUERY_INFO_REQUEST: u16 = 41;
    pub const QUERY_INFO_RESPONSE: u16 = 9;
    pub const SET_INFO_REQUEST: u16 = 33;
    pub const SET_INFO_RESPONSE: u16 = 2;
    pub const ERROR_RESPONSE: u16 = 9;
}

bitflags! {
    /// SMB2 header flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Smb2HeaderFlags: u32 {
        const SERVER_TO_REDIR = 0x00000001;
        const ASYNC_COMMAND = 0x00000002;
        const RELATED_OPERATIONS = 0x00000004;
        const SIGNED = 0x00000008;
        const DFS_OPERATIONS = 0x10000000;
        const REPLAY_OPERATION = 0x20000000;
    }
}

bitflags! {
    /// File attributes as defined in MS-FSCC
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileAttributes: u32 {
        const READONLY            = 0x00000001;
        const HIDDEN              = 0x00000002;
        const SYSTEM              = 0x00000004;
        const DIRECTORY           = 0x00000010;
        const ARCHIVE             = 0x00000020;
        const NORMAL              = 0x00000080;
        const TEMPORARY           = 0x00000100;
        const SPARSE_FILE         = 0x00000200;
        const REPARSE_POINT       = 0x00000400;
        const COMPRESSED          = 0x00000800;
        const OFFLINE             = 0x00001000;
        const NOT_CONTENT_INDEXED = 0x00002000;
        const ENCRYPTED           = 0x00004000;
    }
}

bitflags! {
    /// File access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DesiredAccess: u32 {
        // Standard rights
        const DELETE                   = 0x00010000;
        const READ_CONTROL             = 0x00020000;
        const WRITE_DAC                = 0x00040000;
        const WRITE_OWNER              = 0x00080000;
        const SYNCHRONIZE              = 0x00100000;

        // Specific rights
        const FILE_READ_DATA           = 0x00000001;
        const FILE_WRITE_DATA          = 0x00000002;
        const FILE_APPEND_DATA         = 0x00000004;
        const FILE_READ_EA             = 0x00000008;
        const FILE_WRITE_EA            = 0x00000010;
        const FILE_EXECUTE             = 0x00000020;
        const FILE_DELETE_CHILD        = 0x00000040;
        const FILE_READ_ATTRIBUTES     = 0x00000080;
        const FILE_WRITE_ATTRIBUTES    = 0x00000100;

        // Generic rights
        const MAXIMUM_ALLOWED          = 0x02000000;
        const GENERIC_ALL              = 0x10000000;
        const GENERIC_EXECUTE          = 0x20000000;
        const GENERIC_WRITE            = 0x40000000;
        const GENERIC_READ             = 0x80000000;

        // Common combinations
        const FILE_GENERIC_READ        = Self::SYNCHRONIZE.bits() |
                                         Self::FILE_READ_DATA.bits() |
                                         Self::FILE_READ_ATTRIBUTES.bits() |
                                         Self::FILE_READ_EA.bits() |
                                         Self::READ_CONTROL.bits();

        const FILE_GENERIC_WRITE       = Self::SYNCHRONIZE.bits() |
                                         Self::FILE_WRITE_DATA.bits() |
                                         Self::FILE_WRITE_ATTRIBUTES.bits() |
                                         Self::FILE_WRITE_EA.bits() |
                                         Self::FILE_APPEND_DATA.bits() |
                                         Self::READ_CONTROL.bits();

        const FILE_ALL_ACCESS          = 0x001F01FF;
    }
}

bitflags! {
    /// File share access rights
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShareAccess: u32 {
        const FILE_SHARE_READ   = 0x00000001;
        const FILE_SHARE_WRITE  = 0x00000002;
        const FILE_SHARE_DELETE = 0x00000004;
    }
}

/// Create disposition values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CreateDisposition {
    /// If file exists, supersede. If file doesn't exist, create.
    Supersede = 0x00000000,
    /// If file exists, open. If file doesn't exist, fail.
    Open = 0x00000001,
    /// If file exists, fail. If file doesn't exist, create.
    Create = 0x00000002,
    /// If file exists, open. If file doesn't exist, create.
    OpenIf = 0x00000003,
    /// If file exists, overwrite. If file doesn't exist, fail.
    Overwrite = 0x00000004,
    /// If file exists, overwrite. If file doesn't exist, create.
    OverwriteIf = 0x00000005,
}

impl TryFrom<u32> for CreateDisposition {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x00000000 => Ok(CreateDisposition::Supersede),
            0x00000001 => Ok(CreateDisposition::Open),
            0x00000002 => Ok(CreateDisposition::Create),
            0x00000003 => Ok(CreateDisposition::OpenIf),
            0x00000004 => Ok(CreateDisposition::Overwrite),
            0x00000005 => Ok(CreateDisposition::OverwriteIf),
            _ => Err(crate::Error::MalformedMessage(format!(
                "Invalid create disposition: {}",
                value
            ))),
        }
    }
}

bitflags! {
    /// File create options
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CreateOptions: u32 {
        const FILE_DIRECTORY_FILE            = 0x00000001;
        const FILE_WRITE_THROUGH             = 0x00000002;
        const FILE_SEQUENTIAL_ONLY           = 0x00000004;
        const FILE_NO_INTERMEDIATE_BUFFERING = 0x00000008;
        const FILE_SYNCHRONOUS_IO_ALERT      = 0x00000010;
        const FILE_SYNCHRONOUS_IO_NONALERT   = 0x00000020;
        const FILE_NON_DIRECTORY_FILE        = 0x00000040;
        const FILE_COMPLETE_IF_OPLOCKED      = 0x00000100;
        const FILE_NO_EA_KNOWLEDGE           = 0x00000200;
        const FILE_RANDOM_ACCESS             = 0x00000800;
        const FILE_DELETE_ON_CLOSE           = 0x00001000;
        const FILE_OPEN_BY_FILE_ID           = 0x00002000;
        const FILE_OPEN_FOR_BACKUP_INTENT    = 0x00004000;
        const FILE_OPEN_REPARSE_POINT        = 0x00200000;
    }
}

/// Impersonation levels
pub mod impersonation_level {
    pub const ANONYMOUS: u32 = 0x00000000;
    pub const IDENTIFICATION: u32 = 0x00000001;
    pub const IMPERSONATION: u32 = 0x00000002;
    pub const DELEGATION: u32 = 0x00000003;
}

/// Oplock levels
pub mod oplock_level {
    pub const NONE: u8 = 0x00;
    pub const LEVEL_II: u8 = 0x01;
    pub const EXCLUSIVE: u8 = 0x08;
    pub const BATCH: u8 = 0x09;
}

/// Create Action values returned by the server
pub mod create_action {
    pub const SUPERSEDED: u32 = 0x00000000;
    pub const OPENED: u32 = 0x00000001;
    pub const CREATED: u32 = 0x00000002;
    pub const OVERWRITTEN: u32 = 0x00000003;
}

/// Query Directory flags
pub mod query_directory_flags {
    pub const RESTART_SCANS: u8 = 0x01;
    pub const RETURN_SINGLE_ENTRY: u8 = 0x02;
    pub const INDEX_SPECIFIED: u8 = 0x04;
    pub const REOPEN: u8 = 0x10;
}

/// SMB2 Commands (opcodes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Smb2Command {
    Negotiate = 0x00,
    SessionSetup = 0x01,
    Logoff = 0x02,
    TreeConnect = 0x03,
    TreeDisconnect = 0x04,
    Create = 0x05,
    Close = 0x06,
    Flush = 0x07,
    Read = 0x08,
    Write = 0x09,
    Lock = 0x0A,
    Ioctl = 0x0B,
    Cancel = 0x0C,
    Echo = 0x0D,
    QueryDirectory = 0x0E,
    ChangeNotify = 0x0F,
    QueryInfo = 0x10,
    SetInfo = 0x11,
    OplockBreak = 0x12,
}

impl TryFrom<u16> for Smb2Command {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Negotiate),
            0x01 => Ok(Self::SessionSetup),
            0x02 => Ok(Self::Logoff),
            0x03 => Ok(Self::TreeConnect),
            0x04 => Ok(Self::TreeDisconnect),
            0x05 => Ok(Self::Create),
            0x06 => Ok(Self::Close),
            0x07 => Ok(Self::Flush),
            0x08 => Ok(Self::Read),
            0x09 => Ok(Self::Write),
            0x0A => Ok(Self::Lock),
            0x0B => Ok(Self::Ioctl),
            0x0C => Ok(Self::Cancel),
            0x0D => Ok(Self::Echo),
            0x0E => Ok(Self::QueryDirectory),
            0x0F => Ok(Self::ChangeNotify),
            0x10 => Ok(Self::QueryInfo),
            0x11 => Ok(Self::SetInfo),
            0x12 => Ok(Self::OplockBreak),
            _ => Err(crate::Error::MalformedMessage(format!(
                "Invalid SMB2 command: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Command {
    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

bitflags! {
    /// SMB2 negotiate security mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SecurityMode: u16 {
        const SIGNING_ENABLED = 0x0001;
        const SIGNING_REQUIRED = 0x0002;
    }
}

bitflags! {
    /// SMB2 capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Smb2Capabilities: u32 {
        const DFS = 0x00000001;
        const LEASING = 0x00000002;
        const LARGE_MTU = 0x00000004;
        const MULTI_CHANNEL = 0x00000008;
        const PERSISTENT_HANDLES = 0x00000010;
        const DIRECTORY_LEASING = 0x00000020;
        const ENCRYPTION = 0x00000040;
    }
}

bitflags! {
    /// Session flags returned by SESSION_SETUP
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SessionFlags: u16 {
        const IS_GUEST = 0x0001;
        const IS_NULL = 0x0002;
        const ENCRYPT_DATA = 0x0004;
    }
}

/// Share type returned by TREE_CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareType {
    Disk,
    Pipe,
    Print,
    Other(u8),
}

impl ShareType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => ShareType::Disk,
            0x02 => ShareType::Pipe,
            0x03 => ShareType::Print,
            other => ShareType::Other(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            ShareType::Disk => 0x01,
            ShareType::Pipe => 0x02,
            ShareType::Print => 0x03,
            ShareType::Other(value) => value,
        }
    }
}

bitflags! {
    /// Share flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShareFlags: u32 {
        const DFS = 0x00000001;
        const DFS_ROOT = 0x00000002;
        const AUTO_CACHING = 0x00000010;
        const VDO_CACHING = 0x00000020;
        const NO_CACHING = 0x00000030;
        const RESTRICT_EXCLUSIVE_OPENS = 0x00000100;
        const FORCE_SHARED_DELETE = 0x00000200;
        const ALLOW_NAMESPACE_CACHING = 0x00000400;
        const ACCESS_BASED_DIRECTORY_ENUM = 0x00000800;
        const FORCE_LEVELII_OPLOCK = 0x00001000;
        const ENABLE_HASH_V1 = 0x00002000;
        const ENABLE_HASH_V2 = 0x00004000;
        const ENCRYPT_DATA = 0x00008000;
    }
}

bitflags! {
    /// Share capabilities
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ShareCapabilities: u32 {
        const DFS = 0x00000008;
        const CONTINUOUS_AVAILABILITY = 0x00000010;
        const SCALEOUT = 0x00000020;
        const CLUSTER = 0x00000040;
        const ASYMMETRIC = 0x00000080;
    }
}

/// SMB2 dialect versions spoken by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum Smb2Dialect {
    Smb202 = 0x0202,
    Smb210 = 0x0210,
    Smb300 = 0x0300,
    Smb302 = 0x0302,
}

impl TryFrom<u16> for Smb2Dialect {
    type Error = crate::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0202 => Ok(Self::Smb202),
            0x0210 => Ok(Self::Smb210),
            0x0300 => Ok(Self::Smb300),
            0x0302 => Ok(Self::Smb302),
            _ => Err(crate::Error::MalformedMessage(format!(
                "Unknown SMB2 dialect: 0x{:04x}",
                value
            ))),
        }
    }
}

impl Smb2Dialect {
    pub const ALL: [Smb2Dialect; 4] = [
        Smb2Dialect::Smb202,
        Smb2Dialect::Smb210,
        Smb2Dialect::Smb300,
        Smb2Dialect::Smb302,
    ];

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// SMB 3.x signs with AES-CMAC and a derived key
    pub fn is_smb3(self) -> bool {
        self >= Smb2Dialect::Smb300
    }

    /// Header CreditCharge is only meaningful from 2.1 on
    pub fn uses_credit_charge(self) -> bool {
        self >= Smb2Dialect::Smb210
    }
}

impl fmt::Display for Smb2Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Smb2Dialect::Smb202 => "2.0.2",
            Smb2Dialect::Smb210 => "2.1",
            Smb2Dialect::Smb300 => "3.0",
            Smb2Dialect::Smb302 => "3.0.2",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Smb2Dialect {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "2.0.2" | "2.02" | "2.0" => Ok(Smb2Dialect::Smb202),
            "2.1" | "2.10" => Ok(Smb2Dialect::Smb210),
            "3.0" | "3.00" => Ok(Smb2Dialect::Smb300),
            "3.0.2" | "3.02" => Ok(Smb2Dialect::Smb302),
            other => Err(crate::Error::InvalidParameter(format!(
                "unsupported dialect '{}'",
                other
            ))),
        }
    }
}

bitflags! {
    /// SMB2 close flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CloseFlags: u16 {
        const POSTQUERY_ATTRIB = 0x0001;
    }
}

bitflags! {
    /// SMB2 write flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WriteFlags: u32 {
        const WRITE_THROUGH       = 0x00000001;
        const WRITE_UNBUFFERED    = 0x00000002;
    }
}
