//! SMB2 wire protocol: header, message bodies, signing

pub mod header;
pub mod messages;
pub mod signing;
pub mod smb2_constants;

pub use header::Smb2Header;
pub use messages::{decode, encode, Body, Message};
pub use signing::Signer;
