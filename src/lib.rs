//! SMB2/3 client protocol engine
//!
//! Framing, message codec, dialect negotiation, NTLM authentication,
//! message signing, and session, share and file operations on top of tokio.
//! Shares are enumerated through the srvsvc RPC service on IPC$.

#![allow(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod transport;

#[cfg(feature = "client")]
pub mod client;

#[cfg(all(test, feature = "client"))]
mod e2e_tests;

pub use error::{Error, Result};
