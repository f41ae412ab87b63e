//! Transport layer for the SMB client
//!
//! Owns one reliable byte stream, frames outgoing and incoming messages with a
//! 4-byte length prefix and performs no protocol interpretation.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub mod frame;
pub mod tcp;

pub use frame::{
    encode_frame, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE,
};
pub use tcp::{connect, Connection};

/// Transport settings
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// Largest frame accepted or sent
    pub max_frame_size: usize,
    /// Bound on establishing the TCP connection
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Trait for framed SMB transport implementations
#[async_trait]
pub trait SmbTransport: Send {
    /// Send one framed message
    async fn send(&mut self, payload: &[u8]) -> Result<()>;

    /// Receive the next complete message
    async fn receive(&mut self) -> Result<Bytes>;

    /// Close the connection
    async fn close(&mut self) -> Result<()>;
}

/// Sending half of a split connection
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, payload: &[u8]) -> Result<()>;

    async fn shutdown(&mut self) -> Result<()>;
}
