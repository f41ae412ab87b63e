//! TCP connection for SMB

use super::{FrameReader, FrameWriter, SmbTransport, TransportConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// One live framed connection
pub struct Connection<S> {
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    remote_addr: Option<SocketAddr>,
}

/// Open a TCP connection to an SMB server
pub async fn connect(addr: SocketAddr, config: &TransportConfig) -> Result<Connection<TcpStream>> {
    debug!("Connecting to {}", addr);

    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Connect(format!("{}: connect timed out", addr)))?
        .map_err(|e| Error::Connect(format!("{}: {}", addr, e)))?;
    stream.set_nodelay(true)?;

    let mut conn = Connection::from_stream(stream, config.max_frame_size);
    conn.remote_addr = Some(addr);
    Ok(conn)
}

impl<S: AsyncRead + AsyncWrite + Send + 'static> Connection<S> {
    /// Wrap an already connected stream
    pub fn from_stream(stream: S, max_frame_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half, max_frame_size),
            writer: FrameWriter::new(write_half, max_frame_size),
            remote_addr: None,
        }
    }

    /// Split into halves so receiving and sending can run on different tasks
    pub fn into_split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Send + 'static> SmbTransport for Connection<S> {
    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.write_frame(payload).await
    }

    async fn receive(&mut self) -> Result<Bytes> {
        self.reader.read_frame().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}
