//! Length-prefixed framing for SMB over a byte stream
//!
//! Every message travels as a 4-byte big-endian length followed by the payload.
//! For payloads below 16 MiB this is byte-identical to direct-TCP session
//! service framing, whose leading type byte is zero.

use super::FrameSink;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default ceiling for a single frame (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 8192;

/// Validate a declared frame length against the configured maximum
pub fn check_frame_length(length: usize, max_frame_size: usize) -> Result<()> {
    if length == 0 {
        return Err(Error::ProtocolViolation("zero-length frame".into()));
    }
    if length > max_frame_size {
        return Err(Error::ProtocolViolation(format!(
            "frame length {} exceeds maximum {}",
            length, max_frame_size
        )));
    }
    Ok(())
}

/// Prefix `payload` with its length
pub fn encode_frame(payload: &[u8], max_frame_size: usize) -> Result<Bytes> {
    check_frame_length(payload.len(), max_frame_size)?;

    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Reading half: accumulates partial reads until a whole frame is buffered
pub struct FrameReader<R> {
    inner: R,
    read_buffer: BytesMut,
    max_frame_size: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            read_buffer: BytesMut::with_capacity(65536),
            max_frame_size,
        }
    }

    /// Take one complete frame out of the buffer, if there is one
    pub fn try_decode(&mut self) -> Result<Option<Bytes>> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; FRAME_HEADER_SIZE];
        prefix.copy_from_slice(&self.read_buffer[..FRAME_HEADER_SIZE]);
        let length = u32::from_be_bytes(prefix) as usize;
        check_frame_length(length, self.max_frame_size)?;

        let total_size = FRAME_HEADER_SIZE + length;
        if self.read_buffer.len() < total_size {
            self.read_buffer.reserve(total_size - self.read_buffer.len());
            return Ok(None);
        }

        let mut frame = self.read_buffer.split_to(total_size);
        let payload = frame.split_off(FRAME_HEADER_SIZE);
        Ok(Some(payload.freeze()))
    }

    /// Wait for the next complete frame
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        loop {
            if let Some(frame) = self.try_decode()? {
                return Ok(frame);
            }
            self.read_more().await?;
        }
    }

    /// Read more data from the stream into the buffer
    async fn read_more(&mut self) -> Result<usize> {
        self.read_buffer.reserve(READ_CHUNK);
        let n = self.inner.read_buf(&mut self.read_buffer).await?;
        if n == 0 {
            if self.read_buffer.is_empty() {
                return Err(Error::Disconnected);
            }
            return Err(Error::ConnectionLost(format!(
                "peer closed with {} bytes of a partial frame buffered",
                self.read_buffer.len()
            )));
        }
        Ok(n)
    }

    /// Bytes received but not yet returned as a frame
    pub fn buffered(&self) -> usize {
        self.read_buffer.len()
    }
}

/// Writing half
pub struct FrameWriter<W> {
    inner: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
        }
    }

    /// Write one framed message
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let frame = encode_frame(payload, self.max_frame_size)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for FrameWriter<W> {
    async fn send_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.write_frame(payload).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        FrameWriter::shutdown(self).await
    }
}
