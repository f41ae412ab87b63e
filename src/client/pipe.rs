//! Named pipes on IPC$, used as a DCE/RPC transport

use super::file::{FileHandle, OpenMode};
use super::tree::Tree;
use crate::error::{Error, Result};
use crate::rpc::packet::frag_length;
use crate::rpc::{RpcTransport, MAX_FRAGMENT};
use async_trait::async_trait;
use tracing::debug;

/// An open pipe. Bytes read past the end of one PDU are kept for the next.
#[derive(Debug)]
pub struct NamedPipe {
    file: FileHandle,
    pending: Vec<u8>,
}

impl NamedPipe {
    /// Open `name` (for example `srvsvc`) on an IPC$ tree
    pub async fn open(tree: &Tree, name: &str) -> Result<Self> {
        let file = tree.open_file(name, OpenMode::ReadWrite).await?;
        debug!("opened pipe {} as handle {}", name, file.id());
        Ok(Self {
            file,
            pending: Vec::new(),
        })
    }

    fn take_pdu(&mut self) -> Option<Vec<u8>> {
        let len = frag_length(&self.pending)?;
        if len == 0 || self.pending.len() < len {
            return None;
        }
        let rest = self.pending.split_off(len);
        Some(std::mem::replace(&mut self.pending, rest))
    }
}

#[async_trait]
impl RpcTransport for NamedPipe {
    async fn send(&mut self, pdu: &[u8]) -> Result<()> {
        let written = self.file.write(0, pdu).await?;
        if written != pdu.len() {
            return Err(Error::ProtocolViolation(format!(
                "pipe took {} of {} bytes",
                written,
                pdu.len()
            )));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(pdu) = self.take_pdu() {
                return Ok(pdu);
            }
            if frag_length(&self.pending) == Some(0) {
                return Err(Error::MalformedMessage("RPC fragment length 0".into()));
            }
            let (data, more) = self.file.read_message(MAX_FRAGMENT as u32).await?;
            if data.is_empty() && !more {
                return Err(Error::ProtocolViolation(
                    "pipe ran dry inside an RPC fragment".into(),
                ));
            }
            self.pending.extend_from_slice(&data);
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.file.close().await
    }
}
