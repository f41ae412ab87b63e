//! DCE/RPC client over SMB named pipes
//!
//! Only what share enumeration needs: an unauthenticated bind with one
//! NDR20 presentation context, fragmented requests and reassembled
//! responses.

pub mod ndr;
pub mod packet;
pub mod srvsvc;

use crate::error::{Error, Result};
use async_trait::async_trait;
use packet::{
    fragments, parse_bind_nak, parse_fault, BindAck, BindPacket, PacketType, RequestPacket,
    ResponsePacket, RpcHeader, SyntaxId, NDR_SYNTAX,
};
use tracing::debug;

/// Fragment size offered in BIND for both directions
pub const MAX_FRAGMENT: u16 = 4280;

/// An RPC interface the client can bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcInterface {
    pub name: &'static str,
    pub syntax: SyntaxId,
}

/// Carries whole PDUs between client and server
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Write one PDU
    async fn send(&mut self, pdu: &[u8]) -> Result<()>;

    /// Next complete PDU from the server
    async fn receive(&mut self) -> Result<Vec<u8>>;

    async fn close(&mut self) -> Result<()>;
}

/// RPC client over transport
pub struct RpcClient {
    transport: Box<dyn RpcTransport>,
    next_call_id: u32,
    max_xmit_frag: u16,
    bound: Option<(u16, RpcInterface)>,
}

impl RpcClient {
    pub fn new(transport: Box<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_call_id: 1,
            max_xmit_frag: MAX_FRAGMENT,
            bound: None,
        }
    }

    fn next_call_id(&mut self) -> u32 {
        let id = self.next_call_id;
        self.next_call_id = self.next_call_id.wrapping_add(1).max(1);
        id
    }

    /// Receive the next PDU and check it answers `call_id`
    async fn receive_for(&mut self, call_id: u32) -> Result<(RpcHeader, Vec<u8>)> {
        let pdu = self.transport.receive().await?;
        let header = RpcHeader::parse(&pdu)?;
        if header.call_id != call_id {
            return Err(Error::ProtocolViolation(format!(
                "RPC reply for call {} while waiting on {}",
                header.call_id, call_id
            )));
        }
        Ok((header, pdu))
    }

    /// Bind to an interface
    pub async fn bind(&mut self, interface: RpcInterface) -> Result<()> {
        if self.bound.is_some() {
            return Err(Error::InvalidState("RPC client already bound".into()));
        }
        let call_id = self.next_call_id();
        let context_id = 0;
        let bind = BindPacket::new(call_id, context_id, interface.syntax, MAX_FRAGMENT);
        self.transport.send(&bind.serialize()?).await?;

        let (header, pdu) = self.receive_for(call_id).await?;
        match header.packet_type {
            PacketType::BindAck => {
                let ack = BindAck::parse(&pdu)?;
                if !ack.accepted() {
                    return Err(Error::Rpc(format!(
                        "{} bind rejected (result {}, reason {})",
                        interface.name, ack.result, ack.reason
                    )));
                }
                if ack.transfer_syntax != NDR_SYNTAX {
                    return Err(Error::ProtocolViolation(format!(
                        "{} bind accepted an unoffered transfer syntax",
                        interface.name
                    )));
                }
                // the server's receive limit caps what we send
                self.max_xmit_frag = ack.max_recv_frag.min(MAX_FRAGMENT);
                debug!(
                    "bound {} at {:?}, fragments up to {}",
                    interface.name, ack.secondary_address, self.max_xmit_frag
                );
                self.bound = Some((context_id, interface));
                Ok(())
            }
            PacketType::BindNak => Err(Error::Rpc(format!(
                "{} bind refused, reason {}",
                interface.name,
                parse_bind_nak(&pdu)?
            ))),
            other => Err(Error::ProtocolViolation(format!(
                "{:?} in reply to bind",
                other
            ))),
        }
    }

    /// Make an RPC call, returning the reassembled response stub
    pub async fn call(&mut self, opnum: u16, stub: &[u8]) -> Result<Vec<u8>> {
        let Some((context_id, interface)) = self.bound else {
            return Err(Error::InvalidState("RPC call before bind".into()));
        };
        let call_id = self.next_call_id();
        let alloc_hint = u32::try_from(stub.len())
            .map_err(|_| Error::InvalidParameter("RPC stub too large".into()))?;

        for (flags, piece) in fragments(stub, self.max_xmit_frag) {
            let request = RequestPacket {
                call_id,
                flags,
                alloc_hint,
                context_id,
                opnum,
                stub: piece.to_vec(),
            };
            self.transport.send(&request.serialize()?).await?;
        }

        let mut reply = Vec::new();
        loop {
            let (header, pdu) = self.receive_for(call_id).await?;
            match header.packet_type {
                PacketType::Response => {
                    let response = ResponsePacket::parse(&pdu)?;
                    if reply.is_empty() {
                        reply.reserve((response.alloc_hint as usize).min(1 << 20));
                    }
                    reply.extend_from_slice(&response.stub);
                    if header.is_last() {
                        break;
                    }
                }
                PacketType::Fault => {
                    return Err(Error::Rpc(format!(
                        "{} opnum {} faulted with 0x{:08x}",
                        interface.name,
                        opnum,
                        parse_fault(&pdu)?
                    )))
                }
                other => {
                    return Err(Error::ProtocolViolation(format!(
                        "{:?} in reply to request",
                        other
                    )))
                }
            }
        }
        debug!("{} opnum {} returned {} bytes", interface.name, opnum, reply.len());
        Ok(reply)
    }

    /// Close the RPC connection
    pub async fn close(mut self) -> Result<()> {
        self.transport.close().await
    }
}
