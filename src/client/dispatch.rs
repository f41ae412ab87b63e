//! Request dispatch and response correlation for one connection.
//!
//! Every request gets a fresh message ID and an entry in the pending table
//! before its frame is written. A single receive task decodes incoming frames
//! and completes the matching entry. Callers wait on their own completion
//! slot with a deadline, so a stalled request never blocks the others.

use super::lock;
use super::negotiate::NegotiationState;
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::smb2_constants::Smb2Command;
use crate::protocol::{decode, encode, Message, Signer, Smb2Header};
use crate::transport::{FrameReader, FrameSink};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Message ID the server uses for unsolicited notifications
const UNSOLICITED_MESSAGE_ID: u64 = u64::MAX;

/// Ceiling on credits held locally
const MAX_CREDITS: usize = 512;

/// What a pending request belongs to, for scoped teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    pub session_id: u64,
    pub tree_id: Option<u32>,
    pub handle: Option<u64>,
}

impl Scope {
    pub fn connection() -> Self {
        Self::session(0)
    }

    pub fn session(session_id: u64) -> Self {
        Self {
            session_id,
            tree_id: None,
            handle: None,
        }
    }

    pub fn tree(session_id: u64, tree_id: u32) -> Self {
        Self {
            session_id,
            tree_id: Some(tree_id),
            handle: None,
        }
    }

    pub fn handle(session_id: u64, tree_id: u32, handle: u64) -> Self {
        Self {
            session_id,
            tree_id: Some(tree_id),
            handle: Some(handle),
        }
    }
}

/// A decoded response and the bytes it arrived as
#[derive(Debug, Clone)]
pub struct Response {
    pub message: Message,
    pub raw: Bytes,
}

impl Response {
    pub fn header(&self) -> &Smb2Header {
        &self.message.header
    }
}

struct Handshake {
    state: NegotiationState,
    running: bool,
}

/// Holds the connection's handshake slot until dropped
pub struct HandshakeGuard<'a> {
    dispatcher: &'a Dispatcher,
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        lock(&self.dispatcher.handshake).running = false;
    }
}

struct PendingRequest {
    command: Smb2Command,
    scope: Scope,
    deadline: Instant,
    slot: oneshot::Sender<Result<Response>>,
}

/// Shared state of one connection's request pipeline
pub struct Dispatcher {
    writer: tokio::sync::Mutex<Box<dyn FrameSink>>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    next_message_id: AtomicU64,
    credits: Semaphore,
    credit_request: u16,
    credit_charge: AtomicBool,
    signer: RwLock<Option<Signer>>,
    signing_required: AtomicBool,
    failure: Mutex<Option<Error>>,
    handshake: Mutex<Handshake>,
    default_timeout: Duration,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Take over both halves of a connection and start the receive task
    pub fn start<R, W>(reader: FrameReader<R>, writer: W, config: &ClientConfig) -> Arc<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: FrameSink + 'static,
    {
        let dispatcher = Arc::new(Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            next_message_id: AtomicU64::new(0),
            credits: Semaphore::new(1),
            credit_request: config.credit_request.max(1),
            credit_charge: AtomicBool::new(false),
            signer: RwLock::new(None),
            signing_required: AtomicBool::new(false),
            failure: Mutex::new(None),
            handshake: Mutex::new(Handshake {
                state: NegotiationState::Disconnected,
                running: false,
            }),
            default_timeout: config.request_timeout(),
            receive_task: Mutex::new(None),
        });

        let task = tokio::spawn(receive_loop(reader, Arc::downgrade(&dispatcher)));
        *lock(&dispatcher.receive_task) = Some(task);
        dispatcher
    }

    /// Claim the one handshake this connection allows
    pub fn begin_handshake(&self) -> Result<HandshakeGuard<'_>> {
        let mut handshake = lock(&self.handshake);
        if handshake.running {
            return Err(Error::HandshakeInProgress);
        }
        if handshake.state != NegotiationState::Disconnected {
            return Err(Error::InvalidState(format!(
                "cannot negotiate in state {:?}",
                handshake.state
            )));
        }
        handshake.running = true;
        Ok(HandshakeGuard { dispatcher: self })
    }

    pub fn handshake_state(&self) -> NegotiationState {
        lock(&self.handshake).state
    }

    pub(crate) fn set_handshake_state(&self, state: NegotiationState) {
        debug!("negotiation state -> {:?}", state);
        lock(&self.handshake).state = state;
    }

    /// Sign requests and verify responses of the authenticated session
    pub fn set_signer(&self, signer: Option<Signer>, required: bool) {
        *self.signer.write().unwrap_or_else(|e| e.into_inner()) = signer;
        self.signing_required.store(required, Ordering::SeqCst);
    }

    pub fn is_signing(&self) -> bool {
        self.signer
            .read()
            .map(|signer| signer.is_some())
            .unwrap_or(false)
    }

    /// Set CreditCharge on outgoing headers (SMB 2.1 and later)
    pub fn set_credit_charge(&self, enabled: bool) {
        self.credit_charge.store(enabled, Ordering::SeqCst);
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Error that ended the connection, if it has ended
    pub fn failure(&self) -> Option<Error> {
        lock(&self.failure).as_ref().map(Error::replicate)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Send a request and wait for its response
    pub async fn call(
        self: &Arc<Self>,
        message: Message,
        scope: Scope,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.submit(message, scope, timeout).await?.wait().await
    }

    /// Send a request; the returned handle waits for the response
    pub async fn submit(
        self: &Arc<Self>,
        mut message: Message,
        scope: Scope,
        timeout: Option<Duration>,
    ) -> Result<PendingResponse> {
        if let Some(failure) = self.failure() {
            return Err(failure);
        }
        let deadline = Instant::now() + timeout.unwrap_or(self.default_timeout);

        let permit = timeout_at(deadline, self.credits.acquire())
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| self.failure().unwrap_or(Error::Disconnected))?;

        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        let command = message.header.command;
        message.header.message_id = message_id;
        message.header.credits = self.credit_request;
        if self.credit_charge.load(Ordering::SeqCst) {
            message.header.credit_charge = 1;
        }

        let mut bytes = encode(&message)?;
        if message.header.session_id != 0 {
            let signer = self.signer.read().unwrap_or_else(|e| e.into_inner());
            if let Some(signer) = signer.as_ref() {
                signer.sign(&mut bytes)?;
            }
        }

        let (slot, rx) = oneshot::channel();
        lock(&self.pending).insert(
            message_id,
            PendingRequest {
                command,
                scope,
                deadline,
                slot,
            },
        );
        let pending = PendingResponse {
            dispatcher: Arc::clone(self),
            message_id,
            deadline,
            rx: Some(rx),
        };

        debug!("-> {:?} mid={} ({} bytes)", command, message_id, bytes.len());
        let written = {
            let mut writer = match timeout_at(deadline, self.writer.lock()).await {
                Ok(writer) => writer,
                Err(_) => return Err(Error::Timeout),
            };
            writer.send_frame(&bytes).await
        };
        if let Err(e) = written {
            let failure = self.fail_connection(e);
            return Err(failure);
        }
        // spent only once the frame is on the wire
        permit.forget();
        Ok(pending)
    }

    /// Fail every pending request selected by `matches` with `error()`
    pub fn fail_scope(&self, matches: impl Fn(&Scope) -> bool, error: impl Fn() -> Error) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, request)| matches(&request.scope))
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = drained.len();
        for request in drained {
            let _ = request.slot.send(Err(error()));
        }
        count
    }

    /// Close the connection locally; pending requests fail with `Cancelled`
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut failure = lock(&self.failure);
            if failure.is_none() {
                *failure = Some(Error::Disconnected);
            }
        }
        self.credits.close();
        self.fail_scope(|_| true, || Error::Cancelled);
        if let Some(task) = lock(&self.receive_task).take() {
            task.abort();
        }
        self.writer.lock().await.shutdown().await
    }

    /// Record a fatal error and fail everything still waiting
    fn fail_connection(&self, error: Error) -> Error {
        let error = match error {
            Error::Disconnected => Error::ConnectionLost("server closed the connection".into()),
            Error::Io(e) => Error::ConnectionLost(e.to_string()),
            other => other,
        };
        {
            let mut failure = lock(&self.failure);
            if failure.is_some() {
                return error;
            }
            warn!("connection failed: {}", error);
            *failure = Some(error.replicate());
        }
        self.credits.close();
        let failed = self.fail_scope(|_| true, || error.replicate());
        if failed > 0 {
            info!("failed {} pending requests", failed);
        }
        error
    }

    fn unregister(&self, message_id: u64) -> Option<PendingRequest> {
        lock(&self.pending).remove(&message_id)
    }

    fn grant(&self, credits: u16) {
        let available = self.credits.available_permits();
        let grant = usize::from(credits).min(MAX_CREDITS.saturating_sub(available));
        if grant > 0 {
            self.credits.add_permits(grant);
        }
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<PendingRequest> = {
            let mut pending = lock(&self.pending);
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, request)| request.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        for request in expired {
            debug!("{:?} expired", request.command);
            let _ = request.slot.send(Err(Error::Timeout));
        }
    }

    /// Route one received frame to its waiting request
    fn correlate(&self, raw: Bytes) -> Result<()> {
        let message = decode(&raw)?;
        let header = &message.header;
        if !header.is_response() {
            return Err(Error::ProtocolViolation(format!(
                "server sent a {:?} request",
                header.command
            )));
        }

        self.grant(header.credits);
        self.sweep_expired();

        if header.message_id == UNSOLICITED_MESSAGE_ID {
            debug!("ignoring unsolicited {:?}", header.command);
            return Ok(());
        }
        if header.is_interim() {
            debug!(
                "<- {:?} mid={} pending, async id {:?}",
                header.command,
                header.message_id,
                header.async_id()
            );
            return Ok(());
        }

        let Some(request) = self.unregister(header.message_id) else {
            warn!(
                "dropping response with unmatched message id {} ({:?})",
                header.message_id, header.command
            );
            return Ok(());
        };
        debug!(
            "<- {:?} mid={} status={}",
            header.command,
            header.message_id,
            header.nt_status()
        );

        let result = if request.command != header.command {
            Err(Error::ProtocolViolation(format!(
                "{:?} response to a {:?} request",
                header.command, request.command
            )))
        } else {
            self.check_signature(header, &raw)
                .map(|()| Response { message, raw })
        };
        let _ = request.slot.send(result);
        Ok(())
    }

    fn check_signature(&self, header: &Smb2Header, raw: &[u8]) -> Result<()> {
        if header.session_id == 0 {
            return Ok(());
        }
        let signer = self.signer.read().unwrap_or_else(|e| e.into_inner());
        let Some(signer) = signer.as_ref() else {
            return Ok(());
        };
        if header.is_signed() {
            signer.verify(raw).map_err(|e| {
                warn!("bad signature on {:?} mid={}", header.command, header.message_id);
                e
            })
        } else if self.signing_required.load(Ordering::SeqCst) && header.nt_status().is_success() {
            Err(Error::SigningError(format!(
                "unsigned {:?} response on a signed session",
                header.command
            )))
        } else {
            Ok(())
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.receive_task).take() {
            task.abort();
        }
    }
}

async fn receive_loop<R>(mut reader: FrameReader<R>, dispatcher: Weak<Dispatcher>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let failure = loop {
        let frame = match reader.read_frame().await {
            Ok(frame) => frame,
            Err(e) => break e,
        };
        let Some(dispatcher) = dispatcher.upgrade() else {
            return;
        };
        if let Err(e) = dispatcher.correlate(frame) {
            break e;
        }
    };

    if let Some(dispatcher) = dispatcher.upgrade() {
        dispatcher.fail_connection(failure);
    }
}

/// Completion slot of one submitted request
///
/// Dropping it without waiting unregisters the request; a response arriving
/// later is dropped as unmatched.
pub struct PendingResponse {
    dispatcher: Arc<Dispatcher>,
    message_id: u64,
    deadline: Instant,
    rx: Option<oneshot::Receiver<Result<Response>>>,
}

impl PendingResponse {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Wait for the response until the request deadline
    pub async fn wait(mut self) -> Result<Response> {
        let Some(mut rx) = self.rx.take() else {
            return Err(Error::Cancelled);
        };
        match timeout_at(self.deadline, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self
                .dispatcher
                .failure()
                .unwrap_or_else(|| Error::ConnectionLost("dispatcher stopped".into()))),
            Err(_) => {
                if self.dispatcher.unregister(self.message_id).is_some() {
                    debug!("mid={} timed out", self.message_id);
                    return Err(Error::Timeout);
                }
                rx.try_recv().unwrap_or(Err(Error::Timeout))
            }
        }
    }

    /// Give up on the response
    pub fn cancel(mut self) -> Result<()> {
        self.rx = None;
        if let Some(request) = self.dispatcher.unregister(self.message_id) {
            let _ = request.slot.send(Err(Error::Cancelled));
        }
        Ok(())
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.dispatcher.unregister(self.message_id);
        }
    }
}
