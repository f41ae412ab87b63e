//! Authenticated sessions and the trees and handles they own.
//!
//! A [`Session`] is a cheap clonable reference. Trees and open files are
//! tracked in arenas keyed by tree ID and by a locally generated handle ID,
//! so closing a session, or one tree, can cascade without chasing
//! references held by callers.

use super::dispatch::{Dispatcher, PendingResponse, Response, Scope};
use super::lock;
use super::negotiate::{Established, ServerInfo};
use super::path::{Share, SmbServer};
use super::pipe::NamedPipe;
use super::tree::{Tree, TreeInfo};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::messages::{Body, FileId, Smb2TreeConnectRequest};
use crate::protocol::smb2_constants::{Smb2Command, Smb2Dialect};
use crate::protocol::Message;
use crate::rpc::srvsvc::{self, ShareInfo1};
use crate::rpc::RpcClient;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Largest READ/WRITE issued with a credit charge of one
const MAX_SINGLE_CREDIT_IO: u32 = 64 * 1024;

/// Deadline for best-effort messages sent during teardown
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub(crate) struct HandleRecord {
    pub tree_id: u32,
    pub file_id: FileId,
    pub path: String,
}

pub(crate) struct SessionInner {
    dispatcher: Arc<Dispatcher>,
    config: Arc<ClientConfig>,
    established: Established,
    server_name: String,
    trees: Mutex<HashMap<u32, Arc<TreeInfo>>>,
    handles: Mutex<HashMap<u64, HandleRecord>>,
    next_handle: AtomicU64,
    active: AtomicBool,
}

/// An authenticated session on one connection
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.established.session_id)
            .field("server", &self.inner.server_name)
            .field("user", &self.inner.established.username)
            .field("dialect", &self.inner.established.server.dialect)
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        dispatcher: Arc<Dispatcher>,
        config: Arc<ClientConfig>,
        established: Established,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                dispatcher,
                config,
                established,
                server_name: server_name.into(),
                trees: Mutex::new(HashMap::new()),
                handles: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                active: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.established.session_id
    }

    pub fn dialect(&self) -> Smb2Dialect {
        self.inner.established.server.dialect
    }

    pub fn server(&self) -> &ServerInfo {
        &self.inner.established.server
    }

    pub fn server_name(&self) -> &str {
        &self.inner.server_name
    }

    pub fn username(&self) -> &str {
        &self.inner.established.username
    }

    pub fn is_guest(&self) -> bool {
        self.inner.established.is_guest
    }

    pub fn is_signing(&self) -> bool {
        self.inner.established.signing
    }

    /// False after logoff, close or loss of the connection
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst) && self.inner.dispatcher.failure().is_none()
    }

    pub fn tree_count(&self) -> usize {
        lock(&self.inner.trees).len()
    }

    pub fn handle_count(&self) -> usize {
        lock(&self.inner.handles).len()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Bytes requested per READ
    pub fn read_chunk_size(&self) -> u32 {
        self.chunk_size(self.server().max_read_size)
    }

    /// Bytes sent per WRITE
    pub fn write_chunk_size(&self) -> u32 {
        self.chunk_size(self.server().max_write_size)
    }

    /// Output buffer for QUERY_DIRECTORY and QUERY_INFO
    pub fn transact_size(&self) -> u32 {
        self.chunk_size(self.server().max_transact_size)
    }

    fn chunk_size(&self, server_max: u32) -> u32 {
        self.inner
            .config
            .io_chunk_size
            .min(server_max.max(1))
            .min(MAX_SINGLE_CREDIT_IO)
    }

    /// Connect to `\\server\share`, or to a bare share name on this session's server
    pub async fn open_tree(&self, share_path: &str) -> Result<Tree> {
        let path = if share_path.starts_with("\\\\") {
            share_path.to_string()
        } else {
            format!(
                "\\\\{}\\{}",
                self.inner.server_name,
                share_path.trim_start_matches('\\')
            )
        };

        let request = self.request(
            Smb2Command::TreeConnect,
            0,
            Body::TreeConnectRequest(Smb2TreeConnectRequest::new(path.clone())),
        );
        let response = self.call(request, Scope::session(self.id()), None).await?;
        let tree_id = response.header().tree_id;
        let message = check_status(response, &path)?;
        let Body::TreeConnectResponse(body) = message.body else {
            return Err(Error::MalformedMessage("tree connect without body".into()));
        };

        let info = Arc::new(TreeInfo {
            path: path.clone(),
            share_type: body.share_type,
            share_flags: body.share_flags,
            capabilities: body.capabilities,
            maximal_access: body.maximal_access,
        });
        lock(&self.inner.trees).insert(tree_id, Arc::clone(&info));
        info!("connected tree {} to {}", tree_id, path);

        Ok(Tree::new(self.clone(), tree_id, info))
    }

    /// Disconnect a tree; its handles are dropped and its pending requests cancelled
    pub async fn close_tree(&self, tree: &Tree) -> Result<()> {
        let tree_id = tree.id();
        if lock(&self.inner.trees).remove(&tree_id).is_none() {
            return Ok(());
        }

        let dropped = {
            let mut handles = lock(&self.inner.handles);
            let before = handles.len();
            handles.retain(|_, record| record.tree_id != tree_id);
            before - handles.len()
        };
        let cancelled = self
            .inner
            .dispatcher
            .fail_scope(|scope| scope.tree_id == Some(tree_id), || Error::Cancelled);
        debug!(
            "tree {}: dropped {} handles, cancelled {} requests",
            tree_id, dropped, cancelled
        );

        let request = self.request(Smb2Command::TreeDisconnect, tree_id, Body::Empty);
        let response = self
            .call(request, Scope::session(self.id()), Some(TEARDOWN_TIMEOUT))
            .await?;
        check_status(response, tree.path())?;
        info!("disconnected tree {}", tree_id);
        Ok(())
    }

    /// Every share the server offers, administrative ones included;
    /// [`Share::is_hidden`] tells them apart
    pub async fn list_shares(&self) -> Result<Vec<Share>> {
        let server = SmbServer::new(self.server_name());
        Ok(self
            .share_info()
            .await?
            .into_iter()
            .map(|info| Share::new(server.clone(), info.name))
            .collect())
    }

    /// NetrShareEnum over the srvsvc pipe on IPC$
    pub async fn share_info(&self) -> Result<Vec<ShareInfo1>> {
        let ipc = self.open_tree("IPC$").await?;
        let listed = enumerate_shares(&ipc, self.server_name()).await;
        let disconnected = ipc.disconnect().await;
        let shares = listed?;
        disconnected?;
        info!("{} offers {} shares", self.server_name(), shares.len());
        Ok(shares)
    }

    /// Keep-alive round trip
    pub async fn echo(&self) -> Result<()> {
        let request = self.request(Smb2Command::Echo, 0, Body::Empty);
        let response = self.call(request, Scope::session(self.id()), None).await?;
        check_status(response, "echo").map(|_| ())
    }

    /// Send LOGOFF, then tear the session down and close the connection
    pub async fn logoff(&self) -> Result<()> {
        if !self.deactivate() {
            return Ok(());
        }
        let request = self.request(Smb2Command::Logoff, 0, Body::Empty);
        let logoff = self
            .inner
            .dispatcher
            .call(request, Scope::connection(), Some(TEARDOWN_TIMEOUT))
            .await;
        if let Err(e) = &logoff {
            debug!("logoff not acknowledged: {}", e);
        }
        self.inner.dispatcher.shutdown().await?;
        info!("session {:#x} logged off", self.id());
        logoff.and_then(|response| check_status(response, "logoff").map(|_| ()))
    }

    /// Tear the session down and close the connection without LOGOFF
    pub async fn close(&self) -> Result<()> {
        if !self.deactivate() {
            return Ok(());
        }
        self.inner.dispatcher.shutdown().await
    }

    /// Mark closed, drop every tree and handle, cancel session requests
    fn deactivate(&self) -> bool {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return false;
        }
        lock(&self.inner.handles).clear();
        lock(&self.inner.trees).clear();
        let session_id = self.id();
        self.inner
            .dispatcher
            .fail_scope(|scope| scope.session_id == session_id, || Error::Cancelled);
        true
    }

    pub(crate) fn request(&self, command: Smb2Command, tree_id: u32, body: Body) -> Message {
        let mut message = Message::request(command, body);
        message.header.session_id = self.id();
        message.header.tree_id = tree_id;
        message
    }

    pub(crate) async fn call(
        &self,
        message: Message,
        scope: Scope,
        timeout: Option<Duration>,
    ) -> Result<Response> {
        self.submit(message, scope, timeout).await?.wait().await
    }

    pub(crate) async fn submit(
        &self,
        message: Message,
        scope: Scope,
        timeout: Option<Duration>,
    ) -> Result<PendingResponse> {
        if let Some(failure) = self.inner.dispatcher.failure() {
            return Err(failure);
        }
        if !self.inner.active.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("session is closed".into()));
        }
        if let Some(tree_id) = scope.tree_id {
            if !lock(&self.inner.trees).contains_key(&tree_id) {
                return Err(match scope.handle {
                    Some(_) => Error::HandleInvalid,
                    None => Error::InvalidState(format!("tree {} is not connected", tree_id)),
                });
            }
        }
        if let Some(handle) = scope.handle {
            if !lock(&self.inner.handles).contains_key(&handle) {
                return Err(Error::HandleInvalid);
            }
        }
        self.inner.dispatcher.submit(message, scope, timeout).await
    }

    pub(crate) fn register_handle(&self, tree_id: u32, file_id: FileId, path: &str) -> u64 {
        let handle = self.inner.next_handle.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.handles).insert(
            handle,
            HandleRecord {
                tree_id,
                file_id,
                path: path.to_string(),
            },
        );
        handle
    }

    pub(crate) fn handle_record(&self, handle: u64) -> Result<HandleRecord> {
        lock(&self.inner.handles)
            .get(&handle)
            .cloned()
            .ok_or(Error::HandleInvalid)
    }

    /// Forget a handle and fail whatever is still in flight on it
    pub(crate) fn release_handle(&self, handle: u64) -> Option<HandleRecord> {
        let record = lock(&self.inner.handles).remove(&handle)?;
        self.inner
            .dispatcher
            .fail_scope(|scope| scope.handle == Some(handle), || Error::HandleInvalid);
        Some(record)
    }
}

/// Unwrap a response that must carry STATUS_SUCCESS
async fn enumerate_shares(ipc: &Tree, server_name: &str) -> Result<Vec<ShareInfo1>> {
    let pipe = NamedPipe::open(ipc, srvsvc::PIPE_NAME).await?;
    let mut rpc = RpcClient::new(Box::new(pipe));
    let result = match rpc.bind(srvsvc::SRVSVC).await {
        Ok(()) => srvsvc::net_share_enum(&mut rpc, server_name).await,
        Err(e) => Err(e),
    };
    let closed = rpc.close().await;
    let shares = result?;
    closed?;
    Ok(shares)
}

pub(crate) fn check_status(response: Response, context: &str) -> Result<Message> {
    let status = response.message.status();
    if status.is_success() {
        Ok(response.message)
    } else {
        Err(Error::from_status(
            response.message.header.command,
            status,
            context,
        ))
    }
}
