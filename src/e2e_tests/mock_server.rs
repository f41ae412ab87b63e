//! Scripted in-process SMB2 server
//!
//! Speaks just enough of the protocol to drive the client end to end:
//! dialect selection, NTLMv2 verification, signing, one in-memory share
//! tree, the srvsvc pipe on IPC$ and the file commands the client issues.
//! Tests steer it through [`MockControl`] to stall commands, inject stray
//! responses or drop the connection.

use crate::auth::ntlm::{NtlmAuthenticateMessage, NtlmChallengeMessage, NtlmNegotiateMessage};
use crate::auth::ntlm_crypto::{ntlmv2_hash, ntlmv2_proof, ntlmv2_session_key};
use crate::auth::spnego::{self, NegResult};
use crate::client::negotiate::select_dialect;
use crate::error::{NtStatus, Result};
use crate::protocol::messages::common::filetime_now;
use crate::protocol::messages::{
    Body, FileDirectoryInformation, FileDispositionInformation, FileId, FileInfoClass,
    FileNetworkOpenInformation, FileRenameInformation, FileStat, Smb2CloseResponse, Smb2CreateRequest, Smb2CreateResponse,
    Smb2ErrorResponse, Smb2NegotiateResponse, Smb2QueryDirectoryResponse, Smb2QueryInfoResponse,
    Smb2ReadResponse, Smb2SessionSetupResponse, Smb2SetInfoResponse, Smb2TreeConnectResponse,
    Smb2WriteResponse,
};
use crate::protocol::smb2_constants::{
    query_directory_flags, CreateDisposition, CreateOptions, DesiredAccess, FileAttributes,
    SecurityMode, SessionFlags, ShareType, Smb2Command, Smb2Dialect,
};
use crate::protocol::{decode, encode, Message, Signer, Smb2Header};
use crate::rpc::packet::{
    fragments, serialize_fault, BindAck, BindPacket, PacketType, RequestPacket, ResponsePacket,
    RpcHeader, NDR_SYNTAX,
};
use crate::rpc::srvsvc::{
    decode_share_enum_request, encode_share_enum_response, ShareInfo1, PIPE_NAME, SRVSVC,
    STYPE_SPECIAL,
};
use crate::transport::{Connection, SmbTransport, DEFAULT_MAX_FRAME_SIZE};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

pub const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
pub const SESSION_ID: u64 = 0x0000_4000_0000_0011;

/// How the server behaves for one connection
#[derive(Debug, Clone)]
pub struct MockOptions {
    pub dialects: Vec<Smb2Dialect>,
    pub username: String,
    pub password: String,
    pub domain: String,
    pub allow_guest: bool,
    pub require_signing: bool,
    pub shares: Vec<String>,
    /// Entries per QUERY_DIRECTORY response
    pub directory_batch: usize,
    pub max_read_size: u32,
    pub max_write_size: u32,
    /// Largest RPC fragment the server sends on a pipe
    pub rpc_fragment: u16,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            dialects: vec![Smb2Dialect::Smb210, Smb2Dialect::Smb300],
            username: "alice".into(),
            password: "Passw0rd".into(),
            domain: "TESTDOM".into(),
            allow_guest: true,
            require_signing: false,
            shares: vec!["Public".into()],
            directory_batch: 64,
            max_read_size: 1024 * 1024,
            max_write_size: 1024 * 1024,
            rpc_fragment: 4280,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub data: Vec<u8>,
    pub attributes: FileAttributes,
    pub created: u64,
}

impl Node {
    fn file(data: Vec<u8>) -> Self {
        Self {
            data,
            attributes: FileAttributes::ARCHIVE,
            created: filetime_now(),
        }
    }

    fn directory() -> Self {
        Self {
            data: Vec::new(),
            attributes: FileAttributes::DIRECTORY,
            created: filetime_now(),
        }
    }

    fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    fn stat(&self) -> FileStat {
        FileStat {
            creation_time: self.created,
            last_access_time: self.created,
            last_write_time: self.created,
            change_time: self.created,
            allocation_size: (self.data.len() as u64 + 4095) & !4095,
            end_of_file: self.data.len() as u64,
            attributes: self.attributes,
        }
    }
}

/// Knobs and observations shared between a test and its server
#[derive(Debug, Default)]
pub struct MockControl {
    /// Share contents keyed by backslash path; "" is the root
    pub files: Mutex<BTreeMap<String, Node>>,
    stalled: Mutex<HashSet<Smb2Command>>,
    stray_response: AtomicBool,
    drop_on: Mutex<Option<Smb2Command>>,
    received: Mutex<Vec<(Smb2Command, bool)>>,
}

impl MockControl {
    pub fn new() -> Arc<Self> {
        let control = Self::default();
        control
            .files
            .lock()
            .unwrap()
            .insert(String::new(), Node::directory());
        Arc::new(control)
    }

    pub fn add_file(&self, path: &str, data: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::file(data.to_vec()));
    }

    pub fn add_dir(&self, path: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), Node::directory());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).map(|n| n.data.clone())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    /// Never answer `command` until [`MockControl::resume`]
    pub fn stall(&self, command: Smb2Command) {
        self.stalled.lock().unwrap().insert(command);
    }

    pub fn resume(&self, command: Smb2Command) {
        self.stalled.lock().unwrap().remove(&command);
    }

    /// Precede the next response with one for a message ID nobody sent
    pub fn inject_stray_response(&self) {
        self.stray_response.store(true, Ordering::SeqCst);
    }

    /// Close the connection instead of answering `command`
    pub fn drop_connection_on(&self, command: Smb2Command) {
        *self.drop_on.lock().unwrap() = Some(command);
    }

    pub fn received(&self, command: Smb2Command) -> usize {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == command)
            .count()
    }

    /// Commands received with the SIGNED flag after authentication
    pub fn signed_requests(&self) -> usize {
        self.received.lock().unwrap().iter().filter(|(_, s)| *s).count()
    }

    /// Poll until `command` has been received `count` times
    pub async fn wait_for(&self, command: Smb2Command, count: usize) {
        for _ in 0..500 {
            if self.received(command) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("server never saw {} {:?} requests", count, command);
    }
}

struct OpenEntry {
    path: String,
    delete_pending: bool,
    listing: Option<VecDeque<FileDirectoryInformation>>,
    /// Unread RPC replies when the open is a pipe
    pipe: Option<Vec<u8>>,
}

struct ServerState {
    options: MockOptions,
    control: Arc<MockControl>,
    dialect: Option<Smb2Dialect>,
    signer: Option<Signer>,
    trees: HashMap<u32, String>,
    next_tree: u32,
    opens: HashMap<u64, OpenEntry>,
    next_file: u64,
}

/// Serve one connection until the client goes away
pub fn spawn<S>(stream: S, options: MockOptions, control: Arc<MockControl>) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut conn = Connection::from_stream(stream, DEFAULT_MAX_FRAME_SIZE);
        let mut state = ServerState {
            options,
            control,
            dialect: None,
            signer: None,
            trees: HashMap::new(),
            next_tree: 1,
            opens: HashMap::new(),
            next_file: 0x100,
        };
        while let Ok(frame) = conn.receive().await {
            let Ok(request) = decode(&frame) else {
                break;
            };
            let signed = request.header.is_signed();
            state
                .control
                .received
                .lock()
                .unwrap()
                .push((request.header.command, signed && state.signer.is_some()));

            if *state.control.drop_on.lock().unwrap() == Some(request.header.command) {
                let _ = conn.close().await;
                break;
            }
            if state
                .control
                .stalled
                .lock()
                .unwrap()
                .contains(&request.header.command)
            {
                continue;
            }

            let response = match state.check_request_signature(&request, &frame) {
                Some(denied) => denied,
                None => state.handle(&request),
            };
            if state.control.stray_response.swap(false, Ordering::SeqCst) {
                let mut stray = response.clone();
                stray.header.message_id = request.header.message_id + 10_000;
                if send(&mut conn, &state, stray).await.is_err() {
                    break;
                }
            }
            if send(&mut conn, &state, response).await.is_err() {
                break;
            }
        }
    })
}

async fn send<S>(conn: &mut Connection<S>, state: &ServerState, message: Message) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut bytes = encode(&message)?;
    if message.header.session_id != 0 {
        if let Some(signer) = &state.signer {
            signer.sign(&mut bytes)?;
        }
    }
    conn.send(&bytes).await
}

fn error(request: &Message, status: NtStatus) -> Message {
    Message::new(
        Smb2Header::response_to(&request.header, status),
        Body::Error(Smb2ErrorResponse::default()),
    )
}

fn reply(request: &Message, body: Body) -> Message {
    Message::new(Smb2Header::response_to(&request.header, NtStatus::Success), body)
}

fn reply_write(request: &Message, count: usize) -> Message {
    reply(
        request,
        Body::WriteResponse(Smb2WriteResponse {
            count: count as u32,
        }),
    )
}

/// Answer one client PDU on the srvsvc pipe
fn rpc_reply(pdu: &[u8], shares: &[ShareInfo1], fragment: u16) -> Option<Vec<u8>> {
    let header = RpcHeader::parse(pdu).ok()?;
    match header.packet_type {
        PacketType::Bind => {
            let bind = BindPacket::parse(pdu).ok()?;
            let accepted = bind.abstract_syntax == SRVSVC.syntax && bind.transfer_syntax == NDR_SYNTAX;
            BindAck {
                call_id: bind.call_id,
                max_xmit_frag: fragment,
                max_recv_frag: fragment,
                assoc_group: 0x53f0,
                secondary_address: format!("\\PIPE\\{}", PIPE_NAME),
                result: if accepted { 0 } else { 2 },
                reason: if accepted { 0 } else { 1 },
                transfer_syntax: NDR_SYNTAX,
            }
            .serialize()
            .ok()
        }
        PacketType::Request => {
            let request = RequestPacket::parse(pdu).ok()?;
            let level = decode_share_enum_request(&request.stub).ok().map(|(_, level)| level);
            if request.opnum != 15 || level != Some(1) {
                // nca_op_rng_error
                return serialize_fault(request.call_id, 0x1C01_0002).ok();
            }
            let stub = encode_share_enum_response(shares, 0).ok()?;
            let mut out = Vec::new();
            for (flags, piece) in fragments(&stub, fragment) {
                out.extend(
                    ResponsePacket::serialize(request.call_id, flags, stub.len() as u32, 0, piece)
                        .ok()?,
                );
            }
            Some(out)
        }
        _ => None,
    }
}

fn file_id(id: u64) -> FileId {
    FileId::with_values(id, id)
}

fn parent_of(path: &str) -> &str {
    path.rfind('\\').map(|at| &path[..at]).unwrap_or("")
}

fn name_of(path: &str) -> &str {
    path.rsplit('\\').next().unwrap_or(path)
}

impl ServerState {
    fn check_request_signature(&self, request: &Message, frame: &[u8]) -> Option<Message> {
        let signer = self.signer.as_ref()?;
        if request.header.session_id == 0 {
            return None;
        }
        if !request.header.is_signed() || signer.verify(frame).is_err() {
            return Some(error(request, NtStatus::AccessDenied));
        }
        None
    }

    fn handle(&mut self, request: &Message) -> Message {
        match &request.body {
            Body::NegotiateRequest(body) => {
                match select_dialect(&body.dialects, &self.options.dialects) {
                    Some(dialect) => {
                        self.dialect = Some(dialect);
                        let mut response = Smb2NegotiateResponse::new(dialect);
                        if self.options.require_signing {
                            response.security_mode |= SecurityMode::SIGNING_REQUIRED;
                        }
                        response.max_read_size = self.options.max_read_size;
                        response.max_write_size = self.options.max_write_size;
                        response.system_time = filetime_now();
                        response.security_blob = spnego::neg_result_token(NegResult::AcceptIncomplete);
                        reply(request, Body::NegotiateResponse(response))
                    }
                    None => error(request, NtStatus::NotSupported),
                }
            }
            Body::SessionSetupRequest(body) => self.session_setup(request, &body.security_blob, body.security_mode),
            Body::TreeConnectRequest(body) => {
                let share = name_of(&body.path);
                let is_ipc = share.eq_ignore_ascii_case("IPC$");
                if is_ipc
                    || self
                        .options
                        .shares
                        .iter()
                        .any(|known| known.eq_ignore_ascii_case(share))
                {
                    let tree_id = self.next_tree;
                    self.next_tree += 1;
                    self.trees.insert(tree_id, share.to_string());
                    let mut header = Smb2Header::response_to(&request.header, NtStatus::Success);
                    header.tree_id = tree_id;
                    let mut response = Smb2TreeConnectResponse::new(if is_ipc {
                        ShareType::Pipe
                    } else {
                        ShareType::Disk
                    });
                    response.maximal_access = DesiredAccess::FILE_ALL_ACCESS;
                    Message::new(header, Body::TreeConnectResponse(response))
                } else {
                    error(request, NtStatus::BadNetworkName)
                }
            }
            Body::Empty => match request.header.command {
                Smb2Command::TreeDisconnect => {
                    if self.trees.remove(&request.header.tree_id).is_some() {
                        reply(request, Body::Empty)
                    } else {
                        error(request, NtStatus::NetworkNameDeleted)
                    }
                }
                _ => reply(request, Body::Empty),
            },
            _ if !self.trees.contains_key(&request.header.tree_id) => {
                error(request, NtStatus::NetworkNameDeleted)
            }
            Body::CreateRequest(body) if self.on_ipc(request) => self.open_pipe(request, body),
            Body::CreateRequest(body) => self.create(request, body),
            Body::CloseRequest(body) => match self.opens.remove(&body.file_id.volatile) {
                Some(open) => {
                    let mut files = self.control.files.lock().unwrap();
                    if open.delete_pending {
                        files.remove(&open.path);
                    }
                    let stat = files.get(&open.path).map(Node::stat).unwrap_or_default();
                    reply(request, Body::CloseResponse(Smb2CloseResponse { flags: 0, stat }))
                }
                None => error(request, NtStatus::FileClosed),
            },
            Body::FlushRequest(body) => match self.opens.get(&body.file_id.volatile) {
                Some(_) => reply(request, Body::Empty),
                None => error(request, NtStatus::FileClosed),
            },
            Body::ReadRequest(body) => {
                let Some(open) = self.opens.get_mut(&body.file_id.volatile) else {
                    return error(request, NtStatus::FileClosed);
                };
                if let Some(pending) = open.pipe.as_mut() {
                    if pending.is_empty() {
                        return error(request, NtStatus::EndOfFile);
                    }
                    let take = (body.length as usize).min(pending.len());
                    let rest = pending.split_off(take);
                    let data = std::mem::replace(pending, rest);
                    let status = if pending.is_empty() {
                        NtStatus::Success
                    } else {
                        NtStatus::BufferOverflow
                    };
                    return Message::new(
                        Smb2Header::response_to(&request.header, status),
                        Body::ReadResponse(Smb2ReadResponse::new(data)),
                    );
                }
                let files = self.control.files.lock().unwrap();
                let data = files.get(&open.path).map(|n| n.data.as_slice()).unwrap_or(&[]);
                let start = body.offset as usize;
                if start >= data.len() {
                    return error(request, NtStatus::EndOfFile);
                }
                let end = (start + body.length as usize).min(data.len());
                reply(request, Body::ReadResponse(Smb2ReadResponse::new(data[start..end].to_vec())))
            }
            Body::WriteRequest(body) => {
                let server_shares = self.share_list();
                let fragment = self.options.rpc_fragment;
                let Some(open) = self.opens.get_mut(&body.file_id.volatile) else {
                    return error(request, NtStatus::FileClosed);
                };
                if let Some(pending) = open.pipe.as_mut() {
                    let Some(reply) = rpc_reply(&body.data, &server_shares, fragment) else {
                        return error(request, NtStatus::InvalidParameter);
                    };
                    pending.extend_from_slice(&reply);
                    return reply_write(request, body.data.len());
                }
                let mut files = self.control.files.lock().unwrap();
                let Some(node) = files.get_mut(&open.path) else {
                    return error(request, NtStatus::FileClosed);
                };
                let start = body.offset as usize;
                let end = start + body.data.len();
                if node.data.len() < end {
                    node.data.resize(end, 0);
                }
                node.data[start..end].copy_from_slice(&body.data);
                reply_write(request, body.data.len())
            }
            Body::QueryDirectoryRequest(body) => {
                let batch = self.options.directory_batch.max(1);
                let files = Arc::clone(&self.control);
                let Some(open) = self.opens.get_mut(&body.file_id.volatile) else {
                    return error(request, NtStatus::FileClosed);
                };
                if open.listing.is_none()
                    || body.flags & query_directory_flags::RESTART_SCANS != 0
                {
                    open.listing = Some(list_children(&files.files.lock().unwrap(), &open.path));
                }
                let listing = open.listing.get_or_insert_with(VecDeque::new);
                if listing.is_empty() {
                    return error(request, NtStatus::NoMoreFiles);
                }
                let take = batch.min(listing.len());
                let entries: Vec<_> = listing.drain(..take).collect();
                match FileDirectoryInformation::serialize_all(&entries) {
                    Ok(output_buffer) => reply(
                        request,
                        Body::QueryDirectoryResponse(Smb2QueryDirectoryResponse { output_buffer }),
                    ),
                    Err(_) => error(request, NtStatus::InsufficientResources),
                }
            }
            Body::QueryInfoRequest(body) => {
                let Some(open) = self.opens.get(&body.file_id.volatile) else {
                    return error(request, NtStatus::FileClosed);
                };
                if body.file_info_class != FileInfoClass::NetworkOpenInformation as u8 {
                    return error(request, NtStatus::NotSupported);
                }
                let files = self.control.files.lock().unwrap();
                let stat = files.get(&open.path).map(Node::stat).unwrap_or_default();
                match (FileNetworkOpenInformation { stat }).serialize() {
                    Ok(output_buffer) => reply(
                        request,
                        Body::QueryInfoResponse(Smb2QueryInfoResponse { output_buffer }),
                    ),
                    Err(_) => error(request, NtStatus::InsufficientResources),
                }
            }
            Body::SetInfoRequest(body) => {
                let Some(open) = self.opens.get_mut(&body.file_id.volatile) else {
                    return error(request, NtStatus::FileClosed);
                };
                if body.file_info_class == FileInfoClass::DispositionInformation as u8 {
                    let files = self.control.files.lock().unwrap();
                    let prefix = format!("{}\\", open.path);
                    if files.keys().any(|key| key.starts_with(&prefix)) {
                        return error(request, NtStatus::DirectoryNotEmpty);
                    }
                    let Ok(disposition) = FileDispositionInformation::parse(&body.buffer) else {
                        return error(request, NtStatus::InvalidParameter);
                    };
                    open.delete_pending = disposition.delete_pending;
                    return reply(request, Body::SetInfoResponse(Smb2SetInfoResponse));
                }
                if body.file_info_class == FileInfoClass::RenameInformation as u8 {
                    let Ok(rename) = FileRenameInformation::parse(&body.buffer) else {
                        return error(request, NtStatus::InvalidParameter);
                    };
                    let mut files = self.control.files.lock().unwrap();
                    if files.contains_key(&rename.file_name) && !rename.replace_if_exists {
                        return error(request, NtStatus::ObjectNameCollision);
                    }
                    if let Some(node) = files.remove(&open.path) {
                        files.insert(rename.file_name.clone(), node);
                    }
                    open.path = rename.file_name;
                    return reply(request, Body::SetInfoResponse(Smb2SetInfoResponse));
                }
                error(request, NtStatus::NotSupported)
            }
            _ => error(request, NtStatus::NotSupported),
        }
    }

    fn session_setup(&mut self, request: &Message, blob: &[u8], mode: SecurityMode) -> Message {
        let Ok(token) = spnego::unwrap_ntlm(blob) else {
            return error(request, NtStatus::LogonFailure);
        };

        if NtlmNegotiateMessage::parse(token).is_ok() {
            let challenge = NtlmChallengeMessage::new("MOCK", SERVER_CHALLENGE);
            let Ok(challenge) = challenge.serialize() else {
                return error(request, NtStatus::InsufficientResources);
            };
            let mut header =
                Smb2Header::response_to(&request.header, NtStatus::MoreProcessingRequired);
            header.session_id = SESSION_ID;
            let body = Smb2SessionSetupResponse::new().with_security_blob(spnego::wrap_challenge(&challenge));
            return Message::new(header, Body::SessionSetupResponse(body));
        }

        let Ok(auth) = NtlmAuthenticateMessage::parse(token) else {
            return error(request, NtStatus::LogonFailure);
        };
        let mut header = Smb2Header::response_to(&request.header, NtStatus::Success);
        header.session_id = SESSION_ID;

        if auth.user_name.eq_ignore_ascii_case("guest") && self.options.allow_guest {
            let mut body = Smb2SessionSetupResponse::new()
                .with_security_blob(spnego::neg_result_token(NegResult::AcceptCompleted));
            body.session_flags = SessionFlags::IS_GUEST;
            return Message::new(header, Body::SessionSetupResponse(body));
        }

        let session_key = (|| {
            if !auth.user_name.eq_ignore_ascii_case(&self.options.username)
                || auth.nt_response.len() <= 16
            {
                return None;
            }
            let hash = ntlmv2_hash(&auth.user_name, &auth.domain, &self.options.password).ok()?;
            let proof = ntlmv2_proof(&hash, &SERVER_CHALLENGE, &auth.nt_response[16..]).ok()?;
            if proof[..] != auth.nt_response[..16] {
                return None;
            }
            ntlmv2_session_key(&hash, &auth.nt_response).ok()
        })();
        let Some(session_key) = session_key else {
            return error(request, NtStatus::LogonFailure);
        };

        let signing =
            self.options.require_signing || mode.contains(SecurityMode::SIGNING_REQUIRED);
        if signing {
            let dialect = self.dialect.unwrap_or(Smb2Dialect::Smb202);
            self.signer = Signer::new(dialect, &session_key).ok();
        }
        let body = Smb2SessionSetupResponse::new()
            .with_security_blob(spnego::neg_result_token(NegResult::AcceptCompleted));
        Message::new(header, Body::SessionSetupResponse(body))
    }

    fn on_ipc(&self, request: &Message) -> bool {
        self.trees
            .get(&request.header.tree_id)
            .map(|share| share.eq_ignore_ascii_case("IPC$"))
            .unwrap_or(false)
    }

    /// Configured shares plus IPC$, as srvsvc reports them
    fn share_list(&self) -> Vec<ShareInfo1> {
        let mut shares: Vec<_> = self
            .options
            .shares
            .iter()
            .map(|name| ShareInfo1 {
                name: name.clone(),
                share_type: if name.ends_with('$') { STYPE_SPECIAL } else { 0 },
                comment: String::new(),
            })
            .collect();
        shares.push(ShareInfo1 {
            name: "IPC$".into(),
            share_type: STYPE_SPECIAL | 3,
            comment: "Remote IPC".into(),
        });
        shares
    }

    fn open_pipe(&mut self, request: &Message, body: &Smb2CreateRequest) -> Message {
        if !body.file_name.eq_ignore_ascii_case(PIPE_NAME) {
            return error(request, NtStatus::ObjectNameNotFound);
        }
        let id = self.next_file;
        self.next_file += 1;
        self.opens.insert(
            id,
            OpenEntry {
                path: body.file_name.clone(),
                delete_pending: false,
                listing: None,
                pipe: Some(Vec::new()),
            },
        );
        reply(
            request,
            Body::CreateResponse(Smb2CreateResponse::new(file_id(id), FileStat::default())),
        )
    }

    fn create(&mut self, request: &Message, body: &Smb2CreateRequest) -> Message {
        let path = body.file_name.clone();
        let mut files = self.control.files.lock().unwrap();
        let wants_dir = body.create_options.contains(CreateOptions::FILE_DIRECTORY_FILE);
        let parent_ok = files
            .get(parent_of(&path))
            .map(Node::is_directory)
            .unwrap_or(false);

        let existing = files.get(&path).map(Node::is_directory);
        let wants_file = body
            .create_options
            .contains(CreateOptions::FILE_NON_DIRECTORY_FILE);

        match (existing, body.create_disposition) {
            (Some(_), CreateDisposition::Create) => {
                return error(request, NtStatus::ObjectNameCollision)
            }
            (Some(false), _) if wants_dir => return error(request, NtStatus::NotADirectory),
            (Some(true), _) if wants_file => return error(request, NtStatus::FileIsADirectory),
            (Some(_), CreateDisposition::Overwrite | CreateDisposition::OverwriteIf) => {
                if let Some(node) = files.get_mut(&path) {
                    node.data.clear();
                }
            }
            (Some(_), _) => {}
            (None, CreateDisposition::Open | CreateDisposition::Overwrite) => {
                return error(request, NtStatus::ObjectNameNotFound)
            }
            (None, _) if !parent_ok => return error(request, NtStatus::ObjectPathNotFound),
            (None, _) => {
                let node = if wants_dir {
                    Node::directory()
                } else {
                    Node::file(Vec::new())
                };
                files.insert(path.clone(), node);
            }
        }

        let stat = files.get(&path).map(Node::stat).unwrap_or_default();
        drop(files);
        let id = self.next_file;
        self.next_file += 1;
        self.opens.insert(
            id,
            OpenEntry {
                path,
                delete_pending: false,
                listing: None,
                pipe: None,
            },
        );
        reply(
            request,
            Body::CreateResponse(Smb2CreateResponse::new(file_id(id), stat)),
        )
    }
}

fn list_children(files: &BTreeMap<String, Node>, dir: &str) -> VecDeque<FileDirectoryInformation> {
    let record = |name: &str, node: &Node| {
        let stat = node.stat();
        FileDirectoryInformation {
            file_index: 0,
            creation_time: stat.creation_time,
            last_access_time: stat.last_access_time,
            last_write_time: stat.last_write_time,
            change_time: stat.change_time,
            end_of_file: stat.end_of_file,
            allocation_size: stat.allocation_size,
            attributes: stat.attributes,
            file_name: name.to_string(),
        }
    };
    let mut out = VecDeque::new();
    let dot = Node::directory();
    out.push_back(record(".", &dot));
    out.push_back(record("..", &dot));
    for (path, node) in files {
        if !path.is_empty() && parent_of(path) == dir {
            out.push_back(record(name_of(path), node));
        }
    }
    out
}
