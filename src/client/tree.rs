//! Operations on a connected share

use super::directory::DirectoryListing;
use super::dispatch::Scope;
use super::file::{FileHandle, Metadata, OpenMode};
use super::path::share_relative;
use super::session::{check_status, Session};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::messages::{
    Body, FileDispositionInformation, FileId, FileInfoClass, FileNetworkOpenInformation,
    FileRenameInformation, Smb2CloseRequest, Smb2CreateRequest, Smb2CreateResponse,
    Smb2QueryInfoRequest, Smb2SetInfoRequest,
};
use crate::protocol::smb2_constants::{
    CreateDisposition, CreateOptions, DesiredAccess, FileAttributes, ShareAccess,
    ShareCapabilities, ShareFlags, ShareType, Smb2Command,
};
use std::sync::Arc;
use tracing::{debug, info};

/// What TREE_CONNECT told us about a share
#[derive(Debug)]
pub(crate) struct TreeInfo {
    pub(crate) path: String,
    pub(crate) share_type: ShareType,
    pub(crate) share_flags: ShareFlags,
    pub(crate) capabilities: ShareCapabilities,
    pub(crate) maximal_access: DesiredAccess,
}

/// A connected share
#[derive(Clone)]
pub struct Tree {
    session: Session,
    tree_id: u32,
    info: Arc<TreeInfo>,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("id", &self.tree_id)
            .field("path", &self.info.path)
            .finish()
    }
}

/// A handle opened by CREATE, already registered with the session
pub(crate) struct Opened {
    pub handle: u64,
    pub file_id: FileId,
    pub response: Smb2CreateResponse,
}

impl Tree {
    pub(crate) fn new(session: Session, tree_id: u32, info: Arc<TreeInfo>) -> Self {
        Self {
            session,
            tree_id,
            info,
        }
    }

    pub fn id(&self) -> u32 {
        self.tree_id
    }

    /// UNC path the tree was connected with
    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn share_type(&self) -> ShareType {
        self.info.share_type
    }

    pub fn share_flags(&self) -> ShareFlags {
        self.info.share_flags
    }

    pub fn capabilities(&self) -> ShareCapabilities {
        self.info.capabilities
    }

    /// Access granted to this user on the share root
    pub fn maximal_access(&self) -> DesiredAccess {
        self.info.maximal_access
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Disconnect this tree; see [`Session::close_tree`]
    pub async fn disconnect(&self) -> Result<()> {
        self.session.close_tree(self).await
    }

    /// Open a file for I/O
    pub async fn open_file(&self, path: &str, mode: OpenMode) -> Result<FileHandle> {
        let name = share_relative(path);
        let mut request = Smb2CreateRequest::new(name.clone());
        request.desired_access = mode.desired_access();
        request.create_disposition = mode.create_disposition();
        request.create_options = CreateOptions::FILE_NON_DIRECTORY_FILE;

        let opened = self.create(request).await?;
        debug!("opened {} as handle {} ({:?})", name, opened.handle, mode);
        Ok(FileHandle::new(
            self.clone(),
            opened.handle,
            opened.file_id,
            name,
            mode,
            &opened.response,
        ))
    }

    /// Enumerate a directory; entries are fetched as the listing is consumed
    pub async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        let name = share_relative(path);
        let mut request = Smb2CreateRequest::new(name.clone());
        request.desired_access = DesiredAccess::FILE_READ_DATA
            | DesiredAccess::FILE_READ_ATTRIBUTES
            | DesiredAccess::SYNCHRONIZE;
        request.file_attributes = FileAttributes::DIRECTORY;
        request.create_options = CreateOptions::FILE_DIRECTORY_FILE;

        let opened = self.create(request).await?;
        Ok(DirectoryListing::new(self.clone(), opened.handle, opened.file_id, name))
    }

    /// Attributes, size and timestamps of a file or directory
    pub async fn stat(&self, path: &str) -> Result<Metadata> {
        let name = share_relative(path);
        let mut request = Smb2CreateRequest::new(name.clone());
        request.desired_access = DesiredAccess::FILE_READ_ATTRIBUTES | DesiredAccess::SYNCHRONIZE;
        request.share_access = ShareAccess::all();

        let opened = self.create(request).await?;
        let result = self.query_network_open(opened.handle, opened.file_id, &name).await;
        let closed = self.close_handle(opened.handle).await;
        let metadata = result?;
        closed?;
        Ok(metadata)
    }

    /// Rename or move within the share
    pub async fn rename(&self, from: &str, to: &str, replace_if_exists: bool) -> Result<()> {
        let source = share_relative(from);
        let target = share_relative(to);
        if source.is_empty() || target.is_empty() {
            return Err(Error::InvalidParameter("cannot rename the share root".into()));
        }

        let mut request = Smb2CreateRequest::new(source.clone());
        request.desired_access = DesiredAccess::DELETE
            | DesiredAccess::FILE_READ_ATTRIBUTES
            | DesiredAccess::SYNCHRONIZE;
        request.share_access = ShareAccess::all();
        let opened = self.create(request).await?;

        let info = FileRenameInformation {
            replace_if_exists,
            file_name: target.clone(),
        };
        let result = match info.serialize() {
            Ok(buffer) => {
                self.set_info(
                    opened.handle,
                    opened.file_id,
                    FileInfoClass::RenameInformation,
                    buffer,
                    &target,
                )
                .await
            }
            Err(e) => Err(e),
        };
        let closed = self.close_handle(opened.handle).await;
        result?;
        closed?;
        info!("renamed {} to {}", source, target);
        Ok(())
    }

    /// Delete a file or an empty directory
    pub async fn delete(&self, path: &str) -> Result<()> {
        let name = share_relative(path);
        if name.is_empty() {
            return Err(Error::InvalidParameter("cannot delete the share root".into()));
        }

        let mut request = Smb2CreateRequest::new(name.clone());
        request.desired_access = DesiredAccess::DELETE | DesiredAccess::SYNCHRONIZE;
        request.share_access = ShareAccess::all();
        let opened = self.create(request).await?;

        let disposition = FileDispositionInformation {
            delete_pending: true,
        };
        let result = self
            .set_info(
                opened.handle,
                opened.file_id,
                FileInfoClass::DispositionInformation,
                disposition.serialize(),
                &name,
            )
            .await;
        let closed = self.close_handle(opened.handle).await;
        result?;
        closed?;
        info!("deleted {}", name);
        Ok(())
    }

    /// Create a directory; fails with `AlreadyExists` if the name is taken
    pub async fn mkdir(&self, path: &str) -> Result<()> {
        let name = share_relative(path);
        let mut request = Smb2CreateRequest::new(name.clone());
        request.desired_access = DesiredAccess::FILE_READ_ATTRIBUTES | DesiredAccess::SYNCHRONIZE;
        request.file_attributes = FileAttributes::DIRECTORY;
        request.create_disposition = CreateDisposition::Create;
        request.create_options = CreateOptions::FILE_DIRECTORY_FILE;

        let opened = self.create(request).await?;
        self.close_handle(opened.handle).await?;
        info!("created directory {}", name);
        Ok(())
    }

    pub(crate) fn scope(&self) -> Scope {
        Scope::tree(self.session.id(), self.tree_id)
    }

    pub(crate) fn handle_scope(&self, handle: u64) -> Scope {
        Scope::handle(self.session.id(), self.tree_id, handle)
    }

    /// Send CREATE and register the resulting handle
    pub(crate) async fn create(&self, request: Smb2CreateRequest) -> Result<Opened> {
        let name = request.file_name.clone();
        let message = self
            .session
            .request(Smb2Command::Create, self.tree_id, Body::CreateRequest(request));
        let response = self.session.call(message, self.scope(), None).await?;
        let message = check_status(response, &name)?;
        let Body::CreateResponse(response) = message.body else {
            return Err(Error::MalformedMessage("create without body".into()));
        };

        let file_id = response.file_id;
        let handle = self.session.register_handle(self.tree_id, file_id, &name);
        Ok(Opened {
            handle,
            file_id,
            response,
        })
    }

    /// Forget a handle locally, then send CLOSE for it
    pub(crate) async fn close_handle(&self, handle: u64) -> Result<()> {
        let Some(record) = self.session.release_handle(handle) else {
            return Err(Error::HandleInvalid);
        };
        let message = self.session.request(
            Smb2Command::Close,
            self.tree_id,
            Body::CloseRequest(Smb2CloseRequest::new(record.file_id)),
        );
        let response = self.session.call(message, self.scope(), None).await?;
        match response.message.status() {
            // already gone on the server side
            NtStatus::FileClosed => Ok(()),
            _ => check_status(response, &record.path).map(|_| ()),
        }
    }

    /// Close a handle from a destructor
    pub(crate) fn close_in_background(&self, handle: u64) {
        if self.session.handle_record(handle).is_err() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let tree = self.clone();
                runtime.spawn(async move {
                    if let Err(e) = tree.close_handle(handle).await {
                        debug!("background close of handle {} failed: {}", handle, e);
                    }
                });
            }
            Err(_) => {
                self.session.release_handle(handle);
            }
        }
    }

    pub(crate) async fn query_network_open(
        &self,
        handle: u64,
        file_id: FileId,
        context: &str,
    ) -> Result<Metadata> {
        let request = Smb2QueryInfoRequest::file(
            file_id,
            FileInfoClass::NetworkOpenInformation,
            FileNetworkOpenInformation::SIZE as u32,
        );
        let message = self.session.request(
            Smb2Command::QueryInfo,
            self.tree_id,
            Body::QueryInfoRequest(request),
        );
        let response = self
            .session
            .call(message, self.handle_scope(handle), None)
            .await?;
        let message = check_status(response, context)?;
        let Body::QueryInfoResponse(body) = message.body else {
            return Err(Error::MalformedMessage("query info without body".into()));
        };
        let info = FileNetworkOpenInformation::parse(&body.output_buffer)?;
        Ok(Metadata::from(&info.stat))
    }

    async fn set_info(
        &self,
        handle: u64,
        file_id: FileId,
        class: FileInfoClass,
        buffer: Vec<u8>,
        context: &str,
    ) -> Result<()> {
        let message = self.session.request(
            Smb2Command::SetInfo,
            self.tree_id,
            Body::SetInfoRequest(Smb2SetInfoRequest::file(file_id, class, buffer)),
        );
        let response = self
            .session
            .call(message, self.handle_scope(handle), None)
            .await?;
        check_status(response, context).map(|_| ())
    }
}
