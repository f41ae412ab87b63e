//! Open files

use super::dispatch::Response;
use super::session::check_status;
use super::tree::Tree;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::messages::common::filetime_to_datetime;
use crate::protocol::messages::{
    Body, FileId, FileStat, Smb2CreateResponse, Smb2FlushRequest, Smb2ReadRequest,
    Smb2WriteRequest,
};
use crate::protocol::smb2_constants::{CreateDisposition, DesiredAccess, FileAttributes, Smb2Command};
use crate::protocol::Message;
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// How [`Tree::open_file`] opens a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, read only
    Read,
    /// Existing file, write only
    Write,
    /// Existing file, read and write
    ReadWrite,
    /// New file; fails with `AlreadyExists` if the name is taken
    Create,
    /// Create, or truncate an existing file
    Overwrite,
}

impl OpenMode {
    pub(crate) fn desired_access(self) -> DesiredAccess {
        match self {
            OpenMode::Read => DesiredAccess::FILE_GENERIC_READ,
            OpenMode::Write => DesiredAccess::FILE_GENERIC_WRITE | DesiredAccess::FILE_READ_ATTRIBUTES,
            OpenMode::ReadWrite | OpenMode::Create | OpenMode::Overwrite => {
                DesiredAccess::FILE_GENERIC_READ | DesiredAccess::FILE_GENERIC_WRITE
            }
        }
    }

    pub(crate) fn create_disposition(self) -> CreateDisposition {
        match self {
            OpenMode::Read | OpenMode::Write | OpenMode::ReadWrite => CreateDisposition::Open,
            OpenMode::Create => CreateDisposition::Create,
            OpenMode::Overwrite => CreateDisposition::OverwriteIf,
        }
    }

    pub fn can_read(self) -> bool {
        !matches!(self, OpenMode::Write)
    }

    pub fn can_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Size, attributes and timestamps of a file or directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub allocation_size: u64,
    pub attributes: FileAttributes,
    pub created: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub changed: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    pub fn is_hidden(&self) -> bool {
        self.attributes.contains(FileAttributes::HIDDEN)
    }

    pub fn is_read_only(&self) -> bool {
        self.attributes.contains(FileAttributes::READONLY)
    }
}

impl From<&FileStat> for Metadata {
    fn from(stat: &FileStat) -> Self {
        Self {
            size: stat.end_of_file,
            allocation_size: stat.allocation_size,
            attributes: stat.attributes,
            created: filetime_to_datetime(stat.creation_time),
            accessed: filetime_to_datetime(stat.last_access_time),
            modified: filetime_to_datetime(stat.last_write_time),
            changed: filetime_to_datetime(stat.change_time),
        }
    }
}

struct FileInner {
    tree: Tree,
    handle: u64,
    file_id: FileId,
    path: String,
    mode: OpenMode,
    opened: Metadata,
    position: AtomicU64,
    closed: AtomicBool,
}

impl Drop for FileInner {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            self.tree.close_in_background(self.handle);
        }
    }
}

/// An open file. Clones share the handle and its cursor.
#[derive(Clone)]
pub struct FileHandle {
    inner: Arc<FileInner>,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("handle", &self.inner.handle)
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .finish()
    }
}

impl FileHandle {
    pub(crate) fn new(
        tree: Tree,
        handle: u64,
        file_id: FileId,
        path: String,
        mode: OpenMode,
        response: &Smb2CreateResponse,
    ) -> Self {
        Self {
            inner: Arc::new(FileInner {
                tree,
                handle,
                file_id,
                path,
                mode,
                opened: Metadata::from(&response.stat),
                position: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Local handle ID
    pub fn id(&self) -> u64 {
        self.inner.handle
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn mode(&self) -> OpenMode {
        self.inner.mode
    }

    /// Metadata as reported when the file was opened
    pub fn opened_metadata(&self) -> &Metadata {
        &self.inner.opened
    }

    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
            && self.inner.tree.session().handle_record(self.inner.handle).is_ok()
    }

    /// Read up to `len` bytes at `offset`; returns fewer at end of file
    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let chunk = self.inner.tree.session().read_chunk_size() as usize;
        let mut data = Vec::with_capacity(len.min(chunk * 4));

        while data.len() < len {
            let want = (len - data.len()).min(chunk);
            let position = offset + data.len() as u64;
            let Some(bytes) = self.read_chunk(position, want as u32).await? else {
                break;
            };
            let short = bytes.len() < want;
            data.extend_from_slice(&bytes);
            if short || bytes.is_empty() {
                break;
            }
        }
        Ok(data)
    }

    async fn send_read(&self, offset: u64, length: u32) -> Result<Response> {
        let tree = &self.inner.tree;
        let message = tree.session().request(
            Smb2Command::Read,
            tree.id(),
            Body::ReadRequest(Smb2ReadRequest::new(self.inner.file_id, offset, length)),
        );
        tree.session()
            .call(message, tree.handle_scope(self.inner.handle), None)
            .await
    }

    fn read_data(message: Message, length: u32) -> Result<Vec<u8>> {
        let Body::ReadResponse(body) = message.body else {
            return Err(Error::MalformedMessage("read without body".into()));
        };
        if body.data.len() > length as usize {
            return Err(Error::ProtocolViolation(format!(
                "read returned {} bytes, asked for {}",
                body.data.len(),
                length
            )));
        }
        Ok(body.data)
    }

    /// One READ; `None` at end of file
    async fn read_chunk(&self, offset: u64, length: u32) -> Result<Option<Vec<u8>>> {
        let response = self.send_read(offset, length).await?;
        if response.message.status() == NtStatus::EndOfFile {
            return Ok(None);
        }
        let message = check_status(response, &self.inner.path)?;
        Self::read_data(message, length).map(Some)
    }

    /// One READ on a message-mode pipe; the flag is set while the
    /// current message has more bytes than fitted
    pub(crate) async fn read_message(&self, length: u32) -> Result<(Vec<u8>, bool)> {
        let response = self.send_read(0, length).await?;
        if response.message.status() == NtStatus::BufferOverflow {
            return Ok((Self::read_data(response.message, length)?, true));
        }
        let message = check_status(response, &self.inner.path)?;
        Ok((Self::read_data(message, length)?, false))
    }

    /// Write all of `data` at `offset`, returning the bytes written
    pub async fn write(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let chunk = self.inner.tree.session().write_chunk_size() as usize;
        let mut written = 0;

        while written < data.len() {
            let end = (written + chunk).min(data.len());
            let count = self
                .write_chunk(offset + written as u64, &data[written..end])
                .await?;
            if count == 0 {
                break;
            }
            written += count;
        }
        Ok(written)
    }

    async fn write_chunk(&self, offset: u64, data: &[u8]) -> Result<usize> {
        let tree = &self.inner.tree;
        let message = tree.session().request(
            Smb2Command::Write,
            tree.id(),
            Body::WriteRequest(Smb2WriteRequest::new(
                self.inner.file_id,
                offset,
                data.to_vec(),
            )),
        );
        let response = tree
            .session()
            .call(message, tree.handle_scope(self.inner.handle), None)
            .await?;
        let message = check_status(response, &self.inner.path)?;
        let Body::WriteResponse(body) = message.body else {
            return Err(Error::MalformedMessage("write without body".into()));
        };
        let count = body.count as usize;
        if count > data.len() {
            return Err(Error::ProtocolViolation(format!(
                "write acknowledged {} bytes of {}",
                count,
                data.len()
            )));
        }
        Ok(count)
    }

    /// Current cursor position
    pub fn position(&self) -> u64 {
        self.inner.position.load(Ordering::SeqCst)
    }

    /// Move the cursor; seeking from the end queries the current size
    pub async fn seek(&self, pos: SeekFrom) -> Result<u64> {
        let (origin, delta) = match pos {
            SeekFrom::Start(offset) => {
                self.inner.position.store(offset, Ordering::SeqCst);
                return Ok(offset);
            }
            SeekFrom::Current(delta) => (self.position(), delta),
            SeekFrom::End(delta) => (self.metadata().await?.size, delta),
        };
        let target = origin
            .checked_add_signed(delta)
            .ok_or_else(|| Error::InvalidParameter("seek before start of file".into()))?;
        self.inner.position.store(target, Ordering::SeqCst);
        Ok(target)
    }

    /// Read at the cursor and advance it
    pub async fn read_next(&self, len: usize) -> Result<Vec<u8>> {
        let data = self.read(self.position(), len).await?;
        self.inner
            .position
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        Ok(data)
    }

    /// Write at the cursor and advance it
    pub async fn write_next(&self, data: &[u8]) -> Result<usize> {
        let written = self.write(self.position(), data).await?;
        self.inner
            .position
            .fetch_add(written as u64, Ordering::SeqCst);
        Ok(written)
    }

    /// Current size, attributes and timestamps
    pub async fn metadata(&self) -> Result<Metadata> {
        self.inner
            .tree
            .query_network_open(self.inner.handle, self.inner.file_id, &self.inner.path)
            .await
    }

    /// Ask the server to persist buffered writes
    pub async fn flush(&self) -> Result<()> {
        let tree = &self.inner.tree;
        let message = tree.session().request(
            Smb2Command::Flush,
            tree.id(),
            Body::FlushRequest(Smb2FlushRequest {
                file_id: self.inner.file_id,
            }),
        );
        let response = tree
            .session()
            .call(message, tree.handle_scope(self.inner.handle), None)
            .await?;
        check_status(response, &self.inner.path).map(|_| ())
    }

    /// Close the handle; requests still in flight on it fail with `HandleInvalid`
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::HandleInvalid);
        }
        debug!("closing handle {} ({})", self.inner.handle, self.inner.path);
        self.inner.tree.close_handle(self.inner.handle).await
    }
}
