//! Lazy directory enumeration

use super::session::check_status;
use super::tree::Tree;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::messages::common::filetime_to_datetime;
use crate::protocol::messages::{Body, FileDirectoryInformation, FileId, Smb2QueryDirectoryRequest};
use crate::protocol::smb2_constants::{query_directory_flags, FileAttributes, Smb2Command};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

/// One name in a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
    pub allocation_size: u64,
    pub attributes: FileAttributes,
    pub created: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub changed: Option<DateTime<Utc>>,
}

impl DirectoryEntry {
    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }

    /// Hidden attribute, dot-file or administrative `$` name
    pub fn is_hidden(&self) -> bool {
        self.attributes.contains(FileAttributes::HIDDEN)
            || self.name.starts_with('.')
            || self.name.ends_with('$')
    }
}

impl From<FileDirectoryInformation> for DirectoryEntry {
    fn from(info: FileDirectoryInformation) -> Self {
        Self {
            size: info.end_of_file,
            allocation_size: info.allocation_size,
            attributes: info.attributes,
            created: filetime_to_datetime(info.creation_time),
            accessed: filetime_to_datetime(info.last_access_time),
            modified: filetime_to_datetime(info.last_write_time),
            changed: filetime_to_datetime(info.change_time),
            name: info.file_name,
        }
    }
}

/// Entries of one directory, fetched a batch at a time
///
/// The listing ends when the server reports no more files, at which point
/// the directory handle is closed. It cannot be restarted; call
/// [`Tree::list_directory`] again to re-enumerate.
pub struct DirectoryListing {
    tree: Tree,
    handle: Option<u64>,
    file_id: FileId,
    path: String,
    batch: VecDeque<DirectoryEntry>,
    restart: bool,
}

impl std::fmt::Debug for DirectoryListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryListing")
            .field("path", &self.path)
            .field("open", &self.handle.is_some())
            .field("buffered", &self.batch.len())
            .finish()
    }
}

impl DirectoryListing {
    pub(crate) fn new(tree: Tree, handle: u64, file_id: FileId, path: String) -> Self {
        Self {
            tree,
            handle: Some(handle),
            file_id,
            path,
            batch: VecDeque::new(),
            restart: true,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// False once the server has run out of entries
    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Next entry, or `None` when the directory is exhausted
    pub async fn next_entry(&mut self) -> Result<Option<DirectoryEntry>> {
        loop {
            if let Some(entry) = self.batch.pop_front() {
                return Ok(Some(entry));
            }
            let Some(handle) = self.handle else {
                return Ok(None);
            };
            self.fetch(handle).await?;
        }
    }

    /// Drain the remaining entries
    pub async fn collect(mut self) -> Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next_entry().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Stop early and close the directory handle
    pub async fn close(mut self) -> Result<()> {
        self.batch.clear();
        match self.handle.take() {
            Some(handle) => self.tree.close_handle(handle).await,
            None => Ok(()),
        }
    }

    async fn fetch(&mut self, handle: u64) -> Result<()> {
        let mut request = Smb2QueryDirectoryRequest::new(
            self.file_id,
            "*",
            self.tree.session().transact_size(),
        );
        if self.restart {
            request.flags = query_directory_flags::RESTART_SCANS;
        }
        let message = self.tree.session().request(
            Smb2Command::QueryDirectory,
            self.tree.id(),
            Body::QueryDirectoryRequest(request),
        );
        let response = self
            .tree
            .session()
            .call(message, self.tree.handle_scope(handle), None)
            .await?;
        self.restart = false;

        if response.message.status() == NtStatus::NoMoreFiles {
            debug!("{}: end of listing", self.path);
            self.handle = None;
            return self.tree.close_handle(handle).await;
        }
        let message = check_status(response, &self.path)?;
        let Body::QueryDirectoryResponse(body) = message.body else {
            return Err(Error::MalformedMessage("query directory without body".into()));
        };

        let entries = FileDirectoryInformation::parse_all(&body.output_buffer)?;
        debug!("{}: batch of {} entries", self.path, entries.len());
        self.batch.extend(
            entries
                .into_iter()
                .filter(|info| info.file_name != "." && info.file_name != "..")
                .map(DirectoryEntry::from),
        );
        Ok(())
    }
}

impl Drop for DirectoryListing {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.tree.close_in_background(handle);
        }
    }
}
