//! Whole-file transfers between a share and the local file system.
//!
//! A download first lands in a `.part` file next to its destination. If a
//! previous attempt left one behind, the transfer resumes from its length.
//! On success the part file is renamed to the destination, picking
//! `name-1.ext`, `name-2.ext`, ... when the name is already taken.

use super::file::OpenMode;
use super::tree::Tree;
use crate::error::{Error, NtStatus, Result};
use crate::protocol::smb2_constants::Smb2Command;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Ready,
    Running,
    Cancelled,
    Completed,
    Failed,
}

/// Bytes moved so far and the expected total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub transferred: u64,
    pub total: u64,
}

#[derive(Debug)]
struct ControlInner {
    cancelled: AtomicBool,
    state: Mutex<TransferState>,
}

/// Shared cancellation flag and state of one transfer
///
/// Cancellation is checked between chunks, so a transfer stops after the
/// request in flight completes.
#[derive(Debug, Clone)]
pub struct TransferControl {
    inner: Arc<ControlInner>,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                cancelled: AtomicBool::new(false),
                state: Mutex::new(TransferState::Ready),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> TransferState {
        *super::lock(&self.inner.state)
    }

    fn set_state(&self, state: TransferState) {
        *super::lock(&self.inner.state) = state;
    }

    fn start(&self) -> Result<()> {
        let mut state = super::lock(&self.inner.state);
        if *state != TransferState::Ready {
            return Err(Error::InvalidState(format!(
                "transfer already {:?}",
                *state
            )));
        }
        if self.is_cancelled() {
            *state = TransferState::Cancelled;
            return Err(Error::Cancelled);
        }
        *state = TransferState::Running;
        Ok(())
    }

    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn finish<T>(&self, result: Result<T>) -> Result<T> {
        self.set_state(match &result {
            Ok(_) => TransferState::Completed,
            Err(Error::Cancelled) => TransferState::Cancelled,
            Err(_) => TransferState::Failed,
        });
        result
    }
}

fn local_error(path: &Path, e: std::io::Error) -> Error {
    Error::LocalFile(format!("{}: {}", path.display(), e))
}

/// `name-1.ext`, `name-2.ext`, ... for the first free name next to `path`
pub async fn unique_destination(path: &Path) -> Result<PathBuf> {
    if !exists(path).await? {
        return Ok(path.to_path_buf());
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned());

    for index in 1u32.. {
        let name = match &extension {
            Some(ext) => format!("{}-{}.{}", stem, index, ext),
            None => format!("{}-{}", stem, index),
        };
        let candidate = path.with_file_name(name);
        if !exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    Err(Error::LocalFile(format!(
        "{}: no free destination name",
        path.display()
    )))
}

async fn exists(path: &Path) -> Result<bool> {
    fs::try_exists(path).await.map_err(|e| local_error(path, e))
}

/// A directory destination receives the remote file name
async fn resolve_destination(remote: &str, local: &Path) -> Result<PathBuf> {
    let is_dir = match fs::metadata(local).await {
        Ok(metadata) => metadata.is_dir(),
        Err(_) => false,
    };
    if !is_dir {
        return Ok(local.to_path_buf());
    }
    let name = remote
        .rsplit(['\\', '/'])
        .find(|part| !part.is_empty())
        .ok_or_else(|| Error::InvalidParameter(format!("'{}' names no file", remote)))?;
    Ok(local.join(name))
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PART_SUFFIX);
    destination.with_file_name(name)
}

/// Copy `remote` from the share to `local`, returning where it was written
///
/// `local` may name a file or an existing directory.
pub async fn download<F>(
    tree: &Tree,
    remote: &str,
    local: &Path,
    control: &TransferControl,
    progress: F,
) -> Result<PathBuf>
where
    F: FnMut(TransferProgress) + Send,
{
    control.start()?;
    let result = run_download(tree, remote, local, control, progress).await;
    if let Err(e) = &result {
        warn!("download of {} stopped: {}", remote, e);
    }
    control.finish(result)
}

async fn run_download<F>(
    tree: &Tree,
    remote: &str,
    local: &Path,
    control: &TransferControl,
    mut progress: F,
) -> Result<PathBuf>
where
    F: FnMut(TransferProgress) + Send,
{
    let destination = resolve_destination(remote, local).await?;
    let partial = part_path(&destination);

    let file = tree.open_file(remote, OpenMode::Read).await?;
    let total = file.metadata().await?.size;

    let mut offset = match fs::metadata(&partial).await {
        Ok(metadata) if metadata.len() <= total => metadata.len(),
        Ok(_) => {
            debug!("{} is longer than the source, restarting", partial.display());
            fs::remove_file(&partial)
                .await
                .map_err(|e| local_error(&partial, e))?;
            0
        }
        Err(_) => 0,
    };
    if offset > 0 {
        info!("resuming {} at byte {}", remote, offset);
    }

    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&partial)
        .await
        .map_err(|e| local_error(&partial, e))?;
    progress(TransferProgress {
        transferred: offset,
        total,
    });

    let chunk = tree.session().read_chunk_size() as usize;
    let copied = async {
        while offset < total {
            control.checkpoint()?;
            let data = file.read(offset, chunk).await?;
            if data.is_empty() {
                break;
            }
            out.write_all(&data)
                .await
                .map_err(|e| local_error(&partial, e))?;
            offset += data.len() as u64;
            progress(TransferProgress {
                transferred: offset,
                total,
            });
        }
        Ok::<(), Error>(())
    }
    .await;
    let flushed = out.flush().await.map_err(|e| local_error(&partial, e));
    drop(out);
    let closed = file.close().await;
    copied?;
    flushed?;
    closed?;

    let destination = unique_destination(&destination).await?;
    fs::rename(&partial, &destination)
        .await
        .map_err(|e| local_error(&destination, e))?;
    info!("downloaded {} to {} ({} bytes)", remote, destination.display(), offset);
    Ok(destination)
}

/// Copy the local file `local` to `remote`, replacing it; returns the byte count
pub async fn upload<F>(
    tree: &Tree,
    local: &Path,
    remote: &str,
    control: &TransferControl,
    progress: F,
) -> Result<u64>
where
    F: FnMut(TransferProgress) + Send,
{
    control.start()?;
    let result = run_upload(tree, local, remote, control, progress).await;
    if let Err(e) = &result {
        warn!("upload of {} stopped: {}", local.display(), e);
    }
    control.finish(result)
}

async fn run_upload<F>(
    tree: &Tree,
    local: &Path,
    remote: &str,
    control: &TransferControl,
    mut progress: F,
) -> Result<u64>
where
    F: FnMut(TransferProgress) + Send,
{
    let mut input = fs::File::open(local)
        .await
        .map_err(|e| local_error(local, e))?;
    let total = input
        .metadata()
        .await
        .map_err(|e| local_error(local, e))?
        .len();

    let file = tree.open_file(remote, OpenMode::Overwrite).await?;
    let chunk = tree.session().write_chunk_size() as usize;
    let mut buffer = vec![0u8; chunk];
    let mut offset = 0u64;
    progress(TransferProgress {
        transferred: 0,
        total,
    });

    let copied = async {
        loop {
            control.checkpoint()?;
            let n = input
                .read(&mut buffer)
                .await
                .map_err(|e| local_error(local, e))?;
            if n == 0 {
                break;
            }
            let written = file.write(offset, &buffer[..n]).await?;
            if written < n {
                return Err(Error::Status {
                    command: Smb2Command::Write,
                    status: NtStatus::DiskFull,
                });
            }
            offset += n as u64;
            progress(TransferProgress {
                transferred: offset,
                total,
            });
        }
        Ok::<(), Error>(())
    }
    .await;
    let closed = file.close().await;
    copied?;
    closed?;
    info!("uploaded {} to {} ({} bytes)", local.display(), remote, offset);
    Ok(offset)
}
