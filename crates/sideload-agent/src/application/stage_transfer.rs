//! Staging transfer: uploads a packaged app to the device's staging directory.
//!
//! The phases run strictly in order and the first failure aborts the
//! transfer, naming the phase it happened in.  Two guards make cleanup
//! unconditional:
//!
//! - [`RemoteFile`] closes the remote handle exactly once, explicitly on the
//!   success path or from `Drop` on any early return.
//! - [`WorkDir`] removes the local packaging directory on every path.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sideload_core::domain::staging::STAGING_DIRECTORY;
use sideload_core::protocol::afc::{AfcErrorCode, AfcFileMode};
use sideload_core::{ErrorCode, StagedArchive, TransferPhase};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::ports::{ArchiveError, Archiver, FileTransferChannel, ServiceError};
use crate::application::session::SessionHandle;

/// Underlying cause of a [`TransferError`].
#[derive(Debug, Error)]
pub enum TransferCause {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("local I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A staging transfer failed in `phase`.
#[derive(Debug, Error)]
#[error("transfer failed during {phase}: {cause}")]
pub struct TransferError {
    pub phase: TransferPhase,
    #[source]
    pub cause: TransferCause,
}

impl TransferError {
    fn new(phase: TransferPhase, cause: impl Into<TransferCause>) -> Self {
        Self {
            phase,
            cause: cause.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::Transfer(self.phase)
    }
}

/// Configuration and collaborators of the transfer.
pub struct StagingTransfer {
    archiver: Arc<dyn Archiver>,
    work_root: PathBuf,
    remote_directory: String,
}

impl StagingTransfer {
    pub fn new(archiver: Arc<dyn Archiver>, work_root: impl Into<PathBuf>) -> Self {
        Self {
            archiver,
            work_root: work_root.into(),
            remote_directory: STAGING_DIRECTORY.to_string(),
        }
    }

    /// Uploads to `remote_directory` instead of `/PublicStaging`.
    pub fn with_remote_directory(mut self, remote_directory: impl Into<String>) -> Self {
        self.remote_directory = remote_directory.into();
        self
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    /// Packages `source` and uploads it; returns the remote staging path.
    ///
    /// # Errors
    ///
    /// [`TransferError`] naming the first phase that failed.  Nothing is left
    /// behind locally, and an opened remote file is always closed.
    pub fn upload(&self, session: &SessionHandle, source: &Path) -> Result<String, TransferError> {
        let staged = StagedArchive::in_directory(&self.remote_directory);
        info!("staging {} as {}", source.display(), staged.remote_path());

        let mut channel = session
            .open_file_transfer()
            .map_err(|e| TransferError::new(TransferPhase::OpenChannel, e))?;

        ensure_directory(channel.as_mut(), staged.remote_directory())
            .map_err(|e| TransferError::new(TransferPhase::CreateDirectory, e))?;

        let work_dir = WorkDir::create(self.work_root.join(staged.id().to_string()))
            .map_err(|e| TransferError::new(TransferPhase::Package, e))?;
        let archive_path = self
            .archiver
            .package(source, work_dir.path())
            .map_err(|e| TransferError::new(TransferPhase::Package, e))?;

        let remote_path = staged.remote_path();
        let mut remote = RemoteFile::open(channel.as_mut(), &remote_path, AfcFileMode::WriteOnly)
            .map_err(|e| TransferError::new(TransferPhase::OpenFile, e))?;

        let bytes = fs::read(&archive_path)
            .map_err(|e| TransferError::new(TransferPhase::ReadArchive, e))?;
        debug!("read {} byte archive {}", bytes.len(), archive_path.display());

        remote
            .write_all(&bytes)
            .map_err(|e| TransferError::new(TransferPhase::Write, e))?;

        remote
            .close()
            .map_err(|e| TransferError::new(TransferPhase::Close, e))?;

        info!("staged {} bytes at {remote_path}", bytes.len());
        Ok(remote_path)
    }
}

/// Creates `path`; an already existing directory is fine.
fn ensure_directory(channel: &mut dyn FileTransferChannel, path: &str) -> Result<(), ServiceError> {
    match channel.make_directory(path) {
        Err(e) if e.afc_code() == Some(AfcErrorCode::ObjectExists) => {
            debug!("{path} already exists");
            Ok(())
        }
        other => other,
    }
}

/// Removes leftovers of earlier runs from `work_root`.
///
/// # Errors
///
/// Returns the first I/O error other than a missing directory.
pub fn clean_work_root(work_root: &Path) -> io::Result<()> {
    let entries = match fs::read_dir(work_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        debug!("removed stale artifact {}", path.display());
    }
    Ok(())
}

// ── Guards ────────────────────────────────────────────────────────────────────

/// An open remote file.  Closed exactly once.
pub struct RemoteFile<'a> {
    channel: &'a mut dyn FileTransferChannel,
    handle: u64,
    path: String,
    closed: bool,
}

impl<'a> RemoteFile<'a> {
    /// # Errors
    ///
    /// Whatever the channel reports for `FileOpen`.
    pub fn open(
        channel: &'a mut dyn FileTransferChannel,
        path: &str,
        mode: AfcFileMode,
    ) -> Result<Self, ServiceError> {
        let handle = channel.open_file(path, mode)?;
        Ok(Self {
            channel,
            handle,
            path: path.to_string(),
            closed: false,
        })
    }

    /// # Errors
    ///
    /// Whatever the channel reports for `FileWrite`.
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), ServiceError> {
        self.channel.write_file(self.handle, data)
    }

    /// Closes the handle and reports the outcome.
    ///
    /// # Errors
    ///
    /// Whatever the channel reports for `FileClose`.
    pub fn close(mut self) -> Result<(), ServiceError> {
        self.closed = true;
        self.channel.close_file(self.handle)
    }
}

impl Drop for RemoteFile<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.channel.close_file(self.handle) {
            warn!("failed to close {} (handle {}): {e}", self.path, self.handle);
        }
    }
}

/// A local scratch directory removed on drop.
pub struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    /// # Errors
    ///
    /// Returns the I/O error if the directory cannot be created.
    pub fn create(path: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove {}: {e}", self.path.display());
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
