//! Staged archive naming and transfer phases.

use std::fmt;

use uuid::Uuid;

/// Device directory archives are uploaded to before installation.
pub const STAGING_DIRECTORY: &str = "/PublicStaging";

/// Extension of an installable archive.
pub const ARCHIVE_EXTENSION: &str = "ipa";

/// An archive named for one upload.
///
/// The UUID is both the local artifact name and the remote file name, so two
/// concurrent uploads never collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    id: Uuid,
    remote_directory: String,
}

impl StagedArchive {
    /// A fresh archive name under `remote_directory`.
    pub fn in_directory(remote_directory: &str) -> Self {
        let trimmed = remote_directory.trim_end_matches('/');
        Self {
            id: Uuid::new_v4(),
            remote_directory: if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// `<uuid>.ipa`
    pub fn file_name(&self) -> String {
        format!("{}.{ARCHIVE_EXTENSION}", self.id)
    }

    /// Absolute path on the device, e.g. `/PublicStaging/<uuid>.ipa`.
    pub fn remote_path(&self) -> String {
        if self.remote_directory == "/" {
            format!("/{}", self.file_name())
        } else {
            format!("{}/{}", self.remote_directory, self.file_name())
        }
    }

    pub fn remote_directory(&self) -> &str {
        &self.remote_directory
    }
}

/// Steps of a staging transfer, in order.  A failure names the step it
/// happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    OpenChannel,
    CreateDirectory,
    Package,
    OpenFile,
    ReadArchive,
    Write,
    Close,
}

impl TransferPhase {
    /// Zero-based position in the transfer sequence.
    pub fn ordinal(self) -> u32 {
        match self {
            Self::OpenChannel => 0,
            Self::CreateDirectory => 1,
            Self::Package => 2,
            Self::OpenFile => 3,
            Self::ReadArchive => 4,
            Self::Write => 5,
            Self::Close => 6,
        }
    }
}

impl fmt::Display for TransferPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenChannel => "open channel",
            Self::CreateDirectory => "create directory",
            Self::Package => "package",
            Self::OpenFile => "open file",
            Self::ReadArchive => "read archive",
            Self::Write => "write",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

/// Turns an app's display name into a file-system-safe archive stem.
///
/// Path separators become `_` and surrounding whitespace is dropped; an empty
/// result falls back to `app`.
pub fn sanitize_archive_name(name: &str) -> String {
    let cleaned = name.replace(['/', '\\'], "_");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "app".to_string()
    } else {
        trimmed.to_string()
    }
}
