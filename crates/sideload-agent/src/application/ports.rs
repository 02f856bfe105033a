//! Ports between the use cases and the device.
//!
//! Every trait here has a socket-backed implementation in the infrastructure
//! layer and a scripted one in tests.  Channels are blocking and owned by one
//! caller at a time; sessions are shared behind an `Arc`.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sideload_core::protocol::afc::{AfcErrorCode, AfcFileMode, AfcOpcode};
use sideload_core::protocol::installation::InstallStatus;
use sideload_core::{ErrorCode, PairingError, ProtocolError};
use thiserror::Error;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Establishing a session with the device failed.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The pairing file could not be read.
    #[error("cannot read pairing file {path}: {source}")]
    CredentialUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The pairing file was read but is not a valid credential.
    #[error("invalid pairing credential: {0}")]
    CredentialInvalid(#[from] PairingError),

    /// The configured endpoint is not an IPv4 address.
    #[error("invalid device endpoint: {0}")]
    InvalidEndpoint(String),

    /// The TCP connection was refused or timed out.
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The TLS handshake failed or the key material was unusable.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The lockdown broker refused a request or broke the protocol.
    #[error("lockdown error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A socket read or write failed mid-negotiation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// UI-facing code for this failure.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::CredentialUnavailable { .. } | Self::CredentialInvalid(_) => ErrorCode::Credential,
            _ => ErrorCode::Connection,
        }
    }
}

/// A protocol channel could not be opened or a call on it failed.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No session has been established yet.
    #[error("no device session")]
    NoSession,

    /// The session was replaced; open a channel on the current one instead.
    #[error("session has been retired")]
    SessionRetired,

    /// Starting the service required a lockdown round trip, and it failed.
    #[error("cannot start service: {0}")]
    Connection(#[from] ConnectionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// AFC answered with a non-success status.
    #[error("AFC {operation:?} failed: {code}")]
    Afc {
        operation: AfcOpcode,
        code: AfcErrorCode,
    },

    /// The device announced it is going to sleep.
    #[error("device is going to sleep")]
    DeviceAsleep,
}

impl ServiceError {
    /// The AFC status code, when the device reported one.
    pub fn afc_code(&self) -> Option<AfcErrorCode> {
        match self {
            Self::Afc { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Packaging an app into an archive failed.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The input is neither an app directory nor an `.ipa` file.
    #[error("unsupported input {0}: expected an app directory or an .ipa file")]
    UnsupportedInput(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The zip writer failed.
    #[error("zip error: {0}")]
    Zip(String),
}

// ── Channels ──────────────────────────────────────────────────────────────────

/// Keep-alive channel.
#[cfg_attr(test, mockall::automock)]
pub trait HeartbeatChannel: Send {
    /// Blocks until the device's next Marco, at most `deadline`, and returns
    /// the interval it announces.
    fn receive_marco(&mut self, deadline: Duration) -> Result<u64, ServiceError>;

    /// Acknowledges the last Marco.
    fn send_polo(&mut self) -> Result<(), ServiceError>;
}

/// File conduit channel.
#[cfg_attr(test, mockall::automock)]
pub trait FileTransferChannel: Send {
    /// Creates `path` and any missing parents.
    fn make_directory(&mut self, path: &str) -> Result<(), ServiceError>;

    /// Opens `path` and returns its handle.
    fn open_file(&mut self, path: &str, mode: AfcFileMode) -> Result<u64, ServiceError>;

    /// Writes all of `data` to `handle`.
    fn write_file(&mut self, handle: u64, data: &[u8]) -> Result<(), ServiceError>;

    fn close_file(&mut self, handle: u64) -> Result<(), ServiceError>;
}

/// Installation proxy channel.
#[cfg_attr(test, mockall::automock)]
pub trait InstallChannel: Send {
    /// Sends the `Install` command for a staged package.
    fn request_install(&mut self, package_path: &str) -> Result<(), ServiceError>;

    /// Blocks for the next status update.
    fn next_status(&mut self) -> Result<InstallStatus, ServiceError>;
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// An established device session able to start services.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceProvider: Send + Sync {
    fn open_heartbeat(&self) -> Result<Box<dyn HeartbeatChannel>, ServiceError>;

    fn open_file_transfer(&self) -> Result<Box<dyn FileTransferChannel>, ServiceError>;

    fn open_installer(&self) -> Result<Box<dyn InstallChannel>, ServiceError>;

    /// Human-readable description of the endpoint, for logs.
    fn describe(&self) -> String;
}

/// Establishes new sessions.
#[cfg_attr(test, mockall::automock)]
pub trait SessionFactory: Send + Sync {
    /// Loads the credential, connects and proves the pairing.
    fn establish(&self) -> Result<Arc<dyn ServiceProvider>, ConnectionError>;
}

// ── Collaborators ─────────────────────────────────────────────────────────────

/// Packages an app for installation.
#[cfg_attr(test, mockall::automock)]
pub trait Archiver: Send + Sync {
    /// Packages `source` into a single archive file inside `work_dir` and
    /// returns its path.
    fn package(&self, source: &Path, work_dir: &Path) -> Result<PathBuf, ArchiveError>;
}

/// The only information the user interface receives.
#[cfg_attr(test, mockall::automock)]
pub trait CompletionSink: Send + Sync {
    /// `None` when a heartbeat session came up, otherwise why it did not.
    fn on_heartbeat_result(&self, error: Option<ErrorCode>);

    /// `None` when the app was installed.
    fn on_install_result(&self, error: Option<ErrorCode>);
}

/// Receives installation progress updates.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, status: &str, percent_complete: Option<u64>);
}
