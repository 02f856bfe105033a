//! Install trigger: asks the installation proxy to install a staged archive.

use std::sync::Arc;

use sideload_core::protocol::installation::{InstallFailure, InstallStatus};
use sideload_core::ErrorCode;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::ports::{ProgressObserver, ServiceError};
use crate::application::session::SessionHandle;

/// Installation did not complete.
#[derive(Debug, Error)]
pub enum InstallError {
    /// The installation proxy could not be started.
    #[error("cannot open installation proxy: {0}")]
    OpenChannel(#[source] ServiceError),

    /// The device reported an error; kept verbatim.
    #[error("device refused installation: {0}")]
    Rejected(InstallFailure),

    /// The connection failed before a final status arrived.
    #[error("installation interrupted: {0}")]
    Interrupted(#[source] ServiceError),
}

impl InstallError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::OpenChannel(_) => ErrorCode::InstallChannel,
            Self::Rejected(failure) => ErrorCode::InstallRejected(failure.detail),
            Self::Interrupted(_) => ErrorCode::InstallProtocol,
        }
    }
}

/// Runs one installation request.
#[derive(Default)]
pub struct InstallTrigger {
    progress: Option<Arc<dyn ProgressObserver>>,
}

impl InstallTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards intermediate status updates to `observer`.
    pub fn with_progress(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.progress = Some(observer);
        self
    }

    /// Installs the archive staged at `remote_path`.  Not retried.
    ///
    /// # Errors
    ///
    /// [`InstallError`] describing why the installation did not complete.
    pub fn install(&self, session: &SessionHandle, remote_path: &str) -> Result<(), InstallError> {
        let mut channel = session.open_installer().map_err(InstallError::OpenChannel)?;

        info!("installing {remote_path}");
        channel
            .request_install(remote_path)
            .map_err(InstallError::Interrupted)?;

        loop {
            match channel.next_status().map_err(InstallError::Interrupted)? {
                InstallStatus::Progress {
                    status,
                    percent_complete,
                } => {
                    debug!("install progress: {status} ({percent_complete:?}%)");
                    if let Some(observer) = &self.progress {
                        observer.on_progress(&status, percent_complete);
                    }
                }
                InstallStatus::Complete => {
                    info!("installed {remote_path}");
                    return Ok(());
                }
                InstallStatus::Failed(failure) => return Err(InstallError::Rejected(failure)),
            }
        }
    }
}
