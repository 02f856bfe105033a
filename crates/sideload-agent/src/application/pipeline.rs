//! Install pipeline: transfer, then install, then one completion callback.
//!
//! The pipeline is blocking.  [`InstallPipeline::spawn`] dispatches one run to
//! the tokio blocking pool so a caller on the runtime never blocks on device
//! I/O.  Cancelling means dropping the returned handle; the run itself is not
//! interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sideload_core::{ErrorCode, TransferPhase};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::install_app::{InstallError, InstallTrigger};
use crate::application::ports::{CompletionSink, ServiceError};
use crate::application::session::SessionSlot;
use crate::application::stage_transfer::{StagingTransfer, TransferCause, TransferError};

/// Why a pipeline run failed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Install(#[from] InstallError),
}

impl PipelineError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Transfer(e) => e.error_code(),
            Self::Install(e) => e.error_code(),
        }
    }
}

/// Transfer + install against the current session.
pub struct InstallPipeline {
    slot: Arc<SessionSlot>,
    transfer: StagingTransfer,
    installer: InstallTrigger,
    sink: Arc<dyn CompletionSink>,
}

impl InstallPipeline {
    pub fn new(
        slot: Arc<SessionSlot>,
        transfer: StagingTransfer,
        installer: InstallTrigger,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        Self {
            slot,
            transfer,
            installer,
            sink,
        }
    }

    /// Runs the pipeline on the calling thread without reporting to the sink.
    ///
    /// Install only runs after a successful transfer.  Returns the remote
    /// staging path of the installed archive.
    ///
    /// # Errors
    ///
    /// The first [`TransferError`] or [`InstallError`].
    pub fn run(&self, source: &Path) -> Result<String, PipelineError> {
        let session = self.slot.current().ok_or_else(|| TransferError {
            phase: TransferPhase::OpenChannel,
            cause: TransferCause::Service(ServiceError::NoSession),
        })?;

        let remote_path = self.transfer.upload(&session, source)?;
        self.installer.install(&session, &remote_path)?;
        Ok(remote_path)
    }

    /// Runs the pipeline and reports the outcome through the sink, once.
    pub fn run_and_report(&self, source: &Path) -> Result<String, PipelineError> {
        let result = self.run(source);
        match &result {
            Ok(path) => {
                info!("pipeline finished: {} installed from {path}", source.display());
                self.sink.on_install_result(None);
            }
            Err(e) => {
                error!("pipeline failed for {}: {e}", source.display());
                self.sink.on_install_result(Some(e.error_code()));
            }
        }
        result
    }

    /// Dispatches [`run_and_report`](Self::run_and_report) to the blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self: Arc<Self>, source: PathBuf) -> JoinHandle<Result<String, PipelineError>> {
        tokio::task::spawn_blocking(move || self.run_and_report(&source))
    }
}
