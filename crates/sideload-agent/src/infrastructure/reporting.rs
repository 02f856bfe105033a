//! Completion reporting for the command-line front end.
//!
//! [`ChannelSink`] logs every outcome and forwards it as a [`Completion`] on
//! an unbounded tokio channel, so the async `main` can wait for the events it
//! cares about while the heartbeat thread and the blocking pool report from
//! outside the runtime.

use sideload_core::ErrorCode;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::application::ports::{CompletionSink, ProgressObserver};

/// One report delivered to the user interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Heartbeat(Option<ErrorCode>),
    Install(Option<ErrorCode>),
}

pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Completion>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Completion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, completion: Completion) {
        // The receiver goes away during shutdown; the log line is enough then.
        if self.tx.send(completion).is_err() {
            debug!("completion receiver closed, dropped {completion:?}");
        }
    }
}

impl CompletionSink for ChannelSink {
    fn on_heartbeat_result(&self, error: Option<ErrorCode>) {
        match error {
            None => info!("device session is alive"),
            Some(code) => warn!("heartbeat session failed: {code}"),
        }
        self.forward(Completion::Heartbeat(error));
    }

    fn on_install_result(&self, error: Option<ErrorCode>) {
        match error {
            None => info!("app installed"),
            Some(code) => error!("installation failed: {code}"),
        }
        self.forward(Completion::Install(error));
    }
}

/// Logs installation progress.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_progress(&self, status: &str, percent_complete: Option<u64>) {
        match percent_complete {
            Some(percent) => info!("install: {status} ({percent}%)"),
            None => info!("install: {status}"),
        }
    }
}
