//! Heartbeat session: keeps the device session alive.
//!
//! ```text
//!            ┌──────────── retry after backoff ────────────┐
//!            ▼                                             │
//!      Connecting ──ok──► Alive ──round trip fails──► Failed
//!            │                                             │
//!            └──────────── establish fails ───────────────►┘
//! ```
//!
//! Each pass through `Connecting` establishes a brand-new session, installs it
//! in the [`SessionSlot`] and opens a fresh heartbeat channel starting at
//! [`sideload_core::domain::heartbeat::INITIAL_INTERVAL_SECS`].  The loop
//! runs on its own named OS thread and blocks on the socket; the only way to
//! stop it early is [`HeartbeatHandle::stop`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use sideload_core::{ErrorCode, HeartbeatPhase, IntervalTracker, RetryDecision, RetryPolicy, RetryState};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::ports::{
    CompletionSink, ConnectionError, HeartbeatChannel, ServiceError, SessionFactory,
};
use crate::application::session::SessionSlot;

/// Granularity of interruptible backoff sleeps.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a heartbeat attempt failed, or why the loop ended.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("could not establish session: {0}")]
    Connection(#[from] ConnectionError),

    #[error("heartbeat channel failed: {0}")]
    Channel(#[from] ServiceError),

    /// The breaker opened; the loop has exited.
    #[error("heartbeat gave up after {failures} consecutive failures")]
    CircuitOpen { failures: u32 },
}

impl HeartbeatError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Connection(e) => e.error_code(),
            Self::Channel(ServiceError::Connection(e)) => e.error_code(),
            Self::Channel(_) => ErrorCode::Heartbeat,
            Self::CircuitOpen { .. } => ErrorCode::HeartbeatCircuitOpen,
        }
    }
}

/// The heartbeat loop and its collaborators.
pub struct HeartbeatSession {
    factory: Arc<dyn SessionFactory>,
    slot: Arc<SessionSlot>,
    sink: Arc<dyn CompletionSink>,
    policy: RetryPolicy,
    running: Arc<AtomicBool>,
}

impl HeartbeatSession {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        slot: Arc<SessionSlot>,
        sink: Arc<dyn CompletionSink>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            factory,
            slot,
            sink,
            policy,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Starts the loop on a dedicated thread named `heartbeat`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(self) -> std::io::Result<HeartbeatHandle> {
        let running = Arc::clone(&self.running);
        let thread = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || self.run())?;
        Ok(HeartbeatHandle {
            running,
            thread: Some(thread),
        })
    }

    /// Runs until stopped (`Ok`) or until the breaker opens.
    ///
    /// # Errors
    ///
    /// [`HeartbeatError::CircuitOpen`] when the retry policy gives up.
    pub fn run(&self) -> Result<(), HeartbeatError> {
        let mut retry = RetryState::new(self.policy);
        info!("heartbeat started");

        while self.is_running() {
            let failure = match self.connect() {
                Ok(channel) => {
                    self.sink.on_heartbeat_result(None);
                    match self.pump(channel, &mut retry) {
                        Some(failure) => failure,
                        None => break,
                    }
                }
                Err(e) => {
                    error!("heartbeat {}: {e}", HeartbeatPhase::Connecting);
                    self.sink.on_heartbeat_result(Some(e.error_code()));
                    e
                }
            };

            debug!("heartbeat {}: {failure}", HeartbeatPhase::Failed);
            match retry.record_failure() {
                RetryDecision::RetryAfter(delay) => {
                    info!(
                        "reconnecting heartbeat in {delay:?} (failure {} of {})",
                        retry.consecutive_failures(),
                        retry.policy().max_consecutive_failures
                    );
                    self.sleep_while_running(delay);
                }
                RetryDecision::GiveUp => {
                    let err = HeartbeatError::CircuitOpen {
                        failures: retry.consecutive_failures(),
                    };
                    error!("{err}");
                    self.slot.clear();
                    self.sink.on_heartbeat_result(Some(err.error_code()));
                    return Err(err);
                }
            }
        }

        info!("heartbeat stopped");
        Ok(())
    }

    /// `Connecting`: a fresh session and a fresh channel.
    fn connect(&self) -> Result<Box<dyn HeartbeatChannel>, HeartbeatError> {
        let session = self.slot.establish(self.factory.as_ref())?;
        let channel = session.open_heartbeat()?;
        info!(
            "heartbeat {} on session generation {}",
            HeartbeatPhase::Alive,
            session.generation()
        );
        Ok(channel)
    }

    /// `Alive`: strict Marco → Polo round trips.  Returns the failure that
    /// ended the loop, or `None` when stopped.  The channel is dropped on
    /// return either way.
    fn pump(
        &self,
        mut channel: Box<dyn HeartbeatChannel>,
        retry: &mut RetryState,
    ) -> Option<HeartbeatError> {
        let mut interval = IntervalTracker::new();

        while self.is_running() {
            let announced = match channel.receive_marco(interval.deadline()) {
                Ok(n) => n,
                Err(e) => {
                    warn!("heartbeat lost waiting {}s for Marco: {e}", interval.current());
                    return Some(e.into());
                }
            };
            interval.record(announced);

            if let Err(e) = channel.send_polo() {
                warn!("heartbeat lost sending Polo: {e}");
                return Some(e.into());
            }
            retry.record_success();
            debug!("heartbeat round trip ok, next deadline {}s", interval.current());
        }
        None
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn sleep_while_running(&self, delay: Duration) {
        let until = Instant::now() + delay;
        while self.is_running() {
            let now = Instant::now();
            if now >= until {
                break;
            }
            thread::sleep((until - now).min(STOP_POLL_INTERVAL));
        }
    }
}

/// Handle to a running heartbeat thread.
pub struct HeartbeatHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), HeartbeatError>>>,
}

impl HeartbeatHandle {
    /// Asks the loop to exit after the current blocking call returns.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Waits for the thread and returns how the loop ended.  A panicked
    /// thread is reported as a channel failure.
    pub fn join(mut self) -> Result<(), HeartbeatError> {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|_| {
                Err(HeartbeatError::Channel(ServiceError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "heartbeat thread panicked",
                ))))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
