//! Error codes handed to the user interface.
//!
//! The completion callbacks carry nothing but an `Option<ErrorCode>`, so every
//! failure the agent can report is flattened into one of these values.

use std::fmt;

use crate::domain::staging::TransferPhase;

/// A UI-facing failure code with a stable number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The pairing file could not be read or parsed.
    Credential,
    /// No session could be established with the device.
    Connection,
    /// A heartbeat round trip failed; a reconnect follows.
    Heartbeat,
    /// The heartbeat gave up after too many consecutive failures.
    HeartbeatCircuitOpen,
    /// The staging transfer failed in the given phase.
    Transfer(TransferPhase),
    /// The installation proxy channel could not be opened.
    InstallChannel,
    /// The device refused or failed the installation, with the device's
    /// `ErrorDetail` when it sent one.
    InstallRejected(Option<i64>),
    /// The installation proxy broke the protocol or the connection dropped.
    InstallProtocol,
    /// The worker running the pipeline stopped unexpectedly.
    Internal,
}

impl ErrorCode {
    /// Stable numeric code.
    ///
    /// | Range | Area       |
    /// |-------|------------|
    /// | 1xx   | connection |
    /// | 2xx   | heartbeat  |
    /// | 3xx   | transfer   |
    /// | 4xx   | install    |
    pub fn code(self) -> u32 {
        match self {
            Self::Credential => 100,
            Self::Connection => 101,
            Self::Heartbeat => 200,
            Self::HeartbeatCircuitOpen => 201,
            Self::Transfer(phase) => 300 + phase.ordinal(),
            Self::InstallChannel => 400,
            Self::InstallRejected(_) => 401,
            Self::InstallProtocol => 402,
            Self::Internal => 900,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential => write!(f, "E{}: pairing credential unavailable", self.code()),
            Self::Connection => write!(f, "E{}: could not connect to device", self.code()),
            Self::Heartbeat => write!(f, "E{}: heartbeat lost", self.code()),
            Self::HeartbeatCircuitOpen => {
                write!(f, "E{}: heartbeat gave up reconnecting", self.code())
            }
            Self::Transfer(phase) => write!(f, "E{}: transfer failed ({phase})", self.code()),
            Self::InstallChannel => {
                write!(f, "E{}: could not reach installation service", self.code())
            }
            Self::InstallRejected(None) => {
                write!(f, "E{}: device rejected installation", self.code())
            }
            Self::InstallRejected(Some(detail)) => write!(
                f,
                "E{}: device rejected installation (detail {detail})",
                self.code()
            ),
            Self::InstallProtocol => write!(f, "E{}: installation interrupted", self.code()),
            Self::Internal => write!(f, "E{}: internal error", self.code()),
        }
    }
}
