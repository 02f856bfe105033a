//! # sideload-core
//!
//! Shared library for the sideload installation transport containing the
//! device wire codecs and the domain types the agent builds on.
//!
//! This crate has zero dependencies on sockets, TLS, threads or the file
//! system.  Everything here operates on byte slices and plain values so it can
//! be tested without a device.
//!
//! # Architecture overview
//!
//! Installing an app on a paired device is a four-step conversation:
//!
//! 1. The host opens a session with the device's **lockdown** broker using the
//!    pairing credential, and asks it to start individual services.
//! 2. The **heartbeat** service keeps that session alive with a Marco/Polo
//!    exchange.
//! 3. The **AFC** (file conduit) service receives the packaged archive in the
//!    `/PublicStaging` directory.
//! 4. The **installation proxy** service installs the staged archive.
//!
//! The modules map onto that flow:
//!
//! - **`protocol`** – How bytes travel: length-prefixed plist framing shared by
//!   lockdown, heartbeat and installation proxy, plus the binary AFC packet
//!   format.
//!
//! - **`domain`** – Pure rules with no I/O: the pairing credential, the
//!   heartbeat interval tracker and retry policy, staged archive naming and the
//!   UI-facing error codes.

pub mod domain;
pub mod protocol;

pub use domain::error_code::ErrorCode;
pub use domain::heartbeat::{HeartbeatPhase, IntervalTracker, RetryDecision, RetryPolicy, RetryState};
pub use domain::pairing::{PairingCredential, PairingError};
pub use domain::staging::{StagedArchive, TransferPhase};
pub use protocol::codec::{decode_plist_frame, encode_plist_frame, ProtocolError};
