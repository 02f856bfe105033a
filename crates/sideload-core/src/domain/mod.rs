//! Domain types for the installation transport.
//!
//! Nothing in here performs I/O.  The agent's application layer drives these
//! types; its infrastructure layer feeds them bytes read from devices and
//! files.

/// UI-facing error codes.
pub mod error_code;

/// Heartbeat interval tracking and the reconnect retry policy.
pub mod heartbeat;

/// The pairing credential that authenticates this host to one device.
pub mod pairing;

/// Naming of staged archives and the phases of a staging transfer.
pub mod staging;
