//! sideload-agent library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The agent runs on the host side of a private network link to one paired
//! device:
//!
//! 1. Loads the pairing credential and establishes a lockdown session.
//! 2. Keeps that session alive from a dedicated heartbeat thread, rebuilding
//!    it with backoff whenever the device stops answering.
//! 3. On request, packages an app, uploads it to `/PublicStaging` over AFC and
//!    asks the installation proxy to install it.
//! 4. Reports every outcome through a [`application::ports::CompletionSink`].

/// Application layer: use cases and the ports they drive.
pub mod application;

/// Infrastructure layer: sockets, TLS, device protocol clients, files and config.
pub mod infrastructure;
