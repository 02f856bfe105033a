//! Application layer use cases for the agent.
//!
//! - **`session`** – The slot holding the current device session; swapping in
//!   a new session retires the old one.
//!
//! - **`heartbeat`** – The keep-alive loop on its own thread, with backoff and
//!   a circuit breaker around reconnects.
//!
//! - **`stage_transfer`** – Packages an app and uploads it to the staging
//!   directory over AFC.
//!
//! - **`install_app`** – Asks the installation proxy to install a staged
//!   archive.
//!
//! - **`pipeline`** – Transfer then install on the blocking pool, reported
//!   once through the completion sink.
//!
//! The device and the file system are reached only through the traits in
//! **`ports`**.

pub mod heartbeat;
pub mod install_app;
pub mod pipeline;
pub mod ports;
pub mod session;
pub mod stage_transfer;
