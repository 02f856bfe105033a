//! Infrastructure layer for the agent.
//!
//! Contains the adapters behind the application ports: sockets and TLS, the
//! device service clients, the zip archiver, files on disk and configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `sideload_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`transport`** – TCP connections to the device, the TLS upgrade, the
//!   lockdown conversation and the `TcpSessionFactory` that proves the
//!   pairing and starts services.
//!
//! - **`services`** – Blocking clients for the heartbeat, AFC and
//!   installation proxy services, one per started service stream.
//!
//! - **`archive`** – Packages `.app` bundles into `.ipa` archives.
//!
//! - **`storage`** – The TOML config file and the pairing credential file.
//!
//! - **`reporting`** – Logs completions and forwards them to the CLI.

pub mod archive;
pub mod reporting;
pub mod services;
pub mod storage;
pub mod transport;
