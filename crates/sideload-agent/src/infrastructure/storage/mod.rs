//! Persistent storage: the TOML config and the pairing credential file.

pub mod config;
pub mod credential_store;
