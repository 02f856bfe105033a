//! Clients for the device services started through lockdown.

pub mod afc;
pub mod heartbeat;
pub mod installation;

pub use afc::AfcClient;
pub use heartbeat::HeartbeatClient;
pub use installation::InstallProxyClient;
