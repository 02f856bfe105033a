//! TOML-based configuration for the agent.
//!
//! Read from the platform-appropriate config file unless `--config` names
//! another one:
//! - Windows:  `%APPDATA%\Sideload\config.toml`
//! - Linux:    `$XDG_CONFIG_HOME/sideload/config.toml` (or `~/.config/...`)
//! - macOS:    `~/Library/Application Support/Sideload/config.toml`
//!
//! ```toml
//! [agent]
//! log_level = "debug"
//!
//! [device]
//! address = "10.7.0.1"
//! pairing_file = "/home/me/pairing.plist"
//!
//! [heartbeat]
//! max_consecutive_failures = 20
//! ```
//!
//! Every field has a default, so a missing file or a partial one is fine.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sideload_core::domain::staging::STAGING_DIRECTORY;
use sideload_core::protocol::lockdown::LOCKDOWN_PORT;
use sideload_core::RetryPolicy;
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub device: DeviceSection,
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    #[serde(default)]
    pub staging: StagingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSection {
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// `Label` sent with every lockdown request.
    #[serde(default = "default_label")]
    pub label: String,
}

/// Where the device is and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// IPv4 address of the device on the tunnel interface.
    #[serde(default = "default_address")]
    pub address: String,
    /// Lockdown port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Pairing file; defaults to `<data dir>/sideload/pairing.plist`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_file: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Read/write timeout for lockdown, AFC and installation proxy sockets.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
    /// Only accept the device certificate recorded in the pairing file.
    #[serde(default = "default_true")]
    pub pin_device_certificate: bool,
}

/// Reconnect policy of the heartbeat loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSection {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagingSection {
    /// Device directory archives are uploaded to.
    #[serde(default = "default_remote_directory")]
    pub remote_directory: String,
    /// Local scratch directory; defaults to `<temp>/sideload-staging`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_label() -> String {
    "sideload-agent".to_string()
}
fn default_address() -> String {
    "10.7.0.1".to_string()
}
fn default_port() -> u16 {
    LOCKDOWN_PORT
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_io_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_max_consecutive_failures() -> u32 {
    10
}
fn default_remote_directory() -> String {
    STAGING_DIRECTORY.to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            label: default_label(),
        }
    }
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            pairing_file: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            io_timeout_secs: default_io_timeout_secs(),
            pin_device_certificate: default_true(),
        }
    }
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
        }
    }
}

impl Default for StagingSection {
    fn default() -> Self {
        Self {
            remote_directory: default_remote_directory(),
            work_dir: None,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl DeviceSection {
    /// The device address as an IPv4 literal.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for anything else, host names included.
    pub fn ipv4(&self) -> Result<Ipv4Addr, ConfigError> {
        self.address.parse().map_err(|_| ConfigError::Invalid {
            field: "device.address",
            reason: format!("`{}` is not an IPv4 address", self.address),
        })
    }

    /// The configured pairing file, or the per-installation default.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoPlatformConfigDir`] when no default can be derived.
    pub fn pairing_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.pairing_file {
            Some(path) => Ok(path.clone()),
            None => platform_data_dir()
                .map(|dir| dir.join("pairing.plist"))
                .ok_or(ConfigError::NoPlatformConfigDir),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }
}

impl HeartbeatSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            max_consecutive_failures: self.max_consecutive_failures.max(1),
        }
    }
}

impl StagingSection {
    /// Local scratch directory for packaging.
    pub fn work_root(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("sideload-staging"))
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the default config file path.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    platform_config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoPlatformConfigDir)
}

/// Loads the config from `path`, or from [`config_file_path`] when `None`.
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AgentConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Resolves the platform config directory, `Sideload` subdirectory included.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Sideload"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("sideload"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("Sideload"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

/// Resolves the platform data directory, `sideload` subdirectory included.
fn platform_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })?;
        Some(base.join("sideload"))
    }

    #[cfg(not(target_os = "linux"))]
    {
        platform_config_dir()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_default_device_endpoint_is_tunnel_lockdown() {
        // Arrange / Act
        let cfg = AgentConfig::default();

        // Assert
        assert_eq!(cfg.device.address, "10.7.0.1");
        assert_eq!(cfg.device.port, 62078);
        assert_eq!(cfg.device.ipv4().unwrap(), Ipv4Addr::new(10, 7, 0, 1));
    }

    #[test]
    fn test_default_retry_policy_matches_domain_default() {
        assert_eq!(
            AgentConfig::default().heartbeat.retry_policy(),
            RetryPolicy::default()
        );
    }

    #[test]
    fn test_default_label_and_staging_directory() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.agent.label, "sideload-agent");
        assert_eq!(cfg.staging.remote_directory, "/PublicStaging");
    }

    // ── Parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        // Arrange
        let text = r#"
            [device]
            address = "192.168.1.20"

            [heartbeat]
            max_consecutive_failures = 3
        "#;

        // Act
        let cfg: AgentConfig = toml::from_str(text).unwrap();

        // Assert
        assert_eq!(cfg.device.address, "192.168.1.20");
        assert_eq!(cfg.device.port, 62078);
        assert_eq!(cfg.heartbeat.max_consecutive_failures, 3);
        assert_eq!(cfg.heartbeat.initial_backoff_ms, 1_000);
        assert_eq!(cfg.agent.log_level, "info");
    }

    #[test]
    fn test_host_name_address_is_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.device.address = "iphone.local".to_string();
        assert!(matches!(
            cfg.device.ipv4(),
            Err(ConfigError::Invalid { field: "device.address", .. })
        ));
    }

    #[test]
    fn test_explicit_pairing_file_wins() {
        let mut cfg = AgentConfig::default();
        cfg.device.pairing_file = Some(PathBuf::from("/tmp/p.plist"));
        assert_eq!(cfg.device.pairing_path().unwrap(), PathBuf::from("/tmp/p.plist"));
    }

    #[test]
    fn test_retry_policy_clamps_nonsense_values() {
        let section = HeartbeatSection {
            initial_backoff_ms: 500,
            max_backoff_ms: 100,
            max_consecutive_failures: 0,
        };
        let policy = section.retry_policy();
        assert_eq!(policy.max_backoff, Duration::from_millis(500));
        assert_eq!(policy.max_consecutive_failures, 1);
    }

    // ── Loading ───────────────────────────────────────────────────────────────

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, AgentConfig::default());
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device\naddress = ").unwrap();

        // Act
        let result = load_config(Some(&path));

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_config_survives_toml_round_trip() {
        let mut cfg = AgentConfig::default();
        cfg.staging.work_dir = Some(PathBuf::from("/var/tmp/sideload"));
        cfg.device.pin_device_certificate = false;

        let text = toml::to_string_pretty(&cfg).unwrap();
        let restored: AgentConfig = toml::from_str(&text).unwrap();

        assert_eq!(cfg, restored);
    }
}
