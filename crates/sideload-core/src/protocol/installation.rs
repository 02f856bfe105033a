//! Installation proxy messages.
//!
//! The host sends a single `Install` command naming a staged package; the
//! device streams status dictionaries back until it reports `Complete` or an
//! `Error`.
//!
//! ```text
//! Host   ──[Command=Install PackagePath ClientOptions]──► Device
//! Device ──[Status=CreatingStagingDirectory PercentComplete=5]──► Host
//! Device ──[Status=...            PercentComplete=..]──► Host   (repeated)
//! Device ──[Status=Complete]─────────────────────────► Host
//!   or
//! Device ──[Error ErrorDescription ErrorDetail]──────► Host
//! ```

use std::fmt;

use plist::{Dictionary, Value};

use crate::protocol::codec::{device_error, optional_signed, optional_unsigned, ProtocolError};

/// `Status` value marking a finished installation.
pub const STATUS_COMPLETE: &str = "Complete";

/// Builds the `Install` command for the package at `package_path`.
///
/// `client_options` is forwarded verbatim; an empty dictionary installs a
/// regular `.ipa`.
pub fn install_request(package_path: &str, client_options: Dictionary) -> Dictionary {
    let mut msg = Dictionary::new();
    msg.insert("Command".to_string(), Value::from("Install"));
    msg.insert("PackagePath".to_string(), Value::from(package_path));
    msg.insert("ClientOptions".to_string(), Value::Dictionary(client_options));
    msg
}

/// Error reported by the device, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFailure {
    /// The device's `Error` string, e.g. `ApplicationVerificationFailed`.
    pub error: String,
    /// Human-readable `ErrorDescription`, when present.
    pub description: Option<String>,
    /// Numeric `ErrorDetail`, when present.  Usually negative, e.g.
    /// `-402620395` (`0xE8008015`).
    pub detail: Option<i64>,
}

impl fmt::Display for InstallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(detail) = self.detail {
            write!(f, " ({detail})")?;
        }
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        Ok(())
    }
}

/// One status update from the installation proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallStatus {
    /// Work in progress.
    Progress {
        status: String,
        percent_complete: Option<u64>,
    },
    /// Installation finished successfully.
    Complete,
    /// Installation failed; the device's error is carried verbatim.
    Failed(InstallFailure),
}

impl InstallStatus {
    /// Whether this update ends the exchange.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Classifies one status dictionary received from the device.
///
/// # Errors
///
/// Returns [`ProtocolError::MissingField`] when the dictionary carries neither
/// `Error` nor `Status`.
pub fn parse_install_status(msg: &Dictionary) -> Result<InstallStatus, ProtocolError> {
    if let Some(error) = device_error(msg) {
        return Ok(InstallStatus::Failed(InstallFailure {
            error: error.to_string(),
            description: msg
                .get("ErrorDescription")
                .and_then(Value::as_string)
                .map(str::to_string),
            detail: optional_signed(msg, "ErrorDetail"),
        }));
    }

    let status = msg
        .get("Status")
        .and_then(Value::as_string)
        .ok_or(ProtocolError::MissingField("Status"))?;

    if status == STATUS_COMPLETE {
        return Ok(InstallStatus::Complete);
    }

    Ok(InstallStatus::Progress {
        status: status.to_string(),
        percent_complete: optional_unsigned(msg, "PercentComplete"),
    })
}
