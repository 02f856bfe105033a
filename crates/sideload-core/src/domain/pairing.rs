//! Pairing credential.
//!
//! The pairing file is a plist dictionary issued once when the device first
//! trusted this host.  Certificates and the private key are PEM blocks; some
//! tools store them as `<data>`, others as `<string>`, so both are accepted.

use std::fmt;
use std::io::Cursor;

use plist::{Dictionary, Value};
use thiserror::Error;

/// Errors raised while reading a pairing file.
#[derive(Debug, Error, PartialEq)]
pub enum PairingError {
    /// The file is not a plist, or its root is not a dictionary.
    #[error("pairing file is not a plist dictionary: {0}")]
    Malformed(String),

    /// A required entry is missing.
    #[error("pairing file is missing `{0}`")]
    MissingField(&'static str),

    /// An entry is present but has the wrong type or is empty.
    #[error("pairing file entry `{0}` is invalid")]
    InvalidField(&'static str),
}

/// Authentication material bound to one device. Read-only once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingCredential {
    host_id: String,
    system_buid: String,
    host_certificate: Vec<u8>,
    host_private_key: Vec<u8>,
    device_certificate: Vec<u8>,
    root_certificate: Option<Vec<u8>>,
    udid: Option<String>,
}

impl PairingCredential {
    /// Parses the contents of a pairing file (XML or binary plist).
    ///
    /// # Errors
    ///
    /// Returns [`PairingError`] when the file is not a dictionary or when one
    /// of `HostID`, `SystemBUID`, `HostCertificate`, `HostPrivateKey` or
    /// `DeviceCertificate` is missing or empty.
    pub fn from_plist_bytes(bytes: &[u8]) -> Result<Self, PairingError> {
        let value = Value::from_reader(Cursor::new(bytes))
            .map_err(|e| PairingError::Malformed(e.to_string()))?;
        let dict = value
            .into_dictionary()
            .ok_or_else(|| PairingError::Malformed("root is not a dictionary".to_string()))?;
        Self::from_dictionary(&dict)
    }

    /// Builds a credential from an already parsed dictionary.
    ///
    /// # Errors
    ///
    /// See [`PairingCredential::from_plist_bytes`].
    pub fn from_dictionary(dict: &Dictionary) -> Result<Self, PairingError> {
        Ok(Self {
            host_id: text(dict, "HostID")?,
            system_buid: text(dict, "SystemBUID")?,
            host_certificate: blob(dict, "HostCertificate")?,
            host_private_key: blob(dict, "HostPrivateKey")?,
            device_certificate: blob(dict, "DeviceCertificate")?,
            root_certificate: optional_blob(dict, "RootCertificate"),
            udid: dict
                .get("UDID")
                .and_then(Value::as_string)
                .map(str::to_string),
        })
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn system_buid(&self) -> &str {
        &self.system_buid
    }

    /// Host certificate, PEM encoded.
    pub fn host_certificate_pem(&self) -> &[u8] {
        &self.host_certificate
    }

    /// Host private key, PEM encoded.
    pub fn host_private_key_pem(&self) -> &[u8] {
        &self.host_private_key
    }

    /// Device certificate, PEM encoded.
    pub fn device_certificate_pem(&self) -> &[u8] {
        &self.device_certificate
    }

    pub fn root_certificate_pem(&self) -> Option<&[u8]> {
        self.root_certificate.as_deref()
    }

    /// Device identifier, when the pairing file records it.
    pub fn udid(&self) -> Option<&str> {
        self.udid.as_deref()
    }
}

// Key material stays out of logs.
impl fmt::Debug for PairingCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingCredential")
            .field("host_id", &self.host_id)
            .field("system_buid", &self.system_buid)
            .field("udid", &self.udid)
            .field("host_private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

fn text(dict: &Dictionary, field: &'static str) -> Result<String, PairingError> {
    let value = dict.get(field).ok_or(PairingError::MissingField(field))?;
    match value.as_string() {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(PairingError::InvalidField(field)),
    }
}

fn blob(dict: &Dictionary, field: &'static str) -> Result<Vec<u8>, PairingError> {
    let value = dict.get(field).ok_or(PairingError::MissingField(field))?;
    as_blob(value).ok_or(PairingError::InvalidField(field))
}

fn optional_blob(dict: &Dictionary, field: &str) -> Option<Vec<u8>> {
    dict.get(field).and_then(as_blob)
}

fn as_blob(value: &Value) -> Option<Vec<u8>> {
    let bytes = match value {
        Value::Data(data) => data.clone(),
        Value::String(s) => s.as_bytes().to_vec(),
        _ => return None,
    };
    (!bytes.is_empty()).then_some(bytes)
}
