//! Pairing credential store.

use std::path::{Path, PathBuf};

use sideload_core::PairingCredential;
use tracing::debug;

use crate::application::ports::ConnectionError;

/// Reads the pairing credential from a plist file on every load, so a
/// replaced pairing file is picked up by the next reconnect.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// # Errors
    ///
    /// [`ConnectionError::CredentialUnavailable`] when the file cannot be
    /// read and [`ConnectionError::CredentialInvalid`] when it does not parse.
    pub fn load(&self) -> Result<PairingCredential, ConnectionError> {
        let bytes = std::fs::read(&self.path).map_err(|source| {
            ConnectionError::CredentialUnavailable {
                path: self.path.clone(),
                source,
            }
        })?;
        let credential = PairingCredential::from_plist_bytes(&bytes)?;
        debug!("loaded pairing credential for host {}", credential.host_id());
        Ok(credential)
    }
}
