//! TCP/TLS transport to the device's lockdown broker.
//!
//! [`TcpSessionFactory::establish`] proves the pairing once and yields a
//! [`TransportSession`].  The session itself keeps no socket open: every
//! service is started on a fresh lockdown connection, which is closed with
//! `StopSession` as soon as the service port is known.

pub mod lockdown;
pub mod stream;
pub mod tls;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;
use sideload_core::protocol::lockdown::{
    SessionStarted, AFC_SERVICE, HEARTBEAT_SERVICE, INSTALLATION_PROXY_SERVICE,
};
use sideload_core::PairingCredential;
use tracing::{debug, info};

use crate::application::ports::{
    ConnectionError, FileTransferChannel, HeartbeatChannel, InstallChannel, ServiceError,
    ServiceProvider, SessionFactory,
};
use crate::infrastructure::services::{AfcClient, HeartbeatClient, InstallProxyClient};
use crate::infrastructure::storage::config::{AgentConfig, ConfigError};
use crate::infrastructure::storage::credential_store::FileCredentialStore;

use self::lockdown::LockdownClient;
use self::stream::ServiceStream;

/// Where the device is and how patient to be with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSettings {
    pub ip: Ipv4Addr,
    pub port: u16,
    /// `Label` sent with every lockdown request.
    pub label: String,
    pub connect_timeout: Duration,
    pub io_timeout: Duration,
    pub pin_device_certificate: bool,
}

impl TransportSettings {
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] when the device address is not IPv4.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            ip: config.device.ipv4()?,
            port: config.device.port,
            label: config.agent.label.clone(),
            connect_timeout: config.device.connect_timeout(),
            io_timeout: config.device.io_timeout(),
            pin_device_certificate: config.device.pin_device_certificate,
        })
    }

    fn connect(&self, port: u16) -> Result<ServiceStream, ConnectionError> {
        ServiceStream::connect(self.ip, port, self.connect_timeout, self.io_timeout)
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A proven pairing with one device, able to start services.
pub struct TransportSession {
    settings: TransportSettings,
    credential: PairingCredential,
    tls: Arc<ClientConfig>,
}

impl TransportSession {
    /// Starts `service` and returns a connected stream to it.
    ///
    /// # Errors
    ///
    /// Any [`ConnectionError`] from the lockdown round trip or the service
    /// connection.
    pub fn open_service(&self, service: &str) -> Result<ServiceStream, ConnectionError> {
        let (mut lockdown, session) = negotiate(&self.settings, &self.credential, &self.tls)?;
        let endpoint = lockdown.start_service(service)?;
        lockdown.stop_session(&session.session_id)?;
        drop(lockdown);

        let stream = self.settings.connect(endpoint.port)?;
        if endpoint.enable_ssl {
            return stream.into_tls(Arc::clone(&self.tls), self.settings.ip);
        }
        Ok(stream)
    }
}

impl ServiceProvider for TransportSession {
    fn open_heartbeat(&self) -> Result<Box<dyn HeartbeatChannel>, ServiceError> {
        let stream = self.open_service(HEARTBEAT_SERVICE)?;
        Ok(Box::new(HeartbeatClient::new(stream)))
    }

    fn open_file_transfer(&self) -> Result<Box<dyn FileTransferChannel>, ServiceError> {
        let stream = self.open_service(AFC_SERVICE)?;
        Ok(Box::new(AfcClient::new(stream)))
    }

    fn open_installer(&self) -> Result<Box<dyn InstallChannel>, ServiceError> {
        let stream = self.open_service(INSTALLATION_PROXY_SERVICE)?;
        Ok(Box::new(InstallProxyClient::new(stream)))
    }

    fn describe(&self) -> String {
        format!("lockdown {}:{}", self.settings.ip, self.settings.port)
    }
}

/// Connects to lockdown and runs `QueryType` then `StartSession`, upgrading
/// the socket to TLS when the device asks for it.
fn negotiate(
    settings: &TransportSettings,
    credential: &PairingCredential,
    tls: &Arc<ClientConfig>,
) -> Result<(LockdownClient<ServiceStream>, SessionStarted), ConnectionError> {
    let stream = settings.connect(settings.port)?;
    let mut lockdown = LockdownClient::new(stream, settings.label.as_str());
    lockdown.query_type()?;
    let session = lockdown.start_session(credential)?;

    if session.enable_ssl {
        let stream = lockdown
            .into_inner()
            .into_tls(Arc::clone(tls), settings.ip)?;
        lockdown = LockdownClient::new(stream, settings.label.as_str());
    }
    Ok((lockdown, session))
}

// ── Factory ───────────────────────────────────────────────────────────────────

/// Builds [`TransportSession`]s from the pairing file on disk.
pub struct TcpSessionFactory {
    settings: TransportSettings,
    store: FileCredentialStore,
}

impl TcpSessionFactory {
    pub fn new(settings: TransportSettings, store: FileCredentialStore) -> Self {
        Self { settings, store }
    }

    /// # Errors
    ///
    /// [`ConfigError`] for an unusable device address or pairing file path.
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            TransportSettings::from_config(config)?,
            FileCredentialStore::new(config.device.pairing_path()?),
        ))
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    /// Establishes a session without going through the trait object.
    ///
    /// # Errors
    ///
    /// See [`SessionFactory::establish`].
    pub fn connect(&self) -> Result<TransportSession, ConnectionError> {
        let credential = self.store.load()?;
        let tls = tls::client_config(&credential, self.settings.pin_device_certificate)?;

        debug!(
            "negotiating with {}:{}",
            self.settings.ip, self.settings.port
        );
        let (mut lockdown, session) = negotiate(&self.settings, &credential, &tls)?;
        lockdown.stop_session(&session.session_id)?;
        info!(
            "pairing accepted by {}:{}",
            self.settings.ip, self.settings.port
        );

        Ok(TransportSession {
            settings: self.settings.clone(),
            credential,
            tls,
        })
    }
}

impl SessionFactory for TcpSessionFactory {
    fn establish(&self) -> Result<Arc<dyn ServiceProvider>, ConnectionError> {
        Ok(Arc::new(self.connect()?))
    }
}
