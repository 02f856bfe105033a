//! Lockdown broker messages.
//!
//! Lockdown listens on [`LOCKDOWN_PORT`] and brokers everything else: the host
//! proves its pairing with `StartSession`, upgrades the socket to TLS when the
//! device asks for it, and then asks for individual services by name with
//! `StartService`.  The device answers with a fresh port to connect to.
//!
//! ```text
//! Host ──[QueryType]──────────────────────► Device
//! Host ◄─[Type = com.apple.mobile.lockdown]─ Device
//! Host ──[StartSession HostID SystemBUID]─► Device
//! Host ◄─[SessionID EnableSessionSSL]────── Device
//!        ... TLS handshake when requested ...
//! Host ──[StartService Service]───────────► Device
//! Host ◄─[Port EnableServiceSSL]─────────── Device
//! ```

use plist::{Dictionary, Value};

use crate::protocol::codec::{
    device_error, flag, required_string, required_unsigned, ProtocolError,
};

/// TCP port of the lockdown broker.
pub const LOCKDOWN_PORT: u16 = 62078;

/// `Type` value a genuine lockdown broker reports for `QueryType`.
pub const LOCKDOWN_SERVICE_TYPE: &str = "com.apple.mobile.lockdown";

/// Keep-alive service.
pub const HEARTBEAT_SERVICE: &str = "com.apple.mobile.heartbeat";

/// File conduit service.
pub const AFC_SERVICE: &str = "com.apple.afc";

/// Installation proxy service.
pub const INSTALLATION_PROXY_SERVICE: &str = "com.apple.mobile.installation_proxy";

/// A request sent to the lockdown broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockdownRequest {
    /// Asks the peer to identify itself.
    QueryType,
    /// Opens an authenticated session for a paired host.
    StartSession { host_id: String, system_buid: String },
    /// Starts a named service and asks for its port.
    StartService { service: String },
    /// Closes the session opened by `StartSession`.
    StopSession { session_id: String },
}

impl LockdownRequest {
    /// The value of the `Request` field for this request.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueryType => "QueryType",
            Self::StartSession { .. } => "StartSession",
            Self::StartService { .. } => "StartService",
            Self::StopSession { .. } => "StopSession",
        }
    }

    /// Builds the plist dictionary sent on the wire.
    ///
    /// `label` identifies this client in the device's logs.
    pub fn to_dictionary(&self, label: &str) -> Dictionary {
        let mut msg = Dictionary::new();
        msg.insert("Label".to_string(), Value::from(label));
        msg.insert("Request".to_string(), Value::from(self.name()));

        match self {
            Self::QueryType => {}
            Self::StartSession {
                host_id,
                system_buid,
            } => {
                msg.insert("HostID".to_string(), Value::from(host_id.as_str()));
                msg.insert("SystemBUID".to_string(), Value::from(system_buid.as_str()));
            }
            Self::StartService { service } => {
                msg.insert("Service".to_string(), Value::from(service.as_str()));
            }
            Self::StopSession { session_id } => {
                msg.insert("SessionID".to_string(), Value::from(session_id.as_str()));
            }
        }
        msg
    }
}

/// Outcome of a successful `StartSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStarted {
    /// Identifier to quote in `StopSession`.
    pub session_id: String,
    /// Whether the device expects the socket to be upgraded to TLS now.
    pub enable_ssl: bool,
}

/// Outcome of a successful `StartService`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    /// Name of the service that was started.
    pub service: String,
    /// TCP port the service listens on.
    pub port: u16,
    /// Whether the service connection must be upgraded to TLS.
    pub enable_ssl: bool,
}

/// Fails with [`ProtocolError::Rejected`] when `response` carries an `Error`.
///
/// # Errors
///
/// Returns the device's error string wrapped in [`ProtocolError::Rejected`].
pub fn check_response(request: &LockdownRequest, response: &Dictionary) -> Result<(), ProtocolError> {
    match device_error(response) {
        Some(reason) => Err(ProtocolError::Rejected {
            request: request.name().to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

/// Validates a `QueryType` answer.
///
/// # Errors
///
/// Returns [`ProtocolError::UnexpectedValue`] when the peer is not a lockdown
/// broker, or [`ProtocolError::Rejected`] when the device refused the query.
pub fn parse_query_type(response: &Dictionary) -> Result<(), ProtocolError> {
    check_response(&LockdownRequest::QueryType, response)?;
    let kind = required_string(response, "Type")?;
    if kind != LOCKDOWN_SERVICE_TYPE {
        return Err(ProtocolError::UnexpectedValue {
            field: "Type",
            value: kind.to_string(),
        });
    }
    Ok(())
}

/// Parses a `StartSession` answer.
///
/// # Errors
///
/// Returns [`ProtocolError::Rejected`] (e.g. `InvalidHostID` for an unknown
/// pairing) or [`ProtocolError::MissingField`] for a malformed answer.
pub fn parse_start_session(
    request: &LockdownRequest,
    response: &Dictionary,
) -> Result<SessionStarted, ProtocolError> {
    check_response(request, response)?;
    Ok(SessionStarted {
        session_id: required_string(response, "SessionID")?.to_string(),
        enable_ssl: flag(response, "EnableSessionSSL"),
    })
}

/// Parses a `StartService` answer.
///
/// # Errors
///
/// Returns [`ProtocolError::Rejected`] for refused services and
/// [`ProtocolError::UnexpectedValue`] for ports outside `1..=65535`.
pub fn parse_start_service(
    request: &LockdownRequest,
    response: &Dictionary,
) -> Result<ServiceEndpoint, ProtocolError> {
    check_response(request, response)?;
    let raw_port = required_unsigned(response, "Port")?;
    let port = u16::try_from(raw_port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| ProtocolError::UnexpectedValue {
            field: "Port",
            value: raw_port.to_string(),
        })?;

    let service = match request {
        LockdownRequest::StartService { service } => service.clone(),
        _ => required_string(response, "Service")?.to_string(),
    };

    Ok(ServiceEndpoint {
        service,
        port,
        enable_ssl: flag(response, "EnableServiceSSL"),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
