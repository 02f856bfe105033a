//! Lockdown broker client.

use plist::Dictionary;
use sideload_core::protocol::lockdown::{
    check_response, parse_query_type, parse_start_service, parse_start_session, LockdownRequest,
    ServiceEndpoint, SessionStarted,
};
use sideload_core::PairingCredential;
use tracing::debug;

use crate::application::ports::ConnectionError;
use crate::infrastructure::transport::stream::{read_plist, write_plist, DeviceStream};

/// One request/response conversation with the lockdown broker.
///
/// Owns the stream so the caller can take it back with
/// [`LockdownClient::into_inner`] to upgrade it to TLS mid-conversation.
pub struct LockdownClient<S> {
    stream: S,
    label: String,
}

impl<S: DeviceStream> LockdownClient<S> {
    pub fn new(stream: S, label: impl Into<String>) -> Self {
        Self {
            stream,
            label: label.into(),
        }
    }

    /// Confirms the peer is a lockdown broker.
    pub fn query_type(&mut self) -> Result<(), ConnectionError> {
        let response = self.exchange(&LockdownRequest::QueryType)?;
        parse_query_type(&response)?;
        Ok(())
    }

    /// Proves the pairing with the credential's host identity.
    pub fn start_session(
        &mut self,
        credential: &PairingCredential,
    ) -> Result<SessionStarted, ConnectionError> {
        let request = LockdownRequest::StartSession {
            host_id: credential.host_id().to_string(),
            system_buid: credential.system_buid().to_string(),
        };
        let response = self.exchange(&request)?;
        let started = parse_start_session(&request, &response)?;
        debug!(
            "lockdown session {} started (tls={})",
            started.session_id, started.enable_ssl
        );
        Ok(started)
    }

    /// Asks the broker to start `service`.
    pub fn start_service(&mut self, service: &str) -> Result<ServiceEndpoint, ConnectionError> {
        let request = LockdownRequest::StartService {
            service: service.to_string(),
        };
        let response = self.exchange(&request)?;
        let endpoint = parse_start_service(&request, &response)?;
        debug!(
            "service {} on port {} (tls={})",
            endpoint.service, endpoint.port, endpoint.enable_ssl
        );
        Ok(endpoint)
    }

    pub fn stop_session(&mut self, session_id: &str) -> Result<(), ConnectionError> {
        let request = LockdownRequest::StopSession {
            session_id: session_id.to_string(),
        };
        let response = self.exchange(&request)?;
        check_response(&request, &response)?;
        Ok(())
    }

    /// Gives back the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    fn exchange(&mut self, request: &LockdownRequest) -> Result<Dictionary, ConnectionError> {
        write_plist::<_, ConnectionError>(&mut self.stream, &request.to_dictionary(&self.label))?;
        read_plist::<_, ConnectionError>(&mut self.stream)
    }
}
