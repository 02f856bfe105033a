//! TLS for lockdown sessions and services.
//!
//! The device presents a certificate issued by its own root during pairing,
//! so WebPKI validation does not apply.  Instead the server certificate is
//! compared with the `DeviceCertificate` recorded in the pairing file (when
//! pinning is enabled) and the handshake signatures are checked with the ring
//! provider.  The host authenticates with the pairing file's host certificate
//! and key.

use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, SignatureScheme,
    StreamOwned,
};
use sideload_core::PairingCredential;
use tracing::debug;

use crate::application::ports::ConnectionError;

/// Builds the client configuration for one credential.
///
/// # Errors
///
/// [`ConnectionError::Tls`] when the PEM material cannot be parsed or is
/// rejected by the crypto provider.
pub fn client_config(
    credential: &PairingCredential,
    pin_device_certificate: bool,
) -> Result<Arc<ClientConfig>, ConnectionError> {
    let provider = Arc::new(ring::default_provider());

    let host_chain = parse_certificates(credential.host_certificate_pem(), "HostCertificate")?;
    let host_key = PrivateKeyDer::from_pem_slice(credential.host_private_key_pem())
        .map_err(|e| ConnectionError::Tls(format!("HostPrivateKey: {e}")))?;

    let pinned = if pin_device_certificate {
        let device = parse_certificates(credential.device_certificate_pem(), "DeviceCertificate")?;
        device.into_iter().next()
    } else {
        None
    };

    let verifier = Arc::new(DeviceCertVerifier {
        pinned,
        provider: Arc::clone(&provider),
    });

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectionError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(host_chain, host_key)
        .map_err(|e| ConnectionError::Tls(e.to_string()))?;

    Ok(Arc::new(config))
}

/// Runs the client handshake to completion over `tcp`.
///
/// # Errors
///
/// [`ConnectionError::Tls`] for any handshake failure.
pub fn handshake(
    mut tcp: TcpStream,
    config: Arc<ClientConfig>,
    ip: Ipv4Addr,
) -> Result<StreamOwned<ClientConnection, TcpStream>, ConnectionError> {
    let server_name = ServerName::from(IpAddr::V4(ip));
    let mut conn =
        ClientConnection::new(config, server_name).map_err(|e| ConnectionError::Tls(e.to_string()))?;

    while conn.is_handshaking() {
        conn.complete_io(&mut tcp)
            .map_err(|e| ConnectionError::Tls(format!("handshake with {ip} failed: {e}")))?;
    }
    debug!(
        "TLS established with {ip} ({:?})",
        conn.protocol_version()
    );
    Ok(StreamOwned::new(conn, tcp))
}

fn parse_certificates(
    pem: &[u8],
    field: &str,
) -> Result<Vec<CertificateDer<'static>>, ConnectionError> {
    let certs = CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectionError::Tls(format!("{field}: {e}")))?;
    if certs.is_empty() {
        return Err(ConnectionError::Tls(format!("{field}: no certificate found")));
    }
    Ok(certs)
}

/// Accepts the paired device's certificate.
#[derive(Debug)]
pub struct DeviceCertVerifier {
    pinned: Option<CertificateDer<'static>>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for DeviceCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match &self.pinned {
            Some(pinned) if pinned.as_ref() != end_entity.as_ref() => Err(
                rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure),
            ),
            _ => Ok(ServerCertVerified::assertion()),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
