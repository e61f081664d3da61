//! QUIC transport configuration.
//!
//! Fixed to the data-plane's own requirements rather than the teacher's
//! fully user-configurable knobs: 30s idle timeout, 10s keepalive, ALPN
//! `tunnox-quic`, RSA-2048 self-signed certs generated in-process via
//! `tunnox-cert` (no on-disk persistence under `~/.localup` — each node
//! just generates its own at startup).

use std::sync::Arc;
use std::time::Duration;
use tunnox_cert::Certificate;
use tunnox_transport::{TransportError, TransportResult, TransportSecurityConfig};

const KEEP_ALIVE: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONCURRENT_STREAMS: u64 = 100;

#[derive(Debug, Clone)]
pub struct QuicConfig {
    security: TransportSecurityConfig,
    pub max_concurrent_streams: u64,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            security: TransportSecurityConfig::default(),
            max_concurrent_streams: MAX_CONCURRENT_STREAMS,
        }
    }
}

impl QuicConfig {
    pub fn client_default() -> Self {
        Self::default()
    }

    pub fn client_insecure() -> Self {
        let mut config = Self::default();
        config.security.verify_server_cert = false;
        config
    }

    pub fn with_alpn_protocols(mut self, protocols: Vec<String>) -> Self {
        self.security.alpn_protocols = protocols;
        self
    }

    pub(crate) fn build_client_config(&self) -> TransportResult<quinn::ClientConfig> {
        let mut roots = quinn::rustls::RootCertStore::empty();
        if self.security.root_certs.is_empty() {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        } else {
            for cert_der in &self.security.root_certs {
                roots
                    .add(quinn::rustls::pki_types::CertificateDer::from(cert_der.clone()))
                    .map_err(|e| TransportError::Configuration(format!("invalid root cert: {e}")))?;
            }
        }

        let mut client_crypto = if self.security.verify_server_cert {
            quinn::rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        } else {
            quinn::rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        };

        client_crypto.alpn_protocols = self
            .security
            .alpn_protocols
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();

        let mut client_config = quinn::ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from(client_crypto)
                .map_err(|e| TransportError::Tls(e.to_string()))?,
        ));

        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(KEEP_ALIVE));
        transport.max_idle_timeout(Some(IDLE_TIMEOUT.try_into().unwrap()));
        transport.max_concurrent_bidi_streams(self.max_concurrent_streams.try_into().unwrap());
        client_config.transport_config(Arc::new(transport));

        Ok(client_config)
    }

    pub(crate) fn build_server_config(&self, cert: &Certificate) -> TransportResult<quinn::ServerConfig> {
        let mut server_crypto = quinn::rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert.cert_chain.clone(), cert.private_key.clone())
            .map_err(|e| TransportError::Tls(format!("invalid cert/key: {e}")))?;

        server_crypto.alpn_protocols = self
            .security
            .alpn_protocols
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(
            quinn::crypto::rustls::QuicServerConfig::try_from(server_crypto)
                .map_err(|e| TransportError::Tls(e.to_string()))?,
        ));

        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(KEEP_ALIVE));
        transport.max_idle_timeout(Some(IDLE_TIMEOUT.try_into().unwrap()));
        transport.max_concurrent_bidi_streams(self.max_concurrent_streams.try_into().unwrap());
        server_config.transport_config(Arc::new(transport));

        Ok(server_config)
    }
}

/// Skips server certificate verification. Only reachable via
/// `QuicConfig::client_insecure()`, which a dialer must opt into
/// explicitly for a self-signed server.
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl quinn::rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &quinn::rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[quinn::rustls::pki_types::CertificateDer<'_>],
        _server_name: &quinn::rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: quinn::rustls::pki_types::UnixTime,
    ) -> Result<quinn::rustls::client::danger::ServerCertVerified, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &quinn::rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &quinn::rustls::pki_types::CertificateDer<'_>,
        _dss: &quinn::rustls::DigitallySignedStruct,
    ) -> Result<quinn::rustls::client::danger::HandshakeSignatureValid, quinn::rustls::Error> {
        Ok(quinn::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<quinn::rustls::SignatureScheme> {
        use quinn::rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
        ]
    }
}
