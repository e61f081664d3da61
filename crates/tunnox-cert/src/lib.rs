//! Self-signed certificate generation for transport TLS (QUIC, WebSocket).
//!
//! The teacher's crate also carried an ACME/Let's Encrypt client for
//! public-facing exit nodes; that surface belongs to the out-of-scope
//! management plane and is dropped here (see DESIGN.md). What remains is
//! the self-signed path the bridge's transports need to stand up TLS
//! without an external CA.

pub mod self_signed;

pub use self_signed::{generate_self_signed_cert, SelfSignedCertificate, SelfSignedError};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

/// A certificate chain with its private key, ready to hand to `rustls`.
#[derive(Debug)]
pub struct Certificate {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl Certificate {
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, private_key: PrivateKeyDer<'static>) -> Self {
        Self {
            cert_chain,
            private_key,
        }
    }
}
