//! Self-signed RSA-2048 certificate generation.
//!
//! `rcgen` generates ECDSA keys natively; producing an RSA key pair goes
//! through the `rsa` crate and hands the PKCS#8 DER to `rcgen::KeyPair`
//! directly (deviation from the teacher's ECDSA default, see DESIGN.md).

use pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use rsa::RsaPrivateKey;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::Certificate;

const RSA_KEY_BITS: usize = 2048;
const VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum SelfSignedError {
    #[error("rsa key generation failed: {0}")]
    KeyGen(#[from] rsa::Error),

    #[error("pkcs8 encoding failed: {0}")]
    Pkcs8(#[from] pkcs8::Error),

    #[error("certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("rustls key parsing failed: {0}")]
    RustlsKey(String),
}

/// A freshly generated self-signed certificate plus the DER-encoded key
/// pair and chain `rustls` expects.
#[derive(Debug)]
pub struct SelfSignedCertificate {
    pub cert_der: Vec<u8>,
    pub key_der: Vec<u8>,
}

impl SelfSignedCertificate {
    /// Converts to the `rustls`-ready [`Certificate`].
    pub fn into_certificate(self) -> Result<Certificate, SelfSignedError> {
        let cert_chain = vec![rustls::pki_types::CertificateDer::from(self.cert_der)];
        let private_key = rustls::pki_types::PrivateKeyDer::try_from(self.key_der)
            .map_err(|e| SelfSignedError::RustlsKey(e.to_string()))?;
        Ok(Certificate::new(cert_chain, private_key))
    }
}

/// Generates an RSA-2048 self-signed certificate valid for 365 days for
/// `domain`, per spec.md's default transport TLS requirement.
pub fn generate_self_signed_cert(domain: &str) -> Result<SelfSignedCertificate, SelfSignedError> {
    let rsa_key = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)?;
    let pkcs8_der = rsa_key.to_pkcs8_der()?;
    let key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
        &rcgen::PrivatePkcs8KeyDer::from(pkcs8_der.as_bytes().to_vec()),
        &PKCS_RSA_SHA256,
    )?;

    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, domain);
    params.distinguished_name = dn;

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(VALIDITY_DAYS);

    let cert = params.self_signed(&key_pair)?;

    Ok(SelfSignedCertificate {
        cert_der: cert.der().to_vec(),
        key_der: key_pair.serialize_der(),
    })
}
