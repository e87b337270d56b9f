//! X.509 operations behind a capability trait.
//!
//! The store never touches ASN.1 directly. Everything it needs from a
//! certificate toolchain goes through [`X509Backend`], and [`RcgenBackend`]
//! provides it with ed25519-dalek, rcgen, x509-parser and rustls' WebPKI
//! verifier.

use std::sync::Arc;

use pairwise_auth::cert::{self, CertFacts, CsrFacts};
use pairwise_auth::identity::{PrivateKey, SecretBytes};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, CertificateSigningRequestDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;

use super::BackendError;

/// Default CA validity: 10 years.
pub const DEFAULT_CA_VALIDITY_DAYS: u32 = 3650;

/// Default issued certificate validity: 1 year.
pub const DEFAULT_CERT_VALIDITY_DAYS: u32 = 365;

/// The fixed list of X.509 operations the PKI store relies on.
///
/// Keys are PKCS#8 DER, certificates and requests are DER. Implementations
/// are treated as synchronous, blocking calls.
pub trait X509Backend: Send + Sync {
    fn generate_key(&self) -> Result<SecretBytes, BackendError>;

    /// Raw public key bits of a private key.
    fn public_key_of_key(&self, key_der: &[u8]) -> Result<Vec<u8>, BackendError>;

    /// Self-signed CA certificate with subject `CN=<common_name>`.
    fn self_sign(&self, key_der: &[u8], common_name: &str) -> Result<Vec<u8>, BackendError>;

    /// Signing request with subject `CN=<common_name>`.
    fn build_csr(&self, key_der: &[u8], common_name: &str) -> Result<Vec<u8>, BackendError>;

    /// Certificate for the request's key and subject, issued by the CA.
    fn sign_csr(
        &self,
        csr_der: &[u8],
        ca_cert_der: &[u8],
        ca_key_der: &[u8],
    ) -> Result<Vec<u8>, BackendError>;

    fn inspect_cert(&self, cert_der: &[u8]) -> Result<CertFacts, BackendError>;

    /// Facts of a signing request whose self-signature verifies.
    fn inspect_csr(&self, csr_der: &[u8]) -> Result<CsrFacts, BackendError>;

    fn validate_self_signed(&self, cert_der: &[u8]) -> Result<(), BackendError>;

    /// Independent path validation of `cert_der` against `ca_der` as the
    /// only trust anchor.
    fn validate_chain(&self, cert_der: &[u8], ca_der: &[u8]) -> Result<(), BackendError>;
}

/// rcgen-backed implementation with Ed25519 keys.
#[derive(Debug, Clone)]
pub struct RcgenBackend {
    ca_validity_days: u32,
    cert_validity_days: u32,
}

impl Default for RcgenBackend {
    fn default() -> Self {
        Self {
            ca_validity_days: DEFAULT_CA_VALIDITY_DAYS,
            cert_validity_days: DEFAULT_CERT_VALIDITY_DAYS,
        }
    }
}

impl RcgenBackend {
    #[must_use]
    pub fn with_validity(ca_validity_days: u32, cert_validity_days: u32) -> Self {
        Self {
            ca_validity_days,
            cert_validity_days,
        }
    }

    fn key_pair(key_der: &[u8]) -> Result<KeyPair, BackendError> {
        KeyPair::try_from(key_der).map_err(|e| BackendError::KeyPair(e.to_string()))
    }

    fn params(common_name: &str, validity_days: u32) -> CertificateParams {
        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        set_validity(&mut params, validity_days);
        params
    }
}

fn set_validity(params: &mut CertificateParams, validity_days: u32) {
    // Backdate slightly so peers with small clock skew accept fresh certs.
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::minutes(5);
    params.not_after = now + time::Duration::days(i64::from(validity_days));
}

fn leaf_usages(params: &mut CertificateParams) {
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
}

impl X509Backend for RcgenBackend {
    fn generate_key(&self) -> Result<SecretBytes, BackendError> {
        Ok(PrivateKey::generate().to_pkcs8_der()?)
    }

    fn public_key_of_key(&self, key_der: &[u8]) -> Result<Vec<u8>, BackendError> {
        let key = PrivateKey::from_pkcs8_der(key_der)?;
        Ok(key.public_key().to_bytes().to_vec())
    }

    fn self_sign(&self, key_der: &[u8], common_name: &str) -> Result<Vec<u8>, BackendError> {
        let key_pair = Self::key_pair(key_der)?;
        let mut params = Self::params(common_name, self.ca_validity_days);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::CrlSign,
        ];
        // The CA doubles as this device's TLS certificate while pairing.
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| BackendError::Generation(e.to_string()))?;
        Ok(cert.der().to_vec())
    }

    fn build_csr(&self, key_der: &[u8], common_name: &str) -> Result<Vec<u8>, BackendError> {
        let key_pair = Self::key_pair(key_der)?;
        let params = Self::params(common_name, self.cert_validity_days);
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| BackendError::Generation(e.to_string()))?;
        Ok(csr.der().to_vec())
    }

    fn sign_csr(
        &self,
        csr_der: &[u8],
        ca_cert_der: &[u8],
        ca_key_der: &[u8],
    ) -> Result<Vec<u8>, BackendError> {
        let ca_key = Self::key_pair(ca_key_der)?;
        let ca_params = CertificateParams::from_ca_cert_der(&CertificateDer::from(ca_cert_der))
            .map_err(|e| BackendError::Generation(e.to_string()))?;
        let issuer = ca_params
            .self_signed(&ca_key)
            .map_err(|e| BackendError::Generation(e.to_string()))?;

        let mut csr = CertificateSigningRequestParams::from_der(
            &CertificateSigningRequestDer::from(csr_der),
        )
        .map_err(|e| BackendError::Generation(e.to_string()))?;
        set_validity(&mut csr.params, self.cert_validity_days);
        leaf_usages(&mut csr.params);

        let cert = csr
            .signed_by(&issuer, &ca_key)
            .map_err(|e| BackendError::Generation(e.to_string()))?;
        Ok(cert.der().to_vec())
    }

    fn inspect_cert(&self, cert_der: &[u8]) -> Result<CertFacts, BackendError> {
        Ok(cert::inspect_cert(cert_der)?)
    }

    fn inspect_csr(&self, csr_der: &[u8]) -> Result<CsrFacts, BackendError> {
        Ok(cert::inspect_csr(csr_der)?)
    }

    fn validate_self_signed(&self, cert_der: &[u8]) -> Result<(), BackendError> {
        Ok(cert::verify_self_signed(cert_der)?)
    }

    fn validate_chain(&self, cert_der: &[u8], ca_der: &[u8]) -> Result<(), BackendError> {
        let mut roots = RootCertStore::empty();
        roots
            .add(CertificateDer::from(ca_der.to_vec()))
            .map_err(|e| BackendError::Chain(e.to_string()))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| BackendError::Chain(e.to_string()))?;

        verifier
            .verify_client_cert(&CertificateDer::from(cert_der), &[], UnixTime::now())
            .map_err(|e| BackendError::Chain(e.to_string()))?;
        Ok(())
    }
}
