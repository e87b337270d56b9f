//! TLS server configuration.
//!
//! TLS 1.3 only, ring provider. The server always presents this node's
//! self-signed CA certificate; what it demands from clients depends on
//! [`ClientAuth`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use pairwise_auth::identity::IdentityId;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use x509_parser::prelude::*;

use super::verifier::PinnedClientVerifier;

/// Client certificate policy for a TLS listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAuth {
    /// No client certificate requested.
    None,
    /// Client must present the self-signed certificate for this id.
    Pinned(IdentityId),
    /// Client must present a certificate chaining to the CA in this file.
    TrustedCa(PathBuf),
}

pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// A listener's TLS 1.3 config: our certificate plus a client policy.
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Build a listener config from our certificate and PKCS#8 key.
    pub fn new(
        cert_der: Vec<u8>,
        key_der: &[u8],
        client_auth: &ClientAuth,
    ) -> Result<Self, TlsConfigError> {
        let provider = provider();
        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])
            .map_err(|e| TlsConfigError::Config(e.to_string()))?;

        let builder = match client_auth {
            ClientAuth::None => builder.with_no_client_auth(),
            ClientAuth::Pinned(id) => {
                builder.with_client_cert_verifier(PinnedClientVerifier::new(id.clone(), provider))
            }
            ClientAuth::TrustedCa(path) => {
                let ca_der = std::fs::read(path)?;
                verify_certificate_validity(&ca_der)?;

                let mut roots = RootCertStore::empty();
                roots
                    .add(CertificateDer::from(ca_der))
                    .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
                let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                    .build()
                    .map_err(|e| TlsConfigError::Verifier(e.to_string()))?;
                builder.with_client_cert_verifier(verifier)
            }
        };

        let cert = CertificateDer::from(cert_der);
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.to_vec()));
        let config = builder
            .with_single_cert(vec![cert], key)
            .map_err(|e| TlsConfigError::Config(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn into_rustls_config(self) -> Arc<ServerConfig> {
        self.config
    }
}

/// Reject a trust anchor outside its validity period.
fn verify_certificate_validity(cert_der: &[u8]) -> Result<(), TlsConfigError> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| TlsConfigError::InvalidCert(format!("failed to parse certificate: {e}")))?;

    let now = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| TlsConfigError::InvalidCert("system time error".to_string()))?
        .as_secs() as i64;

    let validity = cert.validity();
    let not_before = validity.not_before.timestamp();
    let not_after = validity.not_after.timestamp();

    if now < not_before {
        return Err(TlsConfigError::CertNotYetValid {
            not_before: not_before as u64,
            now: now as u64,
        });
    }
    if now > not_after {
        return Err(TlsConfigError::CertExpired {
            not_after: not_after as u64,
            now: now as u64,
        });
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("invalid certificate: {0}")]
    InvalidCert(String),
    #[error("failed to build verifier: {0}")]
    Verifier(String),
    #[error("failed to build config: {0}")]
    Config(String),
    #[error("certificate not yet valid (not_before: {not_before}, now: {now})")]
    CertNotYetValid { not_before: u64, now: u64 },
    #[error("certificate expired (not_after: {not_after}, now: {now})")]
    CertExpired { not_after: u64, now: u64 },
    #[error("failed to read trust anchor: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{RcgenBackend, X509Backend};
    use pairwise_auth::identity::hash_pubkey;

    fn identity() -> (IdentityId, Vec<u8>, Vec<u8>) {
        let backend = RcgenBackend::default();
        let key = backend.generate_key().unwrap();
        let id = hash_pubkey(&backend.public_key_of_key(&key).unwrap());
        let cert = backend.self_sign(&key, id.as_str()).unwrap();
        (id, cert, key.to_vec())
    }

    #[test]
    fn test_server_only_config() {
        let (_, cert, key) = identity();
        assert!(TlsServerConfig::new(cert, &key, &ClientAuth::None).is_ok());
    }

    #[test]
    fn test_pinned_config() {
        let (_, cert, key) = identity();
        let (peer, _, _) = identity();
        assert!(TlsServerConfig::new(cert, &key, &ClientAuth::Pinned(peer)).is_ok());
    }

    #[test]
    fn test_trusted_ca_config() {
        let (_, cert, key) = identity();
        let dir = tempfile::tempdir().unwrap();
        let ca_path = dir.path().join("own.ca");
        std::fs::write(&ca_path, &cert).unwrap();

        let config = TlsServerConfig::new(cert, &key, &ClientAuth::TrustedCa(ca_path));
        assert!(config.is_ok());
    }

    #[test]
    fn test_trusted_ca_missing_file() {
        let (_, cert, key) = identity();
        let result = TlsServerConfig::new(
            cert,
            &key,
            &ClientAuth::TrustedCa(PathBuf::from("/nonexistent/pairwise.ca")),
        );
        assert!(matches!(result, Err(TlsConfigError::Io(_))));
    }

    #[test]
    fn test_expired_anchor_rejected() {
        let backend = RcgenBackend::default();
        let key = backend.generate_key().unwrap();
        let key_pair = rcgen::KeyPair::try_from(key.as_bytes()).unwrap();
        let mut params = rcgen::CertificateParams::default();
        params.not_before = ::time::OffsetDateTime::now_utc() - ::time::Duration::days(30);
        params.not_after = ::time::OffsetDateTime::now_utc() - ::time::Duration::days(1);
        let expired = params.self_signed(&key_pair).unwrap().der().to_vec();

        assert!(matches!(
            verify_certificate_validity(&expired),
            Err(TlsConfigError::CertExpired { .. })
        ));
    }
}
