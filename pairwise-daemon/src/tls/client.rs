//! TLS client configuration for connecting to a known peer id.

use std::sync::Arc;

use pairwise_auth::cert::extract_public_key_from_cert;
use pairwise_auth::identity::{IdentityId, hash_pubkey};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::ClientConfig;
use zeroize::Zeroizing;

use super::server::{TlsConfigError, provider};
use super::verifier::PinnedServerVerifier;

/// Client TLS identity (certificate + private key).
///
/// While pairing the certificate is our self-signed CA; afterwards it is
/// the certificate the peer issued to us.
#[derive(Clone)]
pub struct ClientIdentity {
    pub cert_der: Vec<u8>,
    /// PKCS#8 key, zeroized on drop.
    pub key_der: Zeroizing<Vec<u8>>,
    pub id: IdentityId,
}

impl ClientIdentity {
    /// Load a client identity from stored cert and key DER bytes.
    pub fn from_der(cert_der: Vec<u8>, key_der: Zeroizing<Vec<u8>>) -> Result<Self, TlsConfigError> {
        let public_key = extract_public_key_from_cert(&cert_der)
            .map_err(|e| TlsConfigError::InvalidCert(e.to_string()))?;
        Ok(Self {
            id: hash_pubkey(&public_key),
            cert_der,
            key_der,
        })
    }
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Client config that accepts only `expected_peer`'s self-signed certificate
/// and authenticates with `identity`.
pub fn build_client_config(
    identity: &ClientIdentity,
    expected_peer: &IdentityId,
) -> Result<Arc<ClientConfig>, TlsConfigError> {
    let provider = provider();
    let verifier = PinnedServerVerifier::new(expected_peer.clone(), provider.clone());

    let cert = CertificateDer::from(identity.cert_der.clone());
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(identity.key_der.to_vec()));

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TlsConfigError::Config(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_client_auth_cert(vec![cert], key)
        .map_err(|e| TlsConfigError::Config(e.to_string()))?;

    Ok(Arc::new(config))
}

/// SNI name for a peer. Ids are not DNS names, but lowercase base32 is a
/// valid label; the pinned verifier ignores it anyway.
pub fn server_name(peer: &IdentityId) -> Result<ServerName<'static>, TlsConfigError> {
    ServerName::try_from(peer.as_str().to_ascii_lowercase())
        .map_err(|e| TlsConfigError::Config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{RcgenBackend, X509Backend};

    fn identity() -> ClientIdentity {
        let backend = RcgenBackend::default();
        let key = backend.generate_key().unwrap();
        let id = hash_pubkey(&backend.public_key_of_key(&key).unwrap());
        let cert = backend.self_sign(&key, id.as_str()).unwrap();
        ClientIdentity::from_der(cert, Zeroizing::new(key.to_vec())).unwrap()
    }

    #[test]
    fn test_identity_id_from_cert() {
        let ours = identity();
        let facts = pairwise_auth::cert::inspect_cert(&ours.cert_der).unwrap();
        assert_eq!(facts.subject_cn.as_deref(), Some(ours.id.as_str()));
    }

    #[test]
    fn test_build_client_config() {
        let ours = identity();
        let peer = identity();
        assert!(build_client_config(&ours, &peer.id).is_ok());
    }

    #[test]
    fn test_server_name_is_valid() {
        let peer = identity();
        assert!(server_name(&peer.id).is_ok());
    }

    #[test]
    fn test_debug_hides_key() {
        let ours = identity();
        let debug = format!("{ours:?}");
        assert!(debug.contains("ClientIdentity"));
        assert!(!debug.contains("key_der"));
    }
}
