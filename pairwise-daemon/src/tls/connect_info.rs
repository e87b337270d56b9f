//! Peer facts extracted from a completed TLS handshake.

use std::net::SocketAddr;

use pairwise_auth::cert::inspect_cert;
use pairwise_auth::identity::{IdentityId, hash_pubkey};
use rustls::pki_types::CertificateDer;

/// Connection info handed to request handlers.
///
/// All certificate-derived fields are `None` on plain connections or when
/// the peer presented no certificate.
#[derive(Debug, Clone, Default)]
pub struct TlsConnectInfo {
    pub remote_addr: Option<SocketAddr>,
    /// Hash of the peer certificate's public key.
    pub peer_id: Option<IdentityId>,
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
}

impl TlsConnectInfo {
    /// Info for a connection without TLS.
    #[must_use]
    pub fn plain(remote_addr: Option<SocketAddr>) -> Self {
        Self {
            remote_addr,
            ..Default::default()
        }
    }

    /// Info from the peer's certificate chain, end entity first.
    #[must_use]
    pub fn from_peer_certificates(
        remote_addr: Option<SocketAddr>,
        certs: Option<&[CertificateDer<'_>]>,
    ) -> Self {
        let facts = certs
            .and_then(|chain| chain.first())
            .and_then(|cert| inspect_cert(cert.as_ref()).ok());
        match facts {
            Some(facts) => Self {
                remote_addr,
                peer_id: Some(hash_pubkey(&facts.public_key)),
                subject_cn: facts.subject_cn,
                issuer_cn: facts.issuer_cn,
            },
            None => Self::plain(remote_addr),
        }
    }

    /// Whether the peer presented a certificate for `id`, with both subject
    /// and issuer naming it (a self-signed pairing identity).
    #[must_use]
    pub fn is_self_signed_by(&self, id: &IdentityId) -> bool {
        self.peer_id.as_ref() == Some(id)
            && self.subject_cn.as_deref() == Some(id.as_str())
            && self.issuer_cn.as_deref() == Some(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{RcgenBackend, X509Backend};

    #[test]
    fn test_plain_has_no_peer() {
        let info = TlsConnectInfo::plain(None);
        assert!(info.peer_id.is_none());
        assert!(info.subject_cn.is_none());
    }

    #[test]
    fn test_from_self_signed_cert() {
        let backend = RcgenBackend::default();
        let key = backend.generate_key().unwrap();
        let id = hash_pubkey(&backend.public_key_of_key(&key).unwrap());
        let cert = backend.self_sign(&key, id.as_str()).unwrap();

        let chain = [CertificateDer::from(cert)];
        let info = TlsConnectInfo::from_peer_certificates(None, Some(&chain));
        assert_eq!(info.peer_id.as_ref(), Some(&id));
        assert!(info.is_self_signed_by(&id));
    }

    #[test]
    fn test_garbage_cert_is_anonymous() {
        let chain = [CertificateDer::from(b"junk".to_vec())];
        let info = TlsConnectInfo::from_peer_certificates(None, Some(&chain));
        assert!(info.peer_id.is_none());
    }
}
