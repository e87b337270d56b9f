//! Certificate verifiers that pin a peer to its identity id.
//!
//! During pairing neither side has a CA the other trusts yet. Instead each
//! side knows the id it expects (from discovery) and accepts exactly the
//! self-signed certificate whose public key hashes to that id.
//!
//! # Security
//!
//! - The id is recomputed from the certificate's public key, not its DER
//! - The certificate must verify under its own key
//! - Id comparison is constant-time
//! - Handshake signatures are still checked through the ring provider

use std::sync::Arc;

use pairwise_auth::cert::{extract_public_key_from_cert, verify_self_signed};
use pairwise_auth::identity::{IdentityId, hash_pubkey};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{CertificateError, DigitallySignedStruct, DistinguishedName, SignatureScheme};

/// Check that `cert` is self-signed by the key behind `expected`.
fn verify_pinned(cert: &CertificateDer<'_>, expected: &IdentityId) -> Result<(), rustls::Error> {
    let public_key = extract_public_key_from_cert(cert.as_ref())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadEncoding))?;

    if hash_pubkey(&public_key) != *expected {
        // Id mismatch - wrong peer or MITM
        return Err(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ));
    }

    verify_self_signed(cert.as_ref())
        .map_err(|_| rustls::Error::InvalidCertificate(CertificateError::BadSignature))
}

/// Server certificate verifier used by the connecting side.
#[derive(Debug)]
pub struct PinnedServerVerifier {
    expected: IdentityId,
    provider: Arc<CryptoProvider>,
}

impl PinnedServerVerifier {
    pub fn new(expected: IdentityId, provider: Arc<CryptoProvider>) -> Arc<Self> {
        Arc::new(Self { expected, provider })
    }
}

impl ServerCertVerifier for PinnedServerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        verify_pinned(end_entity, &self.expected)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
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
        rustls::crypto::verify_tls13_signature(
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

/// Client certificate verifier used by the accepting side.
///
/// Client authentication is mandatory: a peer without a certificate never
/// completes the handshake.
#[derive(Debug)]
pub struct PinnedClientVerifier {
    expected: IdentityId,
    provider: Arc<CryptoProvider>,
}

impl PinnedClientVerifier {
    pub fn new(expected: IdentityId, provider: Arc<CryptoProvider>) -> Arc<Self> {
        Arc::new(Self { expected, provider })
    }
}

impl ClientCertVerifier for PinnedClientVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        verify_pinned(end_entity, &self.expected)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
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
        rustls::crypto::verify_tls13_signature(
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::{RcgenBackend, X509Backend};

    fn self_signed() -> (IdentityId, CertificateDer<'static>) {
        let backend = RcgenBackend::default();
        let key = backend.generate_key().unwrap();
        let id = hash_pubkey(&backend.public_key_of_key(&key).unwrap());
        let cert = backend.self_sign(&key, id.as_str()).unwrap();
        (id, CertificateDer::from(cert))
    }

    fn provider() -> Arc<CryptoProvider> {
        Arc::new(rustls::crypto::ring::default_provider())
    }

    #[test]
    fn test_server_verifier_accepts_pinned_id() {
        let (id, cert) = self_signed();
        let verifier = PinnedServerVerifier::new(id, provider());
        let name = ServerName::try_from("pairwise").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
    }

    #[test]
    fn test_server_verifier_rejects_other_id() {
        let (_, cert) = self_signed();
        let (other, _) = self_signed();
        let verifier = PinnedServerVerifier::new(other, provider());
        let name = ServerName::try_from("pairwise").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn test_client_verifier() {
        let (id, cert) = self_signed();
        let (other, _) = self_signed();

        let verifier = PinnedClientVerifier::new(id, provider());
        assert!(verifier.verify_client_cert(&cert, &[], UnixTime::now()).is_ok());
        assert!(verifier.client_auth_mandatory());

        let verifier = PinnedClientVerifier::new(other, provider());
        assert!(verifier.verify_client_cert(&cert, &[], UnixTime::now()).is_err());
    }

    #[test]
    fn test_issued_cert_is_not_a_pairing_identity() {
        let backend = RcgenBackend::default();
        let ca_key = backend.generate_key().unwrap();
        let ca = backend.self_sign(&ca_key, "ISSUER").unwrap();

        let key = backend.generate_key().unwrap();
        let id = hash_pubkey(&backend.public_key_of_key(&key).unwrap());
        let csr = backend.build_csr(&key, id.as_str()).unwrap();
        let cert = CertificateDer::from(backend.sign_csr(&csr, &ca, &ca_key).unwrap());

        let verifier = PinnedClientVerifier::new(id, provider());
        assert!(verifier.verify_client_cert(&cert, &[], UnixTime::now()).is_err());
    }
}
