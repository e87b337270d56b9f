//! Certificate and CSR inspection for X.509 parsing.
//!
//! Only facts are extracted here: raw public key bits, subject and issuer
//! names, and whether a signature checks out. Deciding whether those
//! facts match a claimed identity is the PKI store's job.
//!
//! # Security
//!
//! Inputs over 16 KiB are refused before parsing.

use thiserror::Error;
use x509_parser::prelude::*;

/// Maximum certificate or CSR size (16KB is generous for a single artifact)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse X.509 certificate: {0}")]
    ParseError(String),

    #[error("failed to parse certificate signing request: {0}")]
    CsrParseError(String),

    #[error("signature does not verify: {0}")]
    BadSignature(String),

    #[error("certificate is outside its validity period")]
    NotValidNow,
}

/// What a certificate claims about itself.
///
/// `subject_cn` and `issuer_cn` are only set when the name is a lone
/// `CN=` attribute. Any other RDN alongside the CN leaves them `None`,
/// while `subject` and `issuer` always carry the rendered name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertFacts {
    /// Raw `subjectPublicKey` bits.
    pub public_key: Vec<u8>,
    pub subject: String,
    pub issuer: String,
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
}

/// What a signing request claims about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrFacts {
    pub public_key: Vec<u8>,
    pub subject: String,
    pub subject_cn: Option<String>,
}

fn check_size(der: &[u8]) -> Result<(), CertError> {
    if der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(der.len()));
    }
    Ok(())
}

fn parse_cert(der: &[u8]) -> Result<X509Certificate<'_>, CertError> {
    check_size(der)?;
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| CertError::ParseError(format!("{:?}", e)))?;
    Ok(cert)
}

fn sole_common_name(name: &X509Name<'_>) -> Option<String> {
    if name.iter_attributes().count() != 1 {
        return None;
    }
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_owned)
}

/// Raw `subjectPublicKey` bits of a DER certificate, the input to
/// [`hash_pubkey`](crate::identity::hash_pubkey).
///
/// # Errors
///
/// `TooLarge` over 16 KiB, `ParseError` if not a certificate.
pub fn extract_public_key_from_cert(cert_der: &[u8]) -> Result<Vec<u8>, CertError> {
    let cert = parse_cert(cert_der)?;
    Ok(cert.public_key().subject_public_key.data.to_vec())
}

/// Extract public key, subject and issuer from a DER certificate.
///
/// # Errors
///
/// Returns `CertError::TooLarge` or `CertError::ParseError`.
pub fn inspect_cert(cert_der: &[u8]) -> Result<CertFacts, CertError> {
    let cert = parse_cert(cert_der)?;
    Ok(CertFacts {
        public_key: cert.public_key().subject_public_key.data.to_vec(),
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        subject_cn: sole_common_name(cert.subject()),
        issuer_cn: sole_common_name(cert.issuer()),
    })
}

/// Extract public key and subject from a DER signing request, checking
/// the request's self-signature on the way.
///
/// # Errors
///
/// Returns `CertError::CsrParseError` if malformed and
/// `CertError::BadSignature` if the request was not signed by its own key.
pub fn inspect_csr(csr_der: &[u8]) -> Result<CsrFacts, CertError> {
    check_size(csr_der)?;
    let (_, csr) = X509CertificationRequest::from_der(csr_der)
        .map_err(|e| CertError::CsrParseError(format!("{:?}", e)))?;
    csr.verify_signature()
        .map_err(|e| CertError::BadSignature(format!("{:?}", e)))?;

    let info = &csr.certification_request_info;
    Ok(CsrFacts {
        public_key: info.subject_pki.subject_public_key.data.to_vec(),
        subject: info.subject.to_string(),
        subject_cn: sole_common_name(&info.subject),
    })
}

/// Check that a certificate is signed by its own key and currently valid.
///
/// # Errors
///
/// Returns `CertError::BadSignature` or `CertError::NotValidNow`, or a
/// parse error.
pub fn verify_self_signed(cert_der: &[u8]) -> Result<(), CertError> {
    let cert = parse_cert(cert_der)?;
    cert.verify_signature(None)
        .map_err(|e| CertError::BadSignature(format!("{:?}", e)))?;
    if !cert.validity().is_valid() {
        return Err(CertError::NotValidNow);
    }
    Ok(())
}
