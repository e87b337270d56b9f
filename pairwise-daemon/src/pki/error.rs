//! PKI store error types.

use pairwise_auth::{CertError, KeyError};

/// Errors from the X.509 backend itself.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid key: {0}")]
    Key(#[from] KeyError),

    #[error("failed to create key pair: {0}")]
    KeyPair(String),

    #[error("failed to generate certificate: {0}")]
    Generation(String),

    #[error(transparent)]
    Inspect(#[from] CertError),

    #[error("chain validation failed: {0}")]
    Chain(String),
}

/// Errors returned by [`super::PkiStore`].
///
/// The identity variants carry enough detail for local diagnostics. None of
/// this text is ever sent to a peer.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    /// The hash of the artifact's public key is not the claimed id.
    #[error("{filename}: public key hash mismatch (expected {expected}, got {got})")]
    PublicKey {
        filename: String,
        expected: String,
        got: String,
    },

    #[error("{filename}: subject mismatch (expected CN={expected}, got {got})")]
    Subject {
        filename: String,
        expected: String,
        got: String,
    },

    #[error("{filename}: issuer mismatch (expected CN={expected}, got {got})")]
    Issuer {
        filename: String,
        expected: String,
        got: String,
    },

    /// Signature, validity or chain verification failed.
    #[error("{filename}: verification failed: {reason}")]
    Verification { filename: String, reason: String },

    #[error("{filename} already exists")]
    AlreadyExists { filename: String },

    #[error("{filename} not found")]
    NotFound { filename: String },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PkiError {
    /// Whether the material failed to match its claimed identity, as
    /// opposed to a local storage or backend fault.
    #[must_use]
    pub fn is_identity_error(&self) -> bool {
        matches!(
            self,
            PkiError::PublicKey { .. }
                | PkiError::Subject { .. }
                | PkiError::Issuer { .. }
                | PkiError::Verification { .. }
        )
    }
}
