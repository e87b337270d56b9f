//! PKI store for keys, CAs, CSRs and certificates.
//!
//! Every artifact is addressed by the identity id it claims and re-verified
//! against that id whenever it is read or accepted from a peer.

mod backend;
mod error;
mod store;

pub use backend::{
    DEFAULT_CA_VALIDITY_DAYS, DEFAULT_CERT_VALIDITY_DAYS, RcgenBackend, X509Backend,
};
pub use error::{BackendError, PkiError};
pub use store::{Kind, PkiStore};
