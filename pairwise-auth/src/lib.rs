//! Pure pairing library for Pairwise.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No logging
//!
//! It holds everything two devices need to agree on without touching the
//! outside world:
//! - [`identity`] - Ed25519 keys and the hash-derived [`IdentityId`]
//! - [`cert`] - X.509 certificate and CSR inspection
//! - [`challenge`] - the one-shot challenge-response engine and its MACs
//! - [`pairing`] - the responder-side pairing state machine
//!
//! # Example
//!
//! ```
//! use pairwise_auth::{identity::PrivateKey, pairing::PairingMachine};
//!
//! let issuer = PrivateKey::generate().public_key().id();
//! let joiner = PrivateKey::generate().public_key().id();
//!
//! // The existing device arms a session and shows the secret to a human.
//! let mut machine = PairingMachine::new(issuer.clone(), joiner.clone());
//! let secret = machine.regenerate_secret();
//! assert_eq!(secret.encode().len(), 8);
//! ```

pub mod cert;
pub mod challenge;
pub mod identity;
pub mod pairing;

pub use cert::{CertError, CertFacts, CsrFacts, extract_public_key_from_cert};
pub use challenge::{Challenge, ChallengeError, ChallengeResponse, Mac, Nonce, Purpose, Secret};
pub use identity::{IdentityError, IdentityHash, IdentityId, KeyError, PrivateKey, PublicKey};
pub use pairing::{PairingError, PairingMachine, PairingState};
