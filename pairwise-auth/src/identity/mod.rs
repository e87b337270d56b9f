//! Cryptographic identity types for Pairwise.
//!
//! A device is known only by the hash of its public key:
//!
//! - [`PrivateKey`] - Ed25519 signing key with automatic zeroization on drop
//! - [`PublicKey`] - the verification key whose raw bits are hashed
//! - [`IdentityId`] - 48 base32 characters, a 240-bit BLAKE3 hash of the key
//! - [`IdentityHash`] - a second hash of the id, used to bind MACs to a party
//!
//! # Security Properties
//!
//! - Private keys are zeroized on drop and have no `Debug` implementation
//! - Ids are never generated directly; they are always derived or parsed
//! - Id comparison uses constant-time equality
//!
//! # Example
//!
//! ```
//! use pairwise_auth::identity::{IdentityId, PrivateKey};
//!
//! let key = PrivateKey::generate();
//! let id = key.public_key().id();
//!
//! let parsed: IdentityId = id.as_str().parse().unwrap();
//! assert_eq!(id, parsed);
//! ```

mod id;
mod keys;

pub use id::{ID_LEN, IdentityError, IdentityHash, IdentityId, hash_pubkey};
pub use keys::{KeyError, PrivateKey, PublicKey, SecretBytes};
