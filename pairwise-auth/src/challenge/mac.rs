//! Domain-separated MACs bound to an ordered pair of identities.
//!
//! Every MAC is a BLAKE3 keyed hash over
//! `first_hash || second_hash || len(message) || message`, keyed by a key
//! derived from the shared secret under a per-purpose context. The two
//! binding hashes are not commutative and the purpose context is part of the
//! key, so a MAC never verifies for swapped parties or for another purpose.

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::ChallengeError;
use super::secret::Secret;
use crate::identity::IdentityHash;

/// MAC output size: 240 bits.
pub const MAC_LEN: usize = 30;

/// What a MAC proves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Knowledge of the secret, over `challenge || nonce`.
    Response,
    /// The joiner's CSR was sent by the party holding the secret.
    Csr,
    /// The certificate came back from the party holding the secret.
    Cert,
}

impl Purpose {
    fn context(self) -> &'static str {
        match self {
            Purpose::Response => "pairwise 2026-01-01 challenge response mac",
            Purpose::Csr => "pairwise 2026-01-01 certificate signing request mac",
            Purpose::Cert => "pairwise 2026-01-01 issued certificate mac",
        }
    }
}

/// A base32-encoded 240-bit MAC. Comparison is constant-time.
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Mac(String);

impl Mac {
    /// Compute a MAC binding `message` to `(first, second)` for `purpose`.
    #[must_use]
    pub fn compute(
        secret: &Secret,
        purpose: Purpose,
        first: &IdentityHash,
        second: &IdentityHash,
        message: &[u8],
    ) -> Self {
        let key = Zeroizing::new(blake3::derive_key(purpose.context(), secret.as_bytes()));
        let mut hasher = blake3::Hasher::new_keyed(&key);
        hasher.update(first.as_bytes());
        hasher.update(second.as_bytes());
        hasher.update(&(message.len() as u64).to_be_bytes());
        hasher.update(message);

        let mut out = [0u8; MAC_LEN];
        hasher.finalize_xof().fill(&mut out);
        Self(BASE32_NOPAD.encode(&out))
    }

    /// Parse a MAC received from a peer.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeError::Malformed` unless the input is the base32 form
    /// of exactly 30 bytes.
    pub fn parse(s: &str) -> Result<Self, ChallengeError> {
        let decoded = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| ChallengeError::Malformed { field: "mac" })?;
        if decoded.len() != MAC_LEN {
            return Err(ChallengeError::Malformed { field: "mac" });
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Mac {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl TryFrom<String> for Mac {
    type Error = ChallengeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Mac> for String {
    fn from(mac: Mac) -> Self {
        mac.0
    }
}

impl std::fmt::Debug for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Mac({}...)", &self.0[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::hash_pubkey;

    fn parties() -> (IdentityHash, IdentityHash) {
        (hash_pubkey(b"alice").hash(), hash_pubkey(b"bob").hash())
    }

    #[test]
    fn test_mac_deterministic() {
        let secret = Secret::generate();
        let (a, b) = parties();
        assert_eq!(
            Mac::compute(&secret, Purpose::Response, &a, &b, b"msg"),
            Mac::compute(&secret, Purpose::Response, &a, &b, b"msg")
        );
    }

    #[test]
    fn test_mac_binding_order_matters() {
        let secret = Secret::generate();
        let (a, b) = parties();
        assert_ne!(
            Mac::compute(&secret, Purpose::Response, &a, &b, b"msg"),
            Mac::compute(&secret, Purpose::Response, &b, &a, b"msg")
        );
    }

    #[test]
    fn test_mac_purpose_separation() {
        let secret = Secret::generate();
        let (a, b) = parties();
        let response = Mac::compute(&secret, Purpose::Response, &a, &b, b"msg");
        let csr = Mac::compute(&secret, Purpose::Csr, &a, &b, b"msg");
        let cert = Mac::compute(&secret, Purpose::Cert, &a, &b, b"msg");
        assert_ne!(response, csr);
        assert_ne!(csr, cert);
        assert_ne!(response, cert);
    }

    #[test]
    fn test_mac_differs_per_secret() {
        let (a, b) = parties();
        for _ in 0..256 {
            let s1 = Secret::generate();
            let s2 = Secret::generate();
            if s1 == s2 {
                continue;
            }
            assert_ne!(
                Mac::compute(&s1, Purpose::Response, &a, &b, b"c||n"),
                Mac::compute(&s2, Purpose::Response, &a, &b, b"c||n")
            );
        }
    }

    #[test]
    fn test_mac_length_prefix_separates_messages() {
        let secret = Secret::generate();
        let (a, b) = parties();
        assert_ne!(
            Mac::compute(&secret, Purpose::Csr, &a, &b, b""),
            Mac::compute(&secret, Purpose::Csr, &a, &b, &[0u8; 8])
        );
    }

    #[test]
    fn test_mac_parse() {
        let secret = Secret::generate();
        let (a, b) = parties();
        let mac = Mac::compute(&secret, Purpose::Cert, &a, &b, b"cert");
        assert_eq!(mac.as_str().len(), 48);
        assert_eq!(Mac::parse(mac.as_str()).unwrap(), mac);
        assert!(Mac::parse("AAAA").is_err());
        assert!(Mac::parse("not base32 at all!").is_err());
    }
}
