//! Hash-derived identity ids.

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Context for deriving an [`IdentityId`] from public key bits.
const ID_CONTEXT: &str = "pairwise 2026-01-01 identity id from public key";

/// Context for deriving an [`IdentityHash`] from an [`IdentityId`].
const HASH_CONTEXT: &str = "pairwise 2026-01-01 identity binding hash";

/// Digest size shared by ids and binding hashes (240 bits).
pub(crate) const DIGEST_LEN: usize = 30;

/// Length of an encoded id: 240 bits at 5 bits per base32 character.
pub const ID_LEN: usize = 48;

/// Errors that can occur when parsing an identity id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// The string is not 48 characters long.
    #[error("invalid id length: expected {ID_LEN}, got {0}")]
    InvalidLength(usize),

    /// The string contains characters outside the base32 alphabet.
    #[error("invalid id encoding")]
    InvalidEncoding,
}

/// Hash raw public key bits into an [`IdentityId`].
///
/// BLAKE3 in derive-key mode with a context used for nothing else, extended
/// to 240 bits.
#[must_use]
pub fn hash_pubkey(public_key_bits: &[u8]) -> IdentityId {
    IdentityId(BASE32_NOPAD.encode(&derive(ID_CONTEXT, public_key_bits)))
}

fn derive(context: &str, input: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(input);
    let mut out = [0u8; DIGEST_LEN];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// The only notion of "who" in the system.
///
/// # Security
///
/// Equality is constant-time. `Hash` is derived anyway: the id is public,
/// only equality checks run against attacker-supplied values.
#[derive(Clone, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[allow(clippy::derived_hash_with_manual_eq)]
pub struct IdentityId(String);

impl IdentityId {
    /// Parse an id, validating length and alphabet.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::InvalidLength` or `IdentityError::InvalidEncoding`.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        if s.len() != ID_LEN {
            return Err(IdentityError::InvalidLength(s.len()));
        }
        let decoded = BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| IdentityError::InvalidEncoding)?;
        if decoded.len() != DIGEST_LEN {
            return Err(IdentityError::InvalidEncoding);
        }
        Ok(Self(s.to_string()))
    }

    /// The binding hash of this id, used as MAC input.
    #[must_use]
    pub fn hash(&self) -> IdentityHash {
        IdentityHash(derive(HASH_CONTEXT, self.0.as_bytes()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for IdentityId {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

impl std::str::FromStr for IdentityId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for IdentityId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<IdentityId> for String {
    fn from(id: IdentityId) -> Self {
        id.0
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityId({})", self.0)
    }
}

/// 240-bit binding hash of an [`IdentityId`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentityHash([u8; DIGEST_LEN]);

impl IdentityHash {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for IdentityHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IdentityHash({:02x}{:02x}{:02x}{:02x}...)",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_pubkey_deterministic() {
        let bits = [7u8; 32];
        assert_eq!(hash_pubkey(&bits), hash_pubkey(&bits));
    }

    #[test]
    fn test_hash_pubkey_length_and_alphabet() {
        let id = hash_pubkey(b"some public key bits");
        assert_eq!(id.as_str().len(), ID_LEN);
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
    }

    #[test]
    fn test_hash_pubkey_one_byte_difference() {
        for i in 0..64u8 {
            let a = [i; 32];
            let mut b = a;
            b[usize::from(i) % 32] ^= 0x01;
            assert_ne!(hash_pubkey(&a), hash_pubkey(&b));
        }
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = hash_pubkey(b"key");
        let parsed = IdentityId::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(IdentityId::parse("ABC"), Err(IdentityError::InvalidLength(3)));

        let lowercase = hash_pubkey(b"key").as_str().to_lowercase();
        assert_eq!(
            IdentityId::parse(&lowercase),
            Err(IdentityError::InvalidEncoding)
        );

        let with_digit = format!("1{}", &hash_pubkey(b"key").as_str()[1..]);
        assert_eq!(
            IdentityId::parse(&with_digit),
            Err(IdentityError::InvalidEncoding)
        );
    }

    #[test]
    fn test_binding_hash_differs_per_id() {
        let a = hash_pubkey(b"a");
        let b = hash_pubkey(b"b");
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn test_binding_hash_is_not_the_id() {
        let id = hash_pubkey(b"a");
        let decoded = BASE32_NOPAD.decode(id.as_str().as_bytes()).unwrap();
        assert_ne!(&decoded[..], &id.hash().as_bytes()[..]);
    }

    #[test]
    fn test_serde_validates() {
        let id = hash_pubkey(b"a");
        let json = serde_json::to_string(&id).unwrap();
        let back: IdentityId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);

        assert!(serde_json::from_str::<IdentityId>("\"not-an-id\"").is_err());
    }
}
