//! Ed25519 key material behind every identity id.
//!
//! Private keys and their PKCS#8 exports are wiped on drop and have no
//! `Debug` form.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::id::{IdentityId, hash_pubkey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid key format")]
    InvalidFormat,
}

/// PKCS#8 DER of a private key, wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for SecretBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// The signing half of an identity. Never leaves the key store except as
/// [`SecretBytes`].
pub struct PrivateKey(ed25519_dalek::SigningKey);

impl PrivateKey {
    #[must_use]
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Export the private key as PKCS#8 DER bytes.
    ///
    /// This is the on-disk `.key` format and what rcgen and rustls expect.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if encoding fails.
    pub fn to_pkcs8_der(&self) -> Result<SecretBytes, KeyError> {
        use ed25519_dalek::pkcs8::EncodePrivateKey;
        let der = self
            .0
            .to_pkcs8_der()
            .map_err(|_| KeyError::InvalidFormat)?;
        Ok(SecretBytes(der.as_bytes().to_vec()))
    }

    /// Load a private key from PKCS#8 DER bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the bytes are not valid PKCS#8.
    pub fn from_pkcs8_der(bytes: &[u8]) -> Result<Self, KeyError> {
        use ed25519_dalek::pkcs8::DecodePrivateKey;
        let key =
            ed25519_dalek::SigningKey::from_pkcs8_der(bytes).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }
}

/// Public half of an identity; hashing its raw bits yields the id.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    /// # Errors
    ///
    /// `InvalidLength` unless 32 bytes, `InvalidFormat` if not a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }

    /// Export the raw public key bits, as they appear in a certificate's
    /// `subjectPublicKey` field.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }

    /// The identity id of this key.
    #[must_use]
    pub fn id(&self) -> IdentityId {
        hash_pubkey(&self.to_bytes())
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_key_keeps_id() {
        let key = PrivateKey::generate();
        let der = key.to_pkcs8_der().unwrap();
        let reloaded = PrivateKey::from_pkcs8_der(&der).unwrap();
        assert_eq!(key.public_key().id(), reloaded.public_key().id());
    }

    #[test]
    fn test_garbage_der_rejected() {
        for garbage in [&[0u8; 48][..], &[1, 2, 3], &[]] {
            assert!(matches!(
                PrivateKey::from_pkcs8_der(garbage),
                Err(KeyError::InvalidFormat)
            ));
        }
    }

    #[test]
    fn test_distinct_keys_distinct_ids() {
        let a = PrivateKey::generate().public_key();
        let b = PrivateKey::generate().public_key();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_public_key_from_bytes() {
        let key = PrivateKey::generate().public_key();
        let restored = PublicKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key, restored);

        assert_eq!(
            PublicKey::from_bytes(&[0u8; 16]),
            Err(KeyError::InvalidLength {
                expected: 32,
                actual: 16
            })
        );
    }

    #[test]
    fn test_id_matches_hash_of_raw_bits() {
        let key = PrivateKey::generate().public_key();
        assert_eq!(key.id(), hash_pubkey(&key.to_bytes()));
    }
}
