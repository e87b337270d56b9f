//! Random protocol values: the human secret, challenges and nonces.

use data_encoding::BASE32_NOPAD;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::ChallengeError;

/// Secret size: 40 bits, 8 base32 characters.
pub const SECRET_LEN: usize = 5;

/// Challenge and nonce size: 160 bits.
pub const CHALLENGE_LEN: usize = 20;

fn decode_exact<const N: usize>(s: &str, field: &'static str) -> Result<[u8; N], ChallengeError> {
    let decoded = Zeroizing::new(
        BASE32_NOPAD
            .decode(s.as_bytes())
            .map_err(|_| ChallengeError::Malformed { field })?,
    );
    decoded
        .as_slice()
        .try_into()
        .map_err(|_| ChallengeError::Malformed { field })
}

/// The low-entropy secret a human relays between devices.
///
/// # Security
///
/// - Zeroized on drop
/// - No `Debug`/`Display`; use [`Secret::encode`] to show it to a human
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a secret typed by a human.
    ///
    /// Surrounding whitespace is ignored and lowercase is accepted.
    ///
    /// # Errors
    ///
    /// Returns `ChallengeError::Malformed` unless the input is exactly 8
    /// base32 characters.
    pub fn parse(s: &str) -> Result<Self, ChallengeError> {
        let normalized = Zeroizing::new(s.trim().to_ascii_uppercase());
        decode_exact::<SECRET_LEN>(&normalized, "secret").map(Self)
    }

    /// The 8-character form shown to a human.
    #[must_use]
    pub fn encode(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE32_NOPAD.encode(&self.0))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

macro_rules! random_token {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Zeroize)]
        pub struct $name([u8; CHALLENGE_LEN]);

        impl $name {
            #[must_use]
            pub fn generate() -> Self {
                let mut bytes = [0u8; CHALLENGE_LEN];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                Self(bytes)
            }

            /// # Errors
            ///
            /// Returns `ChallengeError::Malformed` unless the input is the
            /// base32 form of exactly 20 bytes.
            pub fn parse(s: &str) -> Result<Self, ChallengeError> {
                decode_exact::<CHALLENGE_LEN>(s, $field).map(Self)
            }

            #[must_use]
            pub fn encode(&self) -> String {
                BASE32_NOPAD.encode(&self.0)
            }

            #[must_use]
            pub fn as_bytes(&self) -> &[u8; CHALLENGE_LEN] {
                &self.0
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.encode())
            }
        }
    };
}

random_token!(
    /// A 160-bit challenge issued by the verifying side.
    Challenge,
    "challenge"
);

random_token!(
    /// A 160-bit nonce contributed by the responding side.
    Nonce,
    "nonce"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_is_eight_chars() {
        for _ in 0..32 {
            assert_eq!(Secret::generate().encode().len(), 8);
        }
    }

    #[test]
    fn test_secret_parse_roundtrip() {
        let secret = Secret::generate();
        let typed = secret.encode().to_lowercase();
        let parsed = Secret::parse(&format!("  {typed}\n")).unwrap();
        assert!(parsed == secret);
    }

    #[test]
    fn test_secret_parse_rejects_bad_input() {
        assert!(Secret::parse("ABCDEFG").is_err());
        assert!(Secret::parse("ABCDEFGHI").is_err());
        assert!(Secret::parse("R4F9K2NQ").is_err());
        assert!(Secret::parse("").is_err());
    }

    #[test]
    fn test_challenge_parse_roundtrip() {
        let challenge = Challenge::generate();
        assert_eq!(Challenge::parse(&challenge.encode()).unwrap(), challenge);
        assert_eq!(challenge.encode().len(), 32);
    }

    #[test]
    fn test_nonce_parse_rejects_wrong_length() {
        let short = BASE32_NOPAD.encode(&[0u8; 10]);
        assert_eq!(
            Nonce::parse(&short),
            Err(ChallengeError::Malformed { field: "nonce" })
        );
    }
}
