//! Challenge-response engine.
//!
//! Two devices prove to each other that they hold the same low-entropy
//! secret without ever sending it:
//!
//! 1. The verifier issues a random 160-bit [`Challenge`].
//! 2. The responder returns a fresh [`Nonce`] and
//!    `MAC_response(secret, challenge || nonce)` bound to
//!    `(challenger, responder)`.
//! 3. The verifier recomputes the MAC with its own view of the parties.
//!
//! A secret allows exactly one failed attempt: any mismatch forgets it, so an
//! attacker who guesses wrong must get a human to relay a new code. The same
//! secret then authenticates the CSR and the issued certificate through MACs
//! under their own [`Purpose`].

mod error;
mod mac;
mod secret;
mod session;

pub use error::ChallengeError;
pub use mac::{MAC_LEN, Mac, Purpose};
pub use secret::{CHALLENGE_LEN, Challenge, Nonce, SECRET_LEN, Secret};
pub use session::ChallengeResponse;
