//! Pairing error types.

use super::PairingState;
use crate::challenge::ChallengeError;

/// Errors returned by [`super::PairingMachine`] operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum PairingError {
    /// The operation is not legal in the current state. Nothing changed.
    #[error("{operation} not allowed in state {state}")]
    Order {
        operation: &'static str,
        state: PairingState,
    },

    /// A CSR arrived while our own counter-challenge answer is in flight.
    #[error("{operation} arrived before the counter-challenge completed")]
    TooEarly { operation: &'static str },

    /// The peer's challenge response did not verify; the secret is gone.
    #[error("wrong response")]
    WrongResponse,

    /// A CSR or certificate MAC did not verify; the secret is gone.
    #[error("wrong MAC")]
    WrongMac,

    /// Any other engine failure (no secret armed, malformed input).
    #[error(transparent)]
    Challenge(ChallengeError),
}

impl From<ChallengeError> for PairingError {
    fn from(err: ChallengeError) -> Self {
        match err {
            ChallengeError::WrongResponse => PairingError::WrongResponse,
            ChallengeError::WrongMac => PairingError::WrongMac,
            other => PairingError::Challenge(other),
        }
    }
}
