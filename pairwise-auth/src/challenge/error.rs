//! Challenge-response error types.

/// Errors raised by the challenge-response engine.
///
/// `WrongResponse` and `WrongMac` are expected protocol outcomes, not bugs.
/// By the time either is returned the session has already forgotten its
/// secret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ChallengeError {
    /// No secret is armed (never set, or burned by an earlier failure).
    #[error("no secret is armed")]
    NoSecret,

    /// A response was submitted but no challenge is outstanding.
    #[error("no challenge is outstanding")]
    NoChallenge,

    /// A challenge is already outstanding.
    #[error("a challenge is already outstanding")]
    ChallengePending,

    /// The challenge response did not verify.
    #[error("wrong response")]
    WrongResponse,

    /// A CSR or certificate MAC did not verify.
    #[error("wrong MAC")]
    WrongMac,

    /// A wire value could not be decoded.
    #[error("malformed {field}")]
    Malformed { field: &'static str },
}
