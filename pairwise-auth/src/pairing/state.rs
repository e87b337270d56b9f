//! Pairing states as seen by the responder.

use serde::{Deserialize, Serialize};

/// Where a pairing session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    /// The peer has not fetched our identity document yet.
    Info,
    /// Identity round-tripped; waiting for a challenge request.
    Ready,
    /// A challenge is outstanding.
    GaveChallenge,
    /// A response is being checked.
    InResponse,
    /// The peer proved it knows the secret.
    ResponseOk,
    /// The peer's response failed. Terminal for this secret.
    WrongResponse,
    /// The peer also accepted our answer to its counter-challenge.
    CounterResponseOk,
    /// A CSR MAC failed. Terminal for this secret.
    WrongMac,
    /// A certificate was issued. Terminal success.
    CertIssued,
}

impl PairingState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PairingState::Info => "info",
            PairingState::Ready => "ready",
            PairingState::GaveChallenge => "gave_challenge",
            PairingState::InResponse => "in_response",
            PairingState::ResponseOk => "response_ok",
            PairingState::WrongResponse => "wrong_response",
            PairingState::CounterResponseOk => "counter_response_ok",
            PairingState::WrongMac => "wrong_mac",
            PairingState::CertIssued => "cert_issued",
        }
    }

    /// Whether the session can make no further progress without a new secret
    /// (or, for `CertIssued`, at all).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PairingState::WrongResponse | PairingState::WrongMac | PairingState::CertIssued
        )
    }
}

impl std::fmt::Display for PairingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_matches_display() {
        for state in [
            PairingState::Info,
            PairingState::GaveChallenge,
            PairingState::CounterResponseOk,
            PairingState::CertIssued,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(PairingState::WrongResponse.is_terminal());
        assert!(PairingState::CertIssued.is_terminal());
        assert!(!PairingState::ResponseOk.is_terminal());
    }
}
