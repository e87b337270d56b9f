//! One side of a challenge-response session.
//!
//! The secret and the outstanding challenge only exist inside the `Phase`
//! variants where they are valid. Every failed verification replaces the
//! phase with `Idle`, which drops (and zeroizes) both.

use super::mac::{Mac, Purpose};
use super::secret::{Challenge, Nonce, Secret};
use super::ChallengeError;
use crate::identity::{IdentityHash, IdentityId};

enum Phase {
    Idle,
    Armed { secret: Secret },
    Challenged { secret: Secret, challenge: Challenge },
}

/// Session between the local device and one remote device.
///
/// Binding order is fixed per MAC purpose:
///
/// | MAC | first | second |
/// |---|---|---|
/// | response | challenger | responder |
/// | csr | issuer | joiner |
/// | cert | joiner | issuer |
pub struct ChallengeResponse {
    local_id: IdentityId,
    remote_id: IdentityId,
    local_hash: IdentityHash,
    remote_hash: IdentityHash,
    phase: Phase,
}

impl ChallengeResponse {
    #[must_use]
    pub fn new(local_id: IdentityId, remote_id: IdentityId) -> Self {
        let local_hash = local_id.hash();
        let remote_hash = remote_id.hash();
        Self {
            local_id,
            remote_id,
            local_hash,
            remote_hash,
            phase: Phase::Idle,
        }
    }

    #[must_use]
    pub fn local_id(&self) -> &IdentityId {
        &self.local_id
    }

    #[must_use]
    pub fn remote_id(&self) -> &IdentityId {
        &self.remote_id
    }

    /// Whether a secret is currently armed.
    #[must_use]
    pub fn has_secret(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Generate and arm a fresh secret, dropping any challenge in flight.
    ///
    /// The returned copy is for display to a human.
    #[must_use]
    pub fn generate_secret(&mut self) -> Secret {
        let secret = Secret::generate();
        self.set_secret(secret.clone());
        secret
    }

    /// Arm a secret typed in by a human, dropping any challenge in flight.
    pub fn set_secret(&mut self, secret: Secret) {
        self.phase = Phase::Armed { secret };
    }

    /// Drop the secret and any outstanding challenge.
    pub fn forget(&mut self) {
        self.phase = Phase::Idle;
    }

    fn secret(&self) -> Result<&Secret, ChallengeError> {
        match &self.phase {
            Phase::Idle => Err(ChallengeError::NoSecret),
            Phase::Armed { secret } | Phase::Challenged { secret, .. } => Ok(secret),
        }
    }

    /// Issue a challenge for the remote side to answer.
    ///
    /// # Errors
    ///
    /// `NoSecret` when idle, `ChallengePending` when one is outstanding.
    pub fn issue_challenge(&mut self) -> Result<Challenge, ChallengeError> {
        let secret = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Armed { secret } => secret,
            other => {
                let err = match other {
                    Phase::Idle => ChallengeError::NoSecret,
                    _ => ChallengeError::ChallengePending,
                };
                self.phase = other;
                return Err(err);
            }
        };
        let challenge = Challenge::generate();
        self.phase = Phase::Challenged {
            secret,
            challenge: challenge.clone(),
        };
        Ok(challenge)
    }

    /// Answer a challenge issued by the remote side.
    ///
    /// # Errors
    ///
    /// `NoSecret` when idle.
    pub fn create_response(&self, challenge: &Challenge) -> Result<(Nonce, Mac), ChallengeError> {
        let secret = self.secret()?;
        let nonce = Nonce::generate();
        let mac = response_mac(
            secret,
            challenge,
            &nonce,
            &self.remote_hash,
            &self.local_hash,
        );
        Ok((nonce, mac))
    }

    /// Verify the remote side's answer to our outstanding challenge.
    ///
    /// The challenge is consumed either way. On success the secret stays
    /// armed for the enrollment MACs; on failure it is forgotten.
    ///
    /// # Errors
    ///
    /// `NoSecret`/`NoChallenge` without mutation, `WrongResponse` after
    /// forgetting the secret.
    pub fn check_response(&mut self, nonce: &Nonce, response: &Mac) -> Result<(), ChallengeError> {
        let (secret, challenge) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Challenged { secret, challenge } => (secret, challenge),
            other => {
                let err = match other {
                    Phase::Idle => ChallengeError::NoSecret,
                    _ => ChallengeError::NoChallenge,
                };
                self.phase = other;
                return Err(err);
            }
        };

        let expected = response_mac(
            &secret,
            &challenge,
            nonce,
            &self.local_hash,
            &self.remote_hash,
        );
        if expected != *response {
            return Err(ChallengeError::WrongResponse);
        }
        self.phase = Phase::Armed { secret };
        Ok(())
    }

    /// MAC over our CSR, sent by the joiner to the issuer.
    ///
    /// # Errors
    ///
    /// `NoSecret` when idle.
    pub fn csr_mac(&self, csr: &[u8]) -> Result<Mac, ChallengeError> {
        let secret = self.secret()?;
        Ok(Mac::compute(
            secret,
            Purpose::Csr,
            &self.remote_hash,
            &self.local_hash,
            csr,
        ))
    }

    /// Verify the joiner's CSR MAC on the issuer. Failure forgets the secret.
    ///
    /// # Errors
    ///
    /// `NoSecret` when idle, `WrongMac` on mismatch.
    pub fn check_csr_mac(&mut self, csr: &[u8], mac: &Mac) -> Result<(), ChallengeError> {
        let expected = Mac::compute(
            self.secret()?,
            Purpose::Csr,
            &self.local_hash,
            &self.remote_hash,
            csr,
        );
        self.settle(expected == *mac)
    }

    /// MAC over the issued certificate, sent by the issuer to the joiner.
    ///
    /// # Errors
    ///
    /// `NoSecret` when idle.
    pub fn cert_mac(&self, cert: &[u8]) -> Result<Mac, ChallengeError> {
        let secret = self.secret()?;
        Ok(Mac::compute(
            secret,
            Purpose::Cert,
            &self.remote_hash,
            &self.local_hash,
            cert,
        ))
    }

    /// Verify the issuer's certificate MAC on the joiner. Failure forgets the
    /// secret.
    ///
    /// # Errors
    ///
    /// `NoSecret` when idle, `WrongMac` on mismatch.
    pub fn check_cert_mac(&mut self, cert: &[u8], mac: &Mac) -> Result<(), ChallengeError> {
        let expected = Mac::compute(
            self.secret()?,
            Purpose::Cert,
            &self.local_hash,
            &self.remote_hash,
            cert,
        );
        self.settle(expected == *mac)
    }

    fn settle(&mut self, ok: bool) -> Result<(), ChallengeError> {
        if ok {
            Ok(())
        } else {
            self.forget();
            Err(ChallengeError::WrongMac)
        }
    }
}

fn response_mac(
    secret: &Secret,
    challenge: &Challenge,
    nonce: &Nonce,
    challenger: &IdentityHash,
    responder: &IdentityHash,
) -> Mac {
    let mut message = [0u8; 40];
    message[..20].copy_from_slice(challenge.as_bytes());
    message[20..].copy_from_slice(nonce.as_bytes());
    Mac::compute(secret, Purpose::Response, challenger, responder, &message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::PrivateKey;

    fn pair() -> (ChallengeResponse, ChallengeResponse) {
        let a = PrivateKey::generate().public_key().id();
        let b = PrivateKey::generate().public_key().id();
        (
            ChallengeResponse::new(a.clone(), b.clone()),
            ChallengeResponse::new(b, a),
        )
    }

    fn armed_pair() -> (ChallengeResponse, ChallengeResponse) {
        let (mut issuer, mut joiner) = pair();
        let secret = issuer.generate_secret();
        joiner.set_secret(Secret::parse(&secret.encode()).unwrap());
        (issuer, joiner)
    }

    #[test]
    fn test_response_accepted_with_same_secret() {
        let (mut issuer, joiner) = armed_pair();
        let challenge = issuer.issue_challenge().unwrap();
        let (nonce, response) = joiner.create_response(&challenge).unwrap();

        assert!(issuer.check_response(&nonce, &response).is_ok());
        assert!(issuer.has_secret());
    }

    #[test]
    fn test_wrong_secret_burns_session() {
        let (mut issuer, mut joiner) = pair();
        let _ = issuer.generate_secret();
        joiner.set_secret(Secret::generate());

        let challenge = issuer.issue_challenge().unwrap();
        let (nonce, response) = joiner.create_response(&challenge).unwrap();

        assert_eq!(
            issuer.check_response(&nonce, &response),
            Err(ChallengeError::WrongResponse)
        );
        assert!(!issuer.has_secret());
        assert_eq!(issuer.issue_challenge(), Err(ChallengeError::NoSecret));
    }

    #[test]
    fn test_reflected_response_rejected() {
        let (mut issuer, _) = armed_pair();
        let challenge = issuer.issue_challenge().unwrap();

        // The issuer answering its own challenge binds the parties backwards.
        let (nonce, response) = issuer.create_response(&challenge).unwrap();
        assert_eq!(
            issuer.check_response(&nonce, &response),
            Err(ChallengeError::WrongResponse)
        );
    }

    #[test]
    fn test_second_challenge_rejected() {
        let (mut issuer, _) = armed_pair();
        issuer.issue_challenge().unwrap();
        assert_eq!(issuer.issue_challenge(), Err(ChallengeError::ChallengePending));
        assert!(issuer.has_secret());
    }

    #[test]
    fn test_response_without_challenge() {
        let (mut issuer, joiner) = armed_pair();
        let (nonce, response) = joiner.create_response(&Challenge::generate()).unwrap();
        assert_eq!(
            issuer.check_response(&nonce, &response),
            Err(ChallengeError::NoChallenge)
        );
        assert!(issuer.has_secret());
    }

    #[test]
    fn test_response_to_stale_challenge_rejected() {
        let (mut issuer, joiner) = pair_with_secret("MFRGGZDF");
        let stale = issuer.issue_challenge().unwrap();
        let (nonce, response) = joiner.create_response(&stale).unwrap();

        // Re-arming drops the outstanding challenge.
        issuer.set_secret(Secret::parse("MFRGGZDF").unwrap());
        issuer.issue_challenge().unwrap();

        assert_eq!(
            issuer.check_response(&nonce, &response),
            Err(ChallengeError::WrongResponse)
        );
    }

    fn pair_with_secret(code: &str) -> (ChallengeResponse, ChallengeResponse) {
        let (mut issuer, mut joiner) = pair();
        issuer.set_secret(Secret::parse(code).unwrap());
        joiner.set_secret(Secret::parse(code).unwrap());
        (issuer, joiner)
    }

    #[test]
    fn test_csr_and_cert_macs() {
        let (mut issuer, mut joiner) = armed_pair();

        let csr_mac = joiner.csr_mac(b"csr").unwrap();
        assert!(issuer.check_csr_mac(b"csr", &csr_mac).is_ok());

        let cert_mac = issuer.cert_mac(b"cert").unwrap();
        assert!(joiner.check_cert_mac(b"cert", &cert_mac).is_ok());
    }

    #[test]
    fn test_csr_mac_not_valid_as_cert_mac() {
        let (issuer, mut joiner) = armed_pair();
        let mac = issuer.csr_mac(b"payload").unwrap();
        assert_eq!(
            joiner.check_cert_mac(b"payload", &mac),
            Err(ChallengeError::WrongMac)
        );
        assert!(!joiner.has_secret());
    }

    #[test]
    fn test_wrong_csr_mac_burns_secret() {
        let (mut issuer, joiner) = armed_pair();
        let mac = joiner.csr_mac(b"csr").unwrap();
        assert_eq!(
            issuer.check_csr_mac(b"tampered", &mac),
            Err(ChallengeError::WrongMac)
        );
        assert_eq!(issuer.cert_mac(b"cert"), Err(ChallengeError::NoSecret));
    }
}
