//! Pairing state machine.
//!
//! Wraps a [`ChallengeResponse`] session and enforces the order in which a
//! peer may drive it:
//!
//! ```text
//! info -> ready -> gave_challenge -> in_response -> response_ok -> counter_response_ok -> cert_issued
//!                                               \-> wrong_response             \-> wrong_mac
//! ```
//!
//! Operations attempted out of order fail with [`PairingError::Order`] and
//! leave both the state and the secret untouched.

use super::{PairingError, PairingState};
use crate::challenge::{Challenge, ChallengeResponse, Mac, Nonce, Secret};
use crate::identity::IdentityId;

pub struct PairingMachine {
    state: PairingState,
    session: ChallengeResponse,
}

impl PairingMachine {
    #[must_use]
    pub fn new(local_id: IdentityId, remote_id: IdentityId) -> Self {
        Self {
            state: PairingState::Info,
            session: ChallengeResponse::new(local_id, remote_id),
        }
    }

    #[must_use]
    pub fn state(&self) -> PairingState {
        self.state
    }

    #[must_use]
    pub fn local_id(&self) -> &IdentityId {
        self.session.local_id()
    }

    #[must_use]
    pub fn remote_id(&self) -> &IdentityId {
        self.session.remote_id()
    }

    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.session.has_secret()
    }

    fn expect(&self, operation: &'static str, from: PairingState) -> Result<(), PairingError> {
        if self.state == from {
            Ok(())
        } else {
            Err(PairingError::Order {
                operation,
                state: self.state,
            })
        }
    }

    /// Start a fresh cycle with a new secret. Returns the secret for display.
    ///
    /// Any challenge in flight is dropped. The state returns to `ready`, or
    /// stays `info` if the peer has not fetched our identity yet.
    #[must_use]
    pub fn regenerate_secret(&mut self) -> Secret {
        let secret = self.session.generate_secret();
        self.reset();
        secret
    }

    /// Start a fresh cycle with a secret typed in by a human.
    pub fn set_secret(&mut self, secret: Secret) {
        self.session.set_secret(secret);
        self.reset();
    }

    fn reset(&mut self) {
        if self.state != PairingState::Info {
            self.state = PairingState::Ready;
        }
    }

    /// `GET /`: the peer fetched our identity document.
    ///
    /// # Errors
    ///
    /// `Order` unless in `info`.
    pub fn get_info(&mut self) -> Result<(), PairingError> {
        self.expect("get_info", PairingState::Info)?;
        self.state = PairingState::Ready;
        Ok(())
    }

    /// `GET /challenge`: hand out a fresh challenge.
    ///
    /// # Errors
    ///
    /// `Order` unless in `ready`; `Challenge(NoSecret)` if no secret is armed.
    pub fn get_challenge(&mut self) -> Result<Challenge, PairingError> {
        self.expect("get_challenge", PairingState::Ready)?;
        let challenge = self.session.issue_challenge()?;
        self.state = PairingState::GaveChallenge;
        Ok(challenge)
    }

    /// `PUT /response`: check the peer's answer to our challenge.
    ///
    /// # Errors
    ///
    /// `Order` unless in `gave_challenge`; `WrongResponse` after moving to
    /// `wrong_response` and forgetting the secret.
    pub fn put_response(&mut self, nonce: &Nonce, response: &Mac) -> Result<(), PairingError> {
        self.expect("put_response", PairingState::GaveChallenge)?;
        self.state = PairingState::InResponse;
        match self.session.check_response(nonce, response) {
            Ok(()) => {
                self.state = PairingState::ResponseOk;
                Ok(())
            }
            Err(err) => {
                self.session.forget();
                self.state = PairingState::WrongResponse;
                Err(err.into())
            }
        }
    }

    /// The peer accepted our own answer to its counter-challenge.
    ///
    /// # Errors
    ///
    /// `Order` unless in `response_ok`.
    pub fn counter_response_ok(&mut self) -> Result<(), PairingError> {
        self.expect("counter_response_ok", PairingState::ResponseOk)?;
        self.state = PairingState::CounterResponseOk;
        Ok(())
    }

    /// `POST /csr`: check the joiner's CSR MAC.
    ///
    /// # Errors
    ///
    /// `TooEarly` in `response_ok`, `Order` in any other state but
    /// `counter_response_ok`, and `WrongMac` after moving to `wrong_mac`.
    pub fn accept_csr(&mut self, csr: &[u8], mac: &Mac) -> Result<(), PairingError> {
        if self.state == PairingState::ResponseOk {
            return Err(PairingError::TooEarly {
                operation: "accept_csr",
            });
        }
        self.expect("accept_csr", PairingState::CounterResponseOk)?;
        self.session.check_csr_mac(csr, mac).map_err(|err| {
            self.state = PairingState::WrongMac;
            PairingError::from(err)
        })
    }

    /// Finish enrollment with the issued certificate and return its MAC.
    ///
    /// # Errors
    ///
    /// `Order` unless in `counter_response_ok`.
    pub fn complete_enrollment(&mut self, cert: &[u8]) -> Result<Mac, PairingError> {
        self.expect("complete_enrollment", PairingState::CounterResponseOk)?;
        let mac = self.session.cert_mac(cert)?;
        self.state = PairingState::CertIssued;
        Ok(mac)
    }

    /// Answer a challenge the peer issued to us.
    ///
    /// # Errors
    ///
    /// `Challenge(NoSecret)` if no secret is armed.
    pub fn create_response(&self, challenge: &Challenge) -> Result<(Nonce, Mac), PairingError> {
        Ok(self.session.create_response(challenge)?)
    }

    /// MAC over our own CSR, for the issuer to check.
    ///
    /// # Errors
    ///
    /// `Challenge(NoSecret)` if no secret is armed.
    pub fn csr_mac(&self, csr: &[u8]) -> Result<Mac, PairingError> {
        Ok(self.session.csr_mac(csr)?)
    }

    /// Check the MAC the issuer sent with our certificate.
    ///
    /// # Errors
    ///
    /// `WrongMac` after moving to `wrong_mac` and forgetting the secret.
    pub fn check_cert_mac(&mut self, cert: &[u8], mac: &Mac) -> Result<(), PairingError> {
        self.session.check_cert_mac(cert, mac).map_err(|err| {
            self.state = PairingState::WrongMac;
            PairingError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::ChallengeError;
    use crate::identity::PrivateKey;

    struct Pair {
        issuer: PairingMachine,
        joiner: PairingMachine,
    }

    fn pair() -> Pair {
        let a = PrivateKey::generate().public_key().id();
        let b = PrivateKey::generate().public_key().id();
        Pair {
            issuer: PairingMachine::new(a.clone(), b.clone()),
            joiner: PairingMachine::new(b, a),
        }
    }

    fn armed(code: Option<&str>) -> Pair {
        let mut p = pair();
        let secret = p.issuer.regenerate_secret();
        let typed = code.map_or_else(|| secret.encode().to_string(), str::to_string);
        p.joiner.set_secret(Secret::parse(&typed).unwrap());
        p
    }

    /// Joiner answers the issuer's challenge.
    fn first_exchange(p: &mut Pair) -> Result<(), PairingError> {
        p.issuer.get_info().unwrap();
        let challenge = p.issuer.get_challenge().unwrap();
        let (nonce, response) = p.joiner.create_response(&challenge).unwrap();
        p.issuer.put_response(&nonce, &response)
    }

    /// Issuer answers the joiner's counter-challenge.
    fn counter_exchange(p: &mut Pair) {
        p.joiner.get_info().unwrap();
        let challenge = p.joiner.get_challenge().unwrap();
        let (nonce, response) = p.issuer.create_response(&challenge).unwrap();
        p.joiner.put_response(&nonce, &response).unwrap();
        p.issuer.counter_response_ok().unwrap();
    }

    #[test]
    fn test_full_exchange() {
        let mut p = armed(None);
        first_exchange(&mut p).unwrap();
        assert_eq!(p.issuer.state(), PairingState::ResponseOk);

        counter_exchange(&mut p);
        assert_eq!(p.joiner.state(), PairingState::ResponseOk);
        assert_eq!(p.issuer.state(), PairingState::CounterResponseOk);

        let csr_mac = p.joiner.csr_mac(b"csr").unwrap();
        p.issuer.accept_csr(b"csr", &csr_mac).unwrap();
        let cert_mac = p.issuer.complete_enrollment(b"cert").unwrap();
        assert_eq!(p.issuer.state(), PairingState::CertIssued);

        p.joiner.check_cert_mac(b"cert", &cert_mac).unwrap();
    }

    #[test]
    fn test_initial_state_is_info() {
        let p = pair();
        assert_eq!(p.issuer.state(), PairingState::Info);
        assert!(!p.issuer.has_secret());
    }

    #[test]
    fn test_get_info_only_once() {
        let mut p = armed(None);
        p.issuer.get_info().unwrap();
        assert_eq!(
            p.issuer.get_info(),
            Err(PairingError::Order {
                operation: "get_info",
                state: PairingState::Ready
            })
        );
    }

    #[test]
    fn test_challenge_before_info_rejected() {
        let mut p = armed(None);
        assert!(matches!(
            p.issuer.get_challenge(),
            Err(PairingError::Order { .. })
        ));
        assert_eq!(p.issuer.state(), PairingState::Info);
    }

    #[test]
    fn test_second_challenge_rejected_without_mutation() {
        let mut p = armed(None);
        p.issuer.get_info().unwrap();
        let challenge = p.issuer.get_challenge().unwrap();

        assert_eq!(
            p.issuer.get_challenge(),
            Err(PairingError::Order {
                operation: "get_challenge",
                state: PairingState::GaveChallenge
            })
        );
        assert_eq!(p.issuer.state(), PairingState::GaveChallenge);

        // The first challenge is still the live one.
        let (nonce, response) = p.joiner.create_response(&challenge).unwrap();
        p.issuer.put_response(&nonce, &response).unwrap();
    }

    #[test]
    fn test_response_without_challenge_rejected() {
        let mut p = armed(None);
        p.issuer.get_info().unwrap();
        let (nonce, response) = p.joiner.create_response(&Challenge::generate()).unwrap();
        assert!(matches!(
            p.issuer.put_response(&nonce, &response),
            Err(PairingError::Order { .. })
        ));
        assert_eq!(p.issuer.state(), PairingState::Ready);
        assert!(p.issuer.has_secret());
    }

    #[test]
    fn test_challenge_without_secret() {
        let mut p = pair();
        p.issuer.get_info().unwrap();
        assert_eq!(
            p.issuer.get_challenge(),
            Err(PairingError::Challenge(ChallengeError::NoSecret))
        );
        assert_eq!(p.issuer.state(), PairingState::Ready);
    }

    #[test]
    fn test_wrong_secret_is_terminal() {
        let mut p = armed(Some("AAAAAAAA"));
        assert_eq!(first_exchange(&mut p), Err(PairingError::WrongResponse));
        assert_eq!(p.issuer.state(), PairingState::WrongResponse);
        assert!(!p.issuer.has_secret());
        assert!(matches!(
            p.issuer.get_challenge(),
            Err(PairingError::Order { .. })
        ));
    }

    #[test]
    fn test_stale_secret_fails_after_regeneration() {
        let mut p = pair();
        let original = p.issuer.regenerate_secret();
        p.joiner.set_secret(Secret::parse("AAAAAAAA").unwrap());
        assert_eq!(first_exchange(&mut p), Err(PairingError::WrongResponse));

        let _fresh = p.issuer.regenerate_secret();
        assert_eq!(p.issuer.state(), PairingState::Ready);

        // The previously correct secret is no longer accepted.
        p.joiner.set_secret(Secret::parse(&original.encode()).unwrap());
        let challenge = p.issuer.get_challenge().unwrap();
        let (nonce, response) = p.joiner.create_response(&challenge).unwrap();
        assert_eq!(
            p.issuer.put_response(&nonce, &response),
            Err(PairingError::WrongResponse)
        );
    }

    #[test]
    fn test_regenerate_before_info_stays_info() {
        let mut p = pair();
        let _ = p.issuer.regenerate_secret();
        assert_eq!(p.issuer.state(), PairingState::Info);
    }

    #[test]
    fn test_csr_too_early() {
        let mut p = armed(None);
        first_exchange(&mut p).unwrap();
        let mac = p.joiner.csr_mac(b"csr").unwrap();
        assert_eq!(
            p.issuer.accept_csr(b"csr", &mac),
            Err(PairingError::TooEarly {
                operation: "accept_csr"
            })
        );
        assert_eq!(p.issuer.state(), PairingState::ResponseOk);
    }

    #[test]
    fn test_csr_before_response_is_order_error() {
        let mut p = armed(None);
        let mac = p.joiner.csr_mac(b"csr").unwrap();
        assert!(matches!(
            p.issuer.accept_csr(b"csr", &mac),
            Err(PairingError::Order { .. })
        ));
    }

    #[test]
    fn test_wrong_csr_mac_burns_secret() {
        let mut p = armed(None);
        first_exchange(&mut p).unwrap();
        counter_exchange(&mut p);

        let mac = p.joiner.csr_mac(b"csr").unwrap();
        assert_eq!(
            p.issuer.accept_csr(b"other csr", &mac),
            Err(PairingError::WrongMac)
        );
        assert_eq!(p.issuer.state(), PairingState::WrongMac);
        assert!(!p.issuer.has_secret());
        assert!(matches!(
            p.issuer.complete_enrollment(b"cert"),
            Err(PairingError::Order { .. })
        ));
    }

    #[test]
    fn test_wrong_cert_mac_on_joiner() {
        let mut p = armed(None);
        first_exchange(&mut p).unwrap();
        counter_exchange(&mut p);

        let csr_mac = p.joiner.csr_mac(b"csr").unwrap();
        p.issuer.accept_csr(b"csr", &csr_mac).unwrap();
        let cert_mac = p.issuer.complete_enrollment(b"cert").unwrap();

        assert_eq!(
            p.joiner.check_cert_mac(b"forged cert", &cert_mac),
            Err(PairingError::WrongMac)
        );
        assert_eq!(p.joiner.state(), PairingState::WrongMac);
    }
}
