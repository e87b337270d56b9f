//! Pairing protocol handler.
//!
//! One [`PairingService`] owns the session with one expected peer. The
//! listener routes the peer's requests here, and the local driver
//! (see [`super::peering`]) calls into the same service for its half of the
//! exchange. State changes are published on a watch channel.

use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pairwise_auth::challenge::{Challenge, ChallengeError, Mac, Nonce, Secret};
use pairwise_auth::identity::IdentityId;
use pairwise_auth::pairing::{PairingError, PairingMachine, PairingState};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::http::{Abort, Handler, Method, Request, Response};
use crate::pki::{Kind, PkiError, PkiStore};
use crate::tls::TlsConnectInfo;

/// `GET /` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoDocument {
    pub id: IdentityId,
    pub host: String,
    pub user: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeBody {
    pub challenge: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseBody {
    pub nonce: String,
    pub response: Mac,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResponseOk {
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CsrBody {
    /// Base64 DER.
    pub csr: String,
    pub mac: Mac,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CertBody {
    /// Base64 DER.
    pub cert: String,
    pub mac: Mac,
}

/// Which side of the exchange this node plays.
pub enum Role {
    /// The existing device; signs the peer's CSR with its CA.
    Issuer { pki: Arc<PkiStore> },
    /// The joining device; never accepts a CSR.
    Joiner,
}

#[derive(Clone, Copy)]
enum Route {
    Info,
    Challenge,
    Response,
    Csr,
}

impl Route {
    fn from_path(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Route::Info),
            "/challenge" => Some(Route::Challenge),
            "/response" => Some(Route::Response),
            "/csr" => Some(Route::Csr),
            _ => None,
        }
    }

    fn method(self) -> Method {
        match self {
            Route::Info | Route::Challenge => Method::Get,
            Route::Response => Method::Put,
            Route::Csr => Method::Post,
        }
    }
}

pub struct PairingService {
    machine: Mutex<PairingMachine>,
    role: Role,
    info: InfoDocument,
    peer_id: IdentityId,
    state_tx: watch::Sender<PairingState>,
}

impl std::fmt::Debug for PairingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingService")
            .field("local", &self.info.id)
            .field("peer", &self.peer_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PairingService {
    pub fn new(info: InfoDocument, peer_id: IdentityId, role: Role) -> Self {
        let machine = PairingMachine::new(info.id.clone(), peer_id.clone());
        let (state_tx, _) = watch::channel(machine.state());
        Self {
            machine: Mutex::new(machine),
            role,
            info,
            peer_id,
            state_tx,
        }
    }

    pub fn info(&self) -> &InfoDocument {
        &self.info
    }

    pub fn peer_id(&self) -> &IdentityId {
        &self.peer_id
    }

    pub fn subscribe(&self) -> watch::Receiver<PairingState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> PairingState {
        *self.state_tx.borrow()
    }

    /// Run `f` against the machine and publish any state change.
    ///
    /// The lock is released before returning; never hold it across an await.
    fn with_machine<T>(&self, f: impl FnOnce(&mut PairingMachine) -> T) -> T {
        let mut machine = self.lock();
        let before = machine.state();
        let result = f(&mut machine);
        let after = machine.state();
        drop(machine);

        if before != after {
            tracing::info!(peer = %self.peer_id, from = %before, state = %after, "Pairing state changed");
            self.state_tx.send_replace(after);
        }
        result
    }

    fn lock(&self) -> MutexGuard<'_, PairingMachine> {
        match self.machine.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Arm a fresh secret for display to the human.
    #[must_use]
    pub fn regenerate_secret(&self) -> Secret {
        self.with_machine(PairingMachine::regenerate_secret)
    }

    /// Arm a secret typed in by the human.
    pub fn set_secret(&self, secret: Secret) {
        self.with_machine(|machine| machine.set_secret(secret));
    }

    pub fn create_response(&self, challenge: &Challenge) -> Result<(Nonce, Mac), PairingError> {
        self.with_machine(|machine| machine.create_response(challenge))
    }

    pub fn counter_response_ok(&self) -> Result<(), PairingError> {
        self.with_machine(PairingMachine::counter_response_ok)
    }

    pub fn csr_mac(&self, csr: &[u8]) -> Result<Mac, PairingError> {
        self.with_machine(|machine| machine.csr_mac(csr))
    }

    pub fn check_cert_mac(&self, cert: &[u8], mac: &Mac) -> Result<(), PairingError> {
        self.with_machine(|machine| machine.check_cert_mac(cert, mac))
    }

    fn get_info(&self) -> Result<Response, Abort> {
        self.with_machine(PairingMachine::get_info)
            .map_err(|e| self.pairing_abort(e))?;
        json(&self.info)
    }

    fn get_challenge(&self) -> Result<Response, Abort> {
        let challenge = self
            .with_machine(PairingMachine::get_challenge)
            .map_err(|e| self.pairing_abort(e))?;
        json(&ChallengeBody {
            challenge: challenge.encode(),
        })
    }

    fn put_response(&self, request: &Request) -> Result<Response, Abort> {
        let body: ResponseBody = parse_body(request)?;
        let nonce = Nonce::parse(&body.nonce).map_err(|_| Abort::BadRequestBody)?;
        self.with_machine(|machine| machine.put_response(&nonce, &body.response))
            .map_err(|e| self.pairing_abort(e))?;
        json(&ResponseOk { ok: true })
    }

    fn post_csr(&self, request: &Request) -> Result<Response, Abort> {
        let Role::Issuer { pki } = &self.role else {
            return Err(Abort::BadRequestOrder);
        };
        let body: CsrBody = parse_body(request)?;
        let csr = BASE64.decode(&body.csr).map_err(|_| Abort::BadRequestBody)?;

        match self.with_machine(|machine| machine.accept_csr(&csr, &body.mac)) {
            Ok(()) => {}
            Err(PairingError::TooEarly { .. }) => {
                tracing::debug!(peer = %self.peer_id, "CSR arrived before counter-challenge completed");
                return Ok(Response::too_early());
            }
            Err(e) => return Err(self.pairing_abort(e)),
        }

        let cert = self.issue(pki, &csr).map_err(|e| {
            tracing::warn!(peer = %self.peer_id, error = %e, "Failed to issue certificate");
            if e.is_identity_error() {
                Abort::Forbidden
            } else {
                Abort::Internal
            }
        })?;

        let mac = self
            .with_machine(|machine| machine.complete_enrollment(&cert))
            .map_err(|e| self.pairing_abort(e))?;
        tracing::info!(peer = %self.peer_id, "Issued certificate");
        json(&CertBody {
            cert: BASE64.encode(&cert),
            mac,
        })
    }

    /// Store the peer's CSR and sign it. A retry with the identical CSR
    /// reuses what is already on disk.
    fn issue(&self, pki: &PkiStore, csr: &[u8]) -> Result<Vec<u8>, PkiError> {
        let joiner = &self.peer_id;
        let issuer = &self.info.id;

        if pki.exists(Kind::Csr, joiner) {
            if pki.verify_csr(joiner)? != csr {
                return Err(PkiError::AlreadyExists {
                    filename: format!("{joiner}.{}", Kind::Csr.extension()),
                });
            }
        } else {
            pki.write_csr(joiner, csr)?;
        }

        if pki.exists(Kind::Cert, joiner) {
            return pki.verify_cert(joiner, issuer);
        }
        pki.issue_cert(joiner, issuer)
    }

    fn pairing_abort(&self, err: PairingError) -> Abort {
        match err {
            PairingError::Order { operation, state } => {
                tracing::debug!(peer = %self.peer_id, operation, state = %state, "Request out of order");
                Abort::BadRequestOrder
            }
            PairingError::WrongResponse | PairingError::WrongMac => {
                tracing::warn!(peer = %self.peer_id, error = %err, "Peer failed verification, secret discarded");
                Abort::Unauthorized
            }
            PairingError::Challenge(ChallengeError::Malformed { .. }) => Abort::BadRequestBody,
            PairingError::Challenge(ChallengeError::NoSecret) => Abort::BadRequestOrder,
            other => {
                tracing::warn!(peer = %self.peer_id, error = %other, "Pairing request failed");
                Abort::Internal
            }
        }
    }
}

impl Handler for PairingService {
    fn handle(&self, request: &Request, conn: &TlsConnectInfo) -> Result<Response, Abort> {
        let Some(route) = Route::from_path(&request.path) else {
            return Ok(Response::not_found());
        };
        if request.method != route.method() {
            return Err(Abort::MethodNotAllowed);
        }
        if !conn.is_self_signed_by(&self.peer_id) {
            tracing::warn!(
                expected = %self.peer_id,
                subject = ?conn.subject_cn,
                issuer = ?conn.issuer_cn,
                "Request from unexpected peer"
            );
            return Err(Abort::Forbidden);
        }

        match route {
            Route::Info => self.get_info(),
            Route::Challenge => self.get_challenge(),
            Route::Response => self.put_response(request),
            Route::Csr => self.post_csr(request),
        }
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(request: &Request) -> Result<T, Abort> {
    serde_json::from_slice(&request.body).map_err(|_| Abort::BadRequestBody)
}

fn json<T: Serialize>(value: &T) -> Result<Response, Abort> {
    Response::json(value).map_err(|_| Abort::Internal)
}
