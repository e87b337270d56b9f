//! Outbound side of the pairing exchange.
//!
//! Each device serves a [`PairingService`] to the other and also drives the
//! other's service as a client:
//!
//! ```text
//! phase 1  both     GET peer:/                        fetch identity documents
//! phase 3  joiner   GET issuer:/challenge, PUT /response
//! phase 4  issuer   GET joiner:/challenge, PUT /response   (counter-challenge)
//! phase 5  joiner   POST issuer:/csr  -> cert + cert MAC
//! phase 6  joiner   check cert MAC, store chain-verified cert
//! ```
//!
//! Phase 1 and the later phases use separate connections, so the time a
//! human spends relaying the code never counts against a connection's idle
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use pairwise_auth::challenge::{Challenge, Mac, Nonce};
use pairwise_auth::identity::IdentityId;
use pairwise_auth::pairing::{PairingError, PairingState};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use super::pairing::{CertBody, ChallengeBody, CsrBody, InfoDocument, PairingService, ResponseBody};
use crate::discovery::PeerAddr;
use crate::http::{ClientError, ClientResponse, HttpClient};
use crate::pki::{Kind, PkiError, PkiStore};
use crate::tls::{ClientIdentity, TlsConfigError, build_client_config, server_name};

/// Delay between `POST /csr` attempts answered with `425 Too Early`.
const CSR_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Delay between connection attempts while the peer is not listening.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum PeeringError {
    /// The peer rejected our answer to its challenge, or we rejected its
    /// answer to ours in phase 3. The secret is gone on both sides.
    #[error("typo? try again with the new code")]
    WrongSecret,

    /// The counter-challenge, a MAC, or chain validation failed.
    #[error("untrusted peer: {reason}")]
    UntrustedPeer { reason: String },

    #[error("peer refused request: {status} {reason}")]
    Rejected { status: u16, reason: String },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("pairing session closed")]
    SessionClosed,

    #[error(transparent)]
    Pki(#[from] PkiError),

    #[error(transparent)]
    Tls(#[from] TlsConfigError),

    #[error(transparent)]
    Http(#[from] ClientError),

    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PeeringError {
    fn untrusted(reason: impl Into<String>) -> Self {
        PeeringError::UntrustedPeer {
            reason: reason.into(),
        }
    }
}

/// Timeouts shared by both drivers.
#[derive(Debug, Clone, Copy)]
pub struct PeeringTimeouts {
    pub handshake: Duration,
    /// Overall budget for one pairing attempt, human included.
    pub pairing: Duration,
}

impl Default for PeeringTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            pairing: Duration::from_secs(300),
        }
    }
}

/// One TLS connection to the peer's pairing service.
pub struct PeerClient {
    http: HttpClient<TlsStream<TcpStream>>,
    peer_id: IdentityId,
}

impl PeerClient {
    /// Connect to `peer`, accepting only its self-signed certificate, and
    /// record that certificate as the peer's CA.
    pub async fn connect(
        peer: &PeerAddr,
        identity: &ClientIdentity,
        pki: &PkiStore,
        handshake_timeout: Duration,
    ) -> Result<Self, PeeringError> {
        let stream = connect_tls(peer, identity, handshake_timeout).await?;

        let peer_ca = stream
            .get_ref()
            .1
            .peer_certificates()
            .and_then(|chain| chain.first())
            .ok_or_else(|| PeeringError::untrusted("peer presented no certificate"))?;
        store_peer_ca(pki, &peer.id, peer_ca.as_ref())?;

        Ok(Self {
            http: HttpClient::new(stream, peer.id.as_str().to_ascii_lowercase()),
            peer_id: peer.id.clone(),
        })
    }

    pub async fn get_info(&mut self) -> Result<InfoDocument, PeeringError> {
        let info: InfoDocument = expect_success(self.http.get("/").await?)?.json()?;
        if info.id != self.peer_id {
            return Err(PeeringError::untrusted(format!(
                "peer claims id {} in its identity document",
                info.id
            )));
        }
        tracing::debug!(peer = %self.peer_id, host = %info.host, user = %info.user, "Fetched peer info");
        Ok(info)
    }

    pub async fn get_challenge(&mut self) -> Result<Challenge, PeeringError> {
        let body: ChallengeBody = expect_success(self.http.get("/challenge").await?)?.json()?;
        Challenge::parse(&body.challenge)
            .map_err(|e| PeeringError::Pairing(PairingError::Challenge(e)))
    }

    /// `Ok(false)` when the peer rejected the response.
    pub async fn put_response(&mut self, nonce: &Nonce, mac: &Mac) -> Result<bool, PeeringError> {
        let body = ResponseBody {
            nonce: nonce.encode(),
            response: mac.clone(),
        };
        let response = self.http.put_json("/response", &body).await?;
        if response.status == 401 {
            return Ok(false);
        }
        expect_success(response)?;
        Ok(true)
    }

    /// `Ok(None)` when the peer is not ready for the CSR yet.
    pub async fn post_csr(
        &mut self,
        csr: &[u8],
        mac: &Mac,
    ) -> Result<Option<(Vec<u8>, Mac)>, PeeringError> {
        let body = CsrBody {
            csr: BASE64.encode(csr),
            mac: mac.clone(),
        };
        let response = self.http.post_json("/csr", &body).await?;
        if response.status == 425 {
            return Ok(None);
        }
        if response.status == 401 {
            return Err(PeeringError::untrusted("peer rejected our CSR MAC"));
        }
        let body: CertBody = expect_success(response)?.json()?;
        let cert = BASE64
            .decode(&body.cert)
            .map_err(|_| PeeringError::untrusted("certificate is not valid base64"))?;
        Ok(Some((cert, body.mac)))
    }
}

/// TCP connect plus a TLS handshake pinned to `peer.id`.
pub(crate) async fn connect_tls(
    peer: &PeerAddr,
    identity: &ClientIdentity,
    handshake_timeout: Duration,
) -> Result<TlsStream<TcpStream>, PeeringError> {
    let connector = TlsConnector::from(build_client_config(identity, &peer.id)?);
    let name = server_name(&peer.id)?;

    let connect = async {
        let tcp = TcpStream::connect(&peer.addr).await?;
        connector.connect(name, tcp).await
    };
    match tokio::time::timeout(handshake_timeout, connect).await {
        Ok(Ok(stream)) => {
            tracing::debug!(peer = %peer, "Connected");
            Ok(stream)
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
            // rustls reports certificate rejection as InvalidData.
            Err(PeeringError::untrusted(format!("TLS handshake failed: {e}")))
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(PeeringError::Timeout("TLS handshake")),
    }
}

fn store_peer_ca(pki: &PkiStore, peer_id: &IdentityId, cert: &[u8]) -> Result<(), PkiError> {
    if pki.exists(Kind::Ca, peer_id) {
        pki.verify_ca(peer_id)?;
        return Ok(());
    }
    pki.write_ca(peer_id, cert)?;
    tracing::info!(peer = %peer_id, "Stored peer CA");
    Ok(())
}

fn expect_success(response: ClientResponse) -> Result<ClientResponse, PeeringError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(PeeringError::Rejected {
            status: response.status,
            reason: response.reason,
        })
    }
}

async fn wait_for_state(
    rx: &mut watch::Receiver<PairingState>,
    timeout: Duration,
    what: &'static str,
    mut done: impl FnMut(PairingState) -> bool,
) -> Result<PairingState, PeeringError> {
    match tokio::time::timeout(timeout, rx.wait_for(|state| done(*state))).await {
        Ok(Ok(state)) => Ok(*state),
        Ok(Err(_)) => Err(PeeringError::SessionClosed),
        Err(_) => Err(PeeringError::Timeout(what)),
    }
}

/// Shared connection details for both drivers.
struct Link {
    service: Arc<PairingService>,
    peer: PeerAddr,
    identity: ClientIdentity,
    pki: Arc<PkiStore>,
    timeouts: PeeringTimeouts,
    info_fetched: bool,
}

impl Link {
    async fn connect(&self) -> Result<PeerClient, PeeringError> {
        PeerClient::connect(&self.peer, &self.identity, &self.pki, self.timeouts.handshake).await
    }

    /// Phase 1, once per driver. Retries after a wrong secret skip it since
    /// the peer's state machine has already left `info`.
    ///
    /// The peer may not be listening yet, so refused connections are retried
    /// until the pairing timeout.
    async fn fetch_info(&mut self) -> Result<(), PeeringError> {
        if self.info_fetched {
            return Ok(());
        }
        let deadline = tokio::time::Instant::now() + self.timeouts.pairing;
        let mut client = loop {
            match self.connect().await {
                Ok(client) => break client,
                Err(PeeringError::Io(e)) if tokio::time::Instant::now() < deadline => {
                    tracing::debug!(peer = %self.peer, error = %e, "Peer not reachable yet, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        };
        client.get_info().await?;
        self.info_fetched = true;
        Ok(())
    }
}

/// Drives the existing device's half: phase 1 and the counter-challenge.
pub struct Issuer {
    link: Link,
}

impl Issuer {
    pub fn new(
        service: Arc<PairingService>,
        peer: PeerAddr,
        identity: ClientIdentity,
        pki: Arc<PkiStore>,
        timeouts: PeeringTimeouts,
    ) -> Self {
        Self {
            link: Link {
                service,
                peer,
                identity,
                pki,
                timeouts,
                info_fetched: false,
            },
        }
    }

    /// Run one attempt. On [`PeeringError::WrongSecret`] the caller shows a
    /// regenerated code and calls `run` again.
    pub async fn run(&mut self) -> Result<(), PeeringError> {
        self.link.fetch_info().await?;

        let service = self.link.service.clone();
        let timeout = self.link.timeouts.pairing;
        let mut rx = service.subscribe();

        // Phase 3 runs on our listener.
        let state = wait_for_state(&mut rx, timeout, "the peer's response", |state| {
            matches!(state, PairingState::ResponseOk | PairingState::WrongResponse)
        })
        .await?;
        if state == PairingState::WrongResponse {
            return Err(PeeringError::WrongSecret);
        }

        // Phase 4
        let mut client = self.link.connect().await?;
        let challenge = client.get_challenge().await?;
        let (nonce, mac) = service.create_response(&challenge)?;
        if !client.put_response(&nonce, &mac).await? {
            return Err(PeeringError::untrusted("peer rejected our counter-challenge response"));
        }
        service.counter_response_ok()?;
        drop(client);

        // Phase 5 runs on our listener.
        let state = wait_for_state(&mut rx, timeout, "the peer's CSR", |state| {
            matches!(state, PairingState::CertIssued | PairingState::WrongMac)
        })
        .await?;
        if state == PairingState::WrongMac {
            return Err(PeeringError::untrusted("CSR MAC did not verify"));
        }

        tracing::info!(peer = %self.link.peer.id, "Pairing complete, certificate issued");
        Ok(())
    }
}

/// Drives the joining device's half: phases 1, 3, 5 and 6.
pub struct Joiner {
    link: Link,
}

impl Joiner {
    pub fn new(
        service: Arc<PairingService>,
        peer: PeerAddr,
        identity: ClientIdentity,
        pki: Arc<PkiStore>,
        timeouts: PeeringTimeouts,
    ) -> Self {
        Self {
            link: Link {
                service,
                peer,
                identity,
                pki,
                timeouts,
                info_fetched: false,
            },
        }
    }

    /// Run one attempt and return the stored, chain-verified certificate.
    ///
    /// On [`PeeringError::WrongSecret`] the caller asks the human for the
    /// new code, arms it with [`PairingService::set_secret`] and calls `run`
    /// again.
    pub async fn run(&mut self) -> Result<Vec<u8>, PeeringError> {
        self.link.fetch_info().await?;

        let service = self.link.service.clone();
        let timeout = self.link.timeouts.pairing;
        let local = service.info().id.clone();
        let issuer = self.link.peer.id.clone();
        let mut rx = service.subscribe();

        // Phase 3
        {
            let mut client = self.link.connect().await?;
            let challenge = client.get_challenge().await?;
            let (nonce, mac) = service.create_response(&challenge)?;
            if !client.put_response(&nonce, &mac).await? {
                return Err(PeeringError::WrongSecret);
            }
        }

        // Phase 4 runs on our listener.
        let state = wait_for_state(&mut rx, timeout, "the counter-challenge", |state| {
            matches!(state, PairingState::ResponseOk | PairingState::WrongResponse)
        })
        .await?;
        if state == PairingState::WrongResponse {
            return Err(PeeringError::untrusted("peer failed the counter-challenge"));
        }

        // Phase 5
        if !self.link.pki.exists(Kind::Csr, &local) {
            self.link.pki.create_csr(&local)?;
        }
        let csr = self.link.pki.verify_csr(&local)?;
        let csr_mac = service.csr_mac(&csr)?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut client = self.link.connect().await?;
        let (cert, cert_mac) = loop {
            if let Some(issued) = client.post_csr(&csr, &csr_mac).await? {
                break issued;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(PeeringError::Timeout("the issuer to accept our CSR"));
            }
            tokio::time::sleep(CSR_RETRY_DELAY).await;
        };
        drop(client);

        // Phase 6
        service
            .check_cert_mac(&cert, &cert_mac)
            .map_err(|e| match e {
                PairingError::WrongMac => PeeringError::untrusted("certificate MAC did not verify"),
                other => other.into(),
            })?;

        if self.link.pki.exists(Kind::Cert, &local) {
            return Ok(self.link.pki.verify_cert(&local, &issuer)?);
        }
        self.link
            .pki
            .write_cert(&local, &issuer, &cert)
            .map_err(|e| {
                if e.is_identity_error() {
                    PeeringError::untrusted(e.to_string())
                } else {
                    e.into()
                }
            })?;

        tracing::info!(issuer = %issuer, "Pairing complete, certificate stored");
        Ok(cert)
    }
}
