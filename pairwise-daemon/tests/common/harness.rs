//! Test harnesses for transport and pairing tests.
//!
//! Every node gets a throwaway data directory and every listener binds an
//! ephemeral loopback port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pairwise_auth::{IdentityId, Secret};
use pairwise_daemon::discovery::PeerAddr;
use pairwise_daemon::http::{
    Abort, Handler, Method, Request, Response, Server, ServerOptions,
};
use pairwise_daemon::services::{
    Issuer, Joiner, PairingService, PeeringError, PeeringTimeouts, Role,
};
use pairwise_daemon::tls::{ClientAuth, TlsConnectInfo, TlsServerConfig};
use pairwise_daemon::LocalNode;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Timeouts short enough that a stuck exchange fails the test quickly.
pub fn test_timeouts() -> PeeringTimeouts {
    PeeringTimeouts {
        handshake: Duration::from_secs(5),
        pairing: Duration::from_secs(10),
    }
}

/// A device with its own data directory.
pub struct TestNode {
    pub node: LocalNode,
    _dir: TempDir,
}

impl TestNode {
    pub fn new(host: &str) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let node = LocalNode::load_or_init(dir.path(), host.to_string(), "tester".to_string())
            .expect("Failed to create node");
        Self { node, _dir: dir }
    }

    pub fn id(&self) -> &IdentityId {
        self.node.id()
    }
}

/// A listener serving in the background until dropped.
pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub async fn start<H: Handler>(
        handler: Arc<H>,
        tls: Option<TlsServerConfig>,
        options: ServerOptions,
    ) -> Self {
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("loopback address");
        let server = Server::bind(addr, tls, handler, options)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("Failed to read local addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            server.run_until(shutdown).await.expect("Server failed");
        });

        Self {
            addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn peer_addr(&self, id: &IdentityId) -> PeerAddr {
        PeerAddr {
            id: id.clone(),
            addr: self.addr.to_string(),
        }
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// One device's side of a pairing: its session and the listener serving it.
pub struct PairingSide {
    pub service: Arc<PairingService>,
    pub server: RunningServer,
}

impl PairingSide {
    pub async fn start(node: &TestNode, peer_id: &IdentityId, role: Role) -> Self {
        let service = Arc::new(PairingService::new(node.node.info(), peer_id.clone(), role));
        let tls = node
            .node
            .server_tls(&ClientAuth::Pinned(peer_id.clone()))
            .expect("Failed to build pairing TLS config");
        let server = RunningServer::start(service.clone(), Some(tls), ServerOptions::default()).await;
        Self { service, server }
    }
}

/// An issuer and a joiner listening for each other, with drivers ready.
pub struct PairingPair {
    pub issuer: TestNode,
    pub joiner: TestNode,
    pub issuer_side: PairingSide,
    pub joiner_side: PairingSide,
}

impl PairingPair {
    pub async fn start() -> Self {
        let issuer = TestNode::new("issuer-host");
        let joiner = TestNode::new("joiner-host");

        let issuer_side = PairingSide::start(
            &issuer,
            joiner.id(),
            Role::Issuer {
                pki: issuer.node.pki().clone(),
            },
        )
        .await;
        let joiner_side = PairingSide::start(&joiner, issuer.id(), Role::Joiner).await;

        Self {
            issuer,
            joiner,
            issuer_side,
            joiner_side,
        }
    }

    pub fn issuer_driver(&self) -> Issuer {
        Issuer::new(
            self.issuer_side.service.clone(),
            self.joiner_side.server.peer_addr(self.joiner.id()),
            self.issuer.node.client_identity().expect("issuer identity"),
            self.issuer.node.pki().clone(),
            test_timeouts(),
        )
    }

    pub fn joiner_driver(&self) -> Joiner {
        Joiner::new(
            self.joiner_side.service.clone(),
            self.issuer_side.server.peer_addr(self.issuer.id()),
            self.joiner.node.client_identity().expect("joiner identity"),
            self.joiner.node.pki().clone(),
            test_timeouts(),
        )
    }

    /// Show a fresh code on the issuer and type `typed` (or the shown code)
    /// into the joiner.
    pub fn arm(&self, typed: Option<Secret>) -> Secret {
        let shown = self.issuer_side.service.regenerate_secret();
        let typed = match typed {
            Some(secret) => secret,
            None => Secret::parse(&shown.encode()).expect("shown code parses"),
        };
        self.joiner_side.service.set_secret(typed);
        shown
    }
}

/// Run both drivers concurrently.
pub async fn run_both(
    issuer: &mut Issuer,
    joiner: &mut Joiner,
) -> (Result<(), PeeringError>, Result<Vec<u8>, PeeringError>) {
    tokio::join!(issuer.run(), joiner.run())
}

/// A code guaranteed to differ from `shown`.
pub fn wrong_secret(shown: &Secret) -> Secret {
    loop {
        let candidate = Secret::generate();
        if candidate != *shown {
            return candidate;
        }
    }
}

/// How long `GET /slow` blocks its thread.
pub const SLOW_HANDLER_DELAY: Duration = Duration::from_secs(2);

/// Plain handler for transport tests.
pub struct TestHandler;

impl Handler for TestHandler {
    fn handle(&self, request: &Request, _conn: &TlsConnectInfo) -> Result<Response, Abort> {
        match (request.path.as_str(), request.method) {
            ("/", Method::Get) => Ok(Response::ok().body("hello")),
            ("/", _) => Err(Abort::MethodNotAllowed),
            ("/echo", Method::Put) => Ok(Response::ok()
                .header("content-type", "application/octet-stream")
                .body(request.body.clone())),
            ("/forbidden", _) => Err(Abort::Forbidden),
            ("/slow", Method::Get) => {
                std::thread::sleep(SLOW_HANDLER_DELAY);
                Ok(Response::ok().body("slow"))
            }
            _ => Ok(Response::not_found()),
        }
    }
}
