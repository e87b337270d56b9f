//! Service reachable only with a certificate issued by our CA.
//!
//! Served with `ClientAuth::TrustedCa(<own CA>)`, so by the time a request
//! arrives rustls has already validated the client's chain. `GET /` echoes
//! what the listener verified.

use pairwise_auth::identity::IdentityId;
use serde::{Deserialize, Serialize};

use super::peering::{PeeringError, connect_tls};
use crate::discovery::PeerAddr;
use crate::http::{Abort, Handler, HttpClient, Method, Request, Response};
use crate::tls::{ClientIdentity, TlsConnectInfo};

/// `GET /` body: the facts the listener verified about the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerFacts {
    pub served_by: IdentityId,
    pub peer_id: IdentityId,
    pub subject_cn: Option<String>,
    pub issuer_cn: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrustedPeerService {
    local_id: IdentityId,
}

impl TrustedPeerService {
    pub fn new(local_id: IdentityId) -> Self {
        Self { local_id }
    }
}

impl Handler for TrustedPeerService {
    fn handle(&self, request: &Request, conn: &TlsConnectInfo) -> Result<Response, Abort> {
        if request.path != "/" {
            return Ok(Response::not_found());
        }
        if request.method != Method::Get {
            return Err(Abort::MethodNotAllowed);
        }
        // Issued certificates name us as issuer.
        if conn.issuer_cn.as_deref() != Some(self.local_id.as_str()) {
            return Err(Abort::Forbidden);
        }
        let Some(peer_id) = conn.peer_id.clone() else {
            return Err(Abort::Forbidden);
        };

        tracing::info!(peer = %peer_id, "Trusted peer connected");
        Response::json(&PeerFacts {
            served_by: self.local_id.clone(),
            peer_id,
            subject_cn: conn.subject_cn.clone(),
            issuer_cn: conn.issuer_cn.clone(),
        })
        .map_err(|_| Abort::Internal)
    }
}

/// Call a paired peer's trusted service using the certificate it issued us.
pub async fn fetch_peer_facts(
    peer: &PeerAddr,
    identity: &ClientIdentity,
    handshake_timeout: std::time::Duration,
) -> Result<PeerFacts, PeeringError> {
    let stream = connect_tls(peer, identity, handshake_timeout).await?;
    let mut client = HttpClient::new(stream, peer.id.as_str().to_ascii_lowercase());
    let response = client.get("/").await?;
    if !response.is_success() {
        return Err(PeeringError::Rejected {
            status: response.status,
            reason: response.reason,
        });
    }
    Ok(response.json()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;
    use crate::pki::PkiStore;
    use rustls::pki_types::CertificateDer;

    fn get(path: &str) -> Request {
        Request {
            method: Method::Get,
            path: path.to_string(),
            query: None,
            headers: Headers::default(),
            body: Vec::new(),
        }
    }

    #[test]
    fn test_echoes_issued_cert() {
        let issuer = PkiStore::temporary().unwrap();
        let issuer_id = issuer.create_key().unwrap();
        issuer.create_ca(&issuer_id).unwrap();

        let joiner = PkiStore::temporary().unwrap();
        let joiner_id = joiner.create_key().unwrap();
        joiner.create_csr(&joiner_id).unwrap();
        issuer
            .write_csr(&joiner_id, &joiner.verify_csr(&joiner_id).unwrap())
            .unwrap();
        let cert = issuer.issue_cert(&joiner_id, &issuer_id).unwrap();

        let chain = [CertificateDer::from(cert)];
        let conn = TlsConnectInfo::from_peer_certificates(None, Some(&chain));
        let service = TrustedPeerService::new(issuer_id.clone());

        let response = service.handle(&get("/"), &conn).unwrap();
        let facts: PeerFacts = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(facts.peer_id, joiner_id);
        assert_eq!(facts.served_by, issuer_id);
        assert_eq!(facts.issuer_cn.as_deref(), Some(issuer_id.as_str()));

        assert_eq!(service.handle(&get("/x"), &conn).unwrap().status, 404);
    }

    #[test]
    fn test_anonymous_forbidden() {
        let service = TrustedPeerService::new(pairwise_auth::PrivateKey::generate().public_key().id());
        assert_eq!(
            service
                .handle(&get("/"), &TlsConnectInfo::plain(None))
                .unwrap_err(),
            Abort::Forbidden
        );
    }
}
