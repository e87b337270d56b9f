//! Peer discovery interface.
//!
//! Discovery is untrusted: it only proposes `(id, address)` pairs. Every id
//! it yields is still checked against the certificate the peer presents and
//! through the PKI store before use.

use std::str::FromStr;

use pairwise_auth::identity::{IdentityError, IdentityId};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("expected ID@HOST:PORT, got {0:?}")]
    MissingSeparator(String),
    #[error("invalid peer id: {0}")]
    BadId(#[from] IdentityError),
    #[error("invalid peer address {0:?}")]
    BadAddr(String),
}

/// A peer proposed by discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub id: IdentityId,
    /// `host:port`, resolved at connect time.
    pub addr: String,
}

impl FromStr for PeerAddr {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, addr) = s
            .split_once('@')
            .ok_or_else(|| DiscoveryError::MissingSeparator(s.to_string()))?;
        let id = IdentityId::parse(id)?;

        let valid = addr
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !valid {
            return Err(DiscoveryError::BadAddr(addr.to_string()));
        }

        Ok(Self {
            id,
            addr: addr.to_string(),
        })
    }
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// Source of candidate peers.
pub trait Discovery: Send {
    /// Announce our own id and listening port.
    fn advertise(&mut self, own_id: &IdentityId, port: u16);

    fn peers(&self) -> Vec<PeerAddr>;

    fn find(&self, id: &IdentityId) -> Option<PeerAddr> {
        self.peers().into_iter().find(|peer| peer.id == *id)
    }
}

/// Fixed peer list, e.g. from the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    peers: Vec<PeerAddr>,
    advertised: Option<(IdentityId, u16)>,
}

impl StaticDiscovery {
    pub fn new(peers: Vec<PeerAddr>) -> Self {
        Self {
            peers,
            advertised: None,
        }
    }

    /// Build from `ID@HOST:PORT` strings.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, DiscoveryError> {
        let peers = specs
            .iter()
            .map(|spec| spec.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(peers))
    }

    /// What we last advertised, if anything.
    pub fn advertised(&self) -> Option<&(IdentityId, u16)> {
        self.advertised.as_ref()
    }
}

impl Discovery for StaticDiscovery {
    fn advertise(&mut self, own_id: &IdentityId, port: u16) {
        // Nobody to tell; the operator relays our id by hand.
        tracing::info!(id = %own_id, port, "Advertising");
        self.advertised = Some((own_id.clone(), port));
    }

    fn peers(&self) -> Vec<PeerAddr> {
        self.peers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairwise_auth::identity::PrivateKey;

    fn id() -> IdentityId {
        PrivateKey::generate().public_key().id()
    }

    #[test]
    fn test_parse_peer_addr() {
        let id = id();
        let peer: PeerAddr = format!("{id}@192.168.1.20:9443").parse().unwrap();
        assert_eq!(peer.id, id);
        assert_eq!(peer.addr, "192.168.1.20:9443");
        assert_eq!(peer.to_string(), format!("{id}@192.168.1.20:9443"));

        let peer: PeerAddr = format!("{id}@[::1]:9443").parse().unwrap();
        assert_eq!(peer.addr, "[::1]:9443");
    }

    #[test]
    fn test_parse_errors() {
        let id = id();
        assert!(matches!(
            "nothing".parse::<PeerAddr>(),
            Err(DiscoveryError::MissingSeparator(_))
        ));
        assert!(matches!(
            "SHORT@host:1".parse::<PeerAddr>(),
            Err(DiscoveryError::BadId(_))
        ));
        assert!(matches!(
            format!("{id}@host").parse::<PeerAddr>(),
            Err(DiscoveryError::BadAddr(_))
        ));
        assert!(matches!(
            format!("{id}@host:99999").parse::<PeerAddr>(),
            Err(DiscoveryError::BadAddr(_))
        ));
    }

    #[test]
    fn test_static_discovery() {
        let a = id();
        let b = id();
        let mut discovery =
            StaticDiscovery::parse(&[format!("{a}@a.local:1"), format!("{b}@b.local:2")]).unwrap();
        discovery.advertise(&a, 9443);

        assert_eq!(discovery.peers().len(), 2);
        assert_eq!(discovery.find(&b).unwrap().addr, "b.local:2");
        assert_eq!(discovery.advertised().map(|(_, port)| *port), Some(9443));
        assert!(discovery.find(&id()).is_none());
    }
}
