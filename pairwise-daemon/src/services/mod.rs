//! Application services served over the restricted transport.

pub mod pairing;
pub mod peering;
pub mod trusted;

pub use pairing::{InfoDocument, PairingService, Role};
pub use peering::{Issuer, Joiner, PeerClient, PeeringError, PeeringTimeouts};
pub use trusted::{PeerFacts, TrustedPeerService, fetch_peer_facts};
