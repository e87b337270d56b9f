//! Pairwise daemon library.
//!
//! Everything with side effects lives here: the restricted HTTP/1.1
//! transport, TLS configuration, the on-disk PKI store, and the services
//! that drive a pairing exchange between two devices.

pub mod config;
pub mod discovery;
pub mod http;
pub mod node;
pub mod pki;
pub mod services;
pub mod tls;

pub use config::{ConfigError, NodeConfig};
pub use discovery::{Discovery, PeerAddr, StaticDiscovery};
pub use node::{LocalNode, NodeError};
