//! TLS configuration for listeners and peer connections.
//!
//! Both directions pin TLS 1.3. Before pairing, peers authenticate each
//! other by identity id alone; after pairing the listener validates the
//! issued certificate against its own CA.

mod client;
mod connect_info;
mod server;
mod verifier;

pub use client::{ClientIdentity, build_client_config, server_name};
pub use connect_info::TlsConnectInfo;
pub use server::{ClientAuth, TlsConfigError, TlsServerConfig};
pub use verifier::{PinnedClientVerifier, PinnedServerVerifier};
