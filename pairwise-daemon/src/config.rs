//! Node configuration.
//!
//! Read from a TOML file named by `--config` or `$PAIRWISE_CONFIG`. Every
//! field has a default, so a missing file means all defaults.
//!
//! ```toml
//! data_dir = "/var/lib/pairwise"
//! listen = "0.0.0.0:9443"
//! io_timeout_secs = 30
//! handshake_timeout_secs = 10
//! pairing_timeout_secs = 300
//! serve_mode = "per_connection"
//! host = "laptop"
//! user = "alice"
//! peers = ["UDL2AKAMQ7HW3TCTKV2MGLJD2RZVHA2HRMYCMRFWFQKH2OKV@10.0.0.7:9443"]
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::{DiscoveryError, StaticDiscovery};
use crate::http::{ServeMode, ServerOptions};
use crate::services::PeeringTimeouts;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PAIRWISE_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no data directory available; set data_dir in the config file")]
    NoDataDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Root for the key store and node id. Defaults to
    /// `<data_local_dir>/pairwise`.
    pub data_dir: Option<PathBuf>,
    pub listen: SocketAddr,
    pub io_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub pairing_timeout_secs: u64,
    pub serve_mode: ServeMode,
    /// Shown to the peer in the identity document.
    pub host: String,
    pub user: String,
    /// Known peers as `ID@HOST:PORT`, so commands can name a peer by id.
    pub peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            listen: SocketAddr::from(([0, 0, 0, 0], 9443)),
            io_timeout_secs: 30,
            handshake_timeout_secs: 10,
            pairing_timeout_secs: 300,
            serve_mode: ServeMode::PerConnection,
            host: env_or("HOSTNAME", "localhost"),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            peers: Vec::new(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl NodeConfig {
    /// Load from `path`, else `$PAIRWISE_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(CONFIG_ENV) {
                Some(path) => PathBuf::from(path),
                None => return Ok(Self::default()),
            },
        };
        Self::from_file(&path)
    }

    /// A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_local_dir()
                .map(|dir| dir.join("pairwise"))
                .ok_or(ConfigError::NoDataDir),
        }
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            mode: self.serve_mode,
            io_timeout: Duration::from_secs(self.io_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ..ServerOptions::default()
        }
    }

    pub fn discovery(&self) -> Result<StaticDiscovery, DiscoveryError> {
        StaticDiscovery::parse(&self.peers)
    }

    pub fn peering_timeouts(&self) -> PeeringTimeouts {
        PeeringTimeouts {
            handshake: Duration::from_secs(self.handshake_timeout_secs),
            pairing: Duration::from_secs(self.pairing_timeout_secs),
        }
    }
}
