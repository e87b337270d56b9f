//! This device's identity and the TLS material derived from it.

use std::path::Path;
use std::sync::Arc;

use pairwise_auth::identity::{IdentityError, IdentityId};
use zeroize::Zeroizing;

use crate::pki::{Kind, PkiError, PkiStore};
use crate::services::InfoDocument;
use crate::tls::{ClientAuth, ClientIdentity, TlsConfigError, TlsServerConfig};

/// File under the data directory holding our id.
const NODE_ID_FILE: &str = "node_id";

/// Subdirectory of the data directory holding the key store.
const PKI_DIR: &str = "pki";

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Pki(#[from] PkiError),
    #[error(transparent)]
    Tls(#[from] TlsConfigError),
    #[error("corrupt node id: {0}")]
    Identity(#[from] IdentityError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct LocalNode {
    id: IdentityId,
    pki: Arc<PkiStore>,
    host: String,
    user: String,
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("id", &self.id)
            .field("pki", &self.pki)
            .finish_non_exhaustive()
    }
}

impl LocalNode {
    /// Fresh identity in `pki`: a new key and its self-signed CA.
    pub fn init(pki: Arc<PkiStore>, host: String, user: String) -> Result<Self, NodeError> {
        let id = pki.create_key()?;
        pki.create_ca(&id)?;
        tracing::info!(id = %id, "Created node identity");
        Ok(Self {
            id,
            pki,
            host,
            user,
        })
    }

    /// Open the node stored under `data_dir`, creating it on first run.
    ///
    /// The stored key and CA are re-verified against the recorded id.
    pub fn load_or_init(data_dir: &Path, host: String, user: String) -> Result<Self, NodeError> {
        let pki = Arc::new(PkiStore::open(data_dir.join(PKI_DIR))?);
        let id_path = data_dir.join(NODE_ID_FILE);

        match std::fs::read_to_string(&id_path) {
            Ok(content) => {
                let id = IdentityId::parse(content.trim())?;
                pki.verify_key(&id)?;
                if !pki.exists(Kind::Ca, &id) {
                    pki.create_ca(&id)?;
                }
                pki.verify_ca(&id)?;
                tracing::debug!(id = %id, "Loaded node identity");
                Ok(Self {
                    id,
                    pki,
                    host,
                    user,
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let node = Self::init(pki, host, user)?;
                std::fs::write(&id_path, format!("{}\n", node.id))?;
                Ok(node)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn id(&self) -> &IdentityId {
        &self.id
    }

    pub fn pki(&self) -> &Arc<PkiStore> {
        &self.pki
    }

    pub fn info(&self) -> InfoDocument {
        InfoDocument {
            id: self.id.clone(),
            host: self.host.clone(),
            user: self.user.clone(),
        }
    }

    fn key(&self) -> Result<Zeroizing<Vec<u8>>, NodeError> {
        Ok(Zeroizing::new(self.pki.verify_key(&self.id)?))
    }

    /// Our self-signed CA and key, as presented while pairing.
    pub fn client_identity(&self) -> Result<ClientIdentity, NodeError> {
        let ca = self.pki.verify_ca(&self.id)?;
        Ok(ClientIdentity::from_der(ca, self.key()?)?)
    }

    /// The certificate `issuer` issued us, as presented after pairing.
    pub fn trusted_identity(&self, issuer: &IdentityId) -> Result<ClientIdentity, NodeError> {
        let cert = self.pki.verify_cert(&self.id, issuer)?;
        Ok(ClientIdentity::from_der(cert, self.key()?)?)
    }

    /// Listener config presenting our CA.
    pub fn server_tls(&self, client_auth: &ClientAuth) -> Result<TlsServerConfig, NodeError> {
        let ca = self.pki.verify_ca(&self.id)?;
        let key = self.key()?;
        Ok(TlsServerConfig::new(ca, &key, client_auth)?)
    }

    /// Listener config accepting certificates we issued.
    pub fn trusted_server_tls(&self) -> Result<TlsServerConfig, NodeError> {
        let own_ca = self.pki.path(Kind::Ca, &self.id);
        self.server_tls(&ClientAuth::TrustedCa(own_ca))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_or_init_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let first = LocalNode::load_or_init(dir.path(), "h".into(), "u".into()).unwrap();
        let second = LocalNode::load_or_init(dir.path(), "h".into(), "u".into()).unwrap();
        assert_eq!(first.id(), second.id());
        assert!(second.pki().exists(Kind::Ca, second.id()));
    }

    #[test]
    fn test_corrupt_id_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(NODE_ID_FILE), "garbage").unwrap();
        assert!(matches!(
            LocalNode::load_or_init(dir.path(), "h".into(), "u".into()),
            Err(NodeError::Identity(_))
        ));
    }

    #[test]
    fn test_id_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let other = pairwise_auth::PrivateKey::generate().public_key().id();
        std::fs::write(dir.path().join(NODE_ID_FILE), other.as_str()).unwrap();
        assert!(matches!(
            LocalNode::load_or_init(dir.path(), "h".into(), "u".into()),
            Err(NodeError::Pki(PkiError::NotFound { .. }))
        ));
    }

    #[test]
    fn test_tls_material() {
        let pki = Arc::new(PkiStore::temporary().unwrap());
        let node = LocalNode::init(pki, "h".into(), "u".into()).unwrap();

        let identity = node.client_identity().unwrap();
        assert_eq!(&identity.id, node.id());
        assert!(node.server_tls(&ClientAuth::None).is_ok());
        assert!(node.trusted_server_tls().is_ok());
        assert_eq!(node.info().id, *node.id());
    }
}
