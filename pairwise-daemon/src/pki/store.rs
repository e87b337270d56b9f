//! Durable, self-verifying key material store.
//!
//! Files are named `<id>.<kind>` and hold DER (keys are PKCS#8). Nothing is
//! ever trusted by filename: every read re-derives the public key hash (and
//! for certificates the subject, issuer and chain) from content before the
//! bytes are handed out. New artifacts go through a temporary file in
//! `.tmp/`, are verified as written, and only then renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pairwise_auth::identity::{IdentityId, hash_pubkey};
use tempfile::{NamedTempFile, TempDir};

use super::backend::{RcgenBackend, X509Backend};
use super::PkiError;

const TMP_DIR: &str = ".tmp";

/// The kinds of artifact kept per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Key,
    Ca,
    Csr,
    Cert,
}

impl Kind {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Kind::Key => "key",
            Kind::Ca => "ca",
            Kind::Csr => "csr",
            Kind::Cert => "cert",
        }
    }
}

pub struct PkiStore {
    dir: PathBuf,
    tmp_dir: PathBuf,
    backend: Arc<dyn X509Backend>,
    _temp: Option<TempDir>,
}

impl std::fmt::Debug for PkiStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkiStore").field("dir", &self.dir).finish()
    }
}

fn rendered(name: String) -> String {
    if name.is_empty() {
        "<empty>".to_string()
    } else {
        name
    }
}

impl PkiStore {
    /// Open (creating if needed) a store at `dir` with the default backend.
    ///
    /// # Errors
    ///
    /// Returns `PkiError::Io` if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PkiError> {
        Self::with_backend(dir, Arc::new(RcgenBackend::default()))
    }

    /// Open a store with a specific X.509 backend.
    ///
    /// # Errors
    ///
    /// Returns `PkiError::Io` if the directory cannot be created.
    pub fn with_backend(
        dir: impl Into<PathBuf>,
        backend: Arc<dyn X509Backend>,
    ) -> Result<Self, PkiError> {
        let dir = dir.into();
        let tmp_dir = dir.join(TMP_DIR);
        std::fs::create_dir_all(&tmp_dir)?;
        restrict_dir(&dir)?;
        Ok(Self {
            dir,
            tmp_dir,
            backend,
            _temp: None,
        })
    }

    /// An ephemeral store, deleted as a whole when dropped.
    ///
    /// # Errors
    ///
    /// Returns `PkiError::Io` if the temporary directory cannot be created.
    pub fn temporary() -> Result<Self, PkiError> {
        let temp = tempfile::Builder::new().prefix("pairwise-pki-").tempdir()?;
        let mut store = Self::open(temp.path())?;
        store._temp = Some(temp);
        Ok(store)
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path(&self, kind: Kind, id: &IdentityId) -> PathBuf {
        self.dir.join(filename(kind, id))
    }

    #[must_use]
    pub fn exists(&self, kind: Kind, id: &IdentityId) -> bool {
        self.path(kind, id).is_file()
    }

    fn read(&self, kind: Kind, id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        std::fs::read(self.path(kind, id)).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PkiError::NotFound {
                filename: filename(kind, id),
            },
            _ => PkiError::Io(e),
        })
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Generate a key pair and store it under the id derived from its
    /// public key.
    ///
    /// # Errors
    ///
    /// Returns `PkiError::Backend` or `PkiError::Io`.
    pub fn create_key(&self) -> Result<IdentityId, PkiError> {
        let key = self.backend.generate_key()?;
        let id = hash_pubkey(&self.backend.public_key_of_key(&key)?);
        self.persist(Kind::Key, &id, &key, |bytes, name| {
            self.check_key(&id, bytes, name)
        })?;
        tracing::info!(id = %id, "Created key");
        Ok(id)
    }

    /// Self-sign a CA certificate with subject `CN=<id>`.
    ///
    /// # Errors
    ///
    /// Fails if the key for `id` does not verify or the CA already exists.
    pub fn create_ca(&self, id: &IdentityId) -> Result<(), PkiError> {
        let key = self.verify_key(id)?;
        let cert = self.backend.self_sign(&key, id.as_str())?;
        self.persist(Kind::Ca, id, &cert, |bytes, name| {
            self.check_ca(id, bytes, name)
        })?;
        tracing::info!(id = %id, "Created CA");
        Ok(())
    }

    /// Build a signing request with subject `CN=<id>`.
    ///
    /// # Errors
    ///
    /// Fails if the key for `id` does not verify or the CSR already exists.
    pub fn create_csr(&self, id: &IdentityId) -> Result<(), PkiError> {
        let key = self.verify_key(id)?;
        let csr = self.backend.build_csr(&key, id.as_str())?;
        self.persist(Kind::Csr, id, &csr, |bytes, name| {
            self.check_csr(id, bytes, name)
        })?;
        tracing::info!(id = %id, "Created CSR");
        Ok(())
    }

    /// Issue a certificate for `id`'s stored CSR, signed by `ca_id`'s CA.
    ///
    /// Returns the certificate bytes as stored.
    ///
    /// # Errors
    ///
    /// Fails if the CSR, CA or CA key do not verify, if the issued
    /// certificate does not pass [`Self::verify_cert`], or if it exists.
    pub fn issue_cert(&self, id: &IdentityId, ca_id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        let csr = self.verify_csr(id)?;
        let ca = self.verify_ca(ca_id)?;
        let ca_key = self.verify_key(ca_id)?;
        let cert = self.backend.sign_csr(&csr, &ca, &ca_key)?;
        self.persist(Kind::Cert, id, &cert, |bytes, name| {
            self.check_cert(id, ca_id, bytes, name)
        })?;
        tracing::info!(id = %id, ca = %ca_id, "Issued certificate");
        Ok(cert)
    }

    // ------------------------------------------------------------------
    // Foreign material
    // ------------------------------------------------------------------

    /// Accept a peer's CA certificate.
    ///
    /// # Errors
    ///
    /// Any verification failure leaves the store unchanged.
    pub fn write_ca(&self, id: &IdentityId, bytes: &[u8]) -> Result<(), PkiError> {
        self.persist(Kind::Ca, id, bytes, |written, name| {
            self.check_ca(id, written, name)
        })
    }

    /// Accept a peer's signing request.
    ///
    /// # Errors
    ///
    /// Any verification failure leaves the store unchanged.
    pub fn write_csr(&self, id: &IdentityId, bytes: &[u8]) -> Result<(), PkiError> {
        self.persist(Kind::Csr, id, bytes, |written, name| {
            self.check_csr(id, written, name)
        })
    }

    /// Accept a certificate for `id` issued by `ca_id`, after the full
    /// [`Self::verify_cert`] check.
    ///
    /// # Errors
    ///
    /// Any verification failure leaves the store unchanged.
    pub fn write_cert(
        &self,
        id: &IdentityId,
        ca_id: &IdentityId,
        bytes: &[u8],
    ) -> Result<(), PkiError> {
        self.persist(Kind::Cert, id, bytes, |written, name| {
            self.check_cert(id, ca_id, written, name)
        })
    }

    fn persist<F>(&self, kind: Kind, id: &IdentityId, bytes: &[u8], check: F) -> Result<(), PkiError>
    where
        F: FnOnce(&[u8], &str) -> Result<(), PkiError>,
    {
        let name = filename(kind, id);
        let target = self.dir.join(&name);
        if target.exists() {
            return Err(PkiError::AlreadyExists { filename: name });
        }

        // NamedTempFile is created 0600 and removed on drop, so every early
        // return below leaves the store as it was.
        let mut tmp = NamedTempFile::new_in(&self.tmp_dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;

        let written = std::fs::read(tmp.path())?;
        check(&written, &name)?;

        if kind != Kind::Key {
            make_public(tmp.path())?;
        }
        tmp.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                PkiError::AlreadyExists {
                    filename: name.clone(),
                }
            } else {
                PkiError::Io(e.error)
            }
        })?;
        tracing::debug!(file = %name, "Stored artifact");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Verification
    // ------------------------------------------------------------------

    /// Read `<id>.key` and check its public key hashes to `id`.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `PublicKey` on a hash mismatch.
    pub fn verify_key(&self, id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        let bytes = self.read(Kind::Key, id)?;
        self.check_key(id, &bytes, &filename(Kind::Key, id))?;
        Ok(bytes)
    }

    /// Read `<id>.ca` and check hash, subject, issuer and self-signature.
    ///
    /// # Errors
    ///
    /// `PublicKey` is reported before any signature check runs.
    pub fn verify_ca(&self, id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        let bytes = self.read(Kind::Ca, id)?;
        self.check_ca(id, &bytes, &filename(Kind::Ca, id))?;
        Ok(bytes)
    }

    /// Read `<id>.csr` and check hash, subject and self-signature.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PublicKey`, `Subject` or `Verification`.
    pub fn verify_csr(&self, id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        let bytes = self.read(Kind::Csr, id)?;
        self.check_csr(id, &bytes, &filename(Kind::Csr, id))?;
        Ok(bytes)
    }

    /// Full check of `<cert_id>.cert` against `<ca_id>.ca`.
    ///
    /// The public key must hash to `cert_id`, the subject must be
    /// `CN=<cert_id>`, the issuer `CN=<ca_id>`, and the certificate must
    /// chain-validate against the (itself verified) CA. Each failure has its
    /// own error kind.
    ///
    /// # Errors
    ///
    /// `PublicKey`, `Subject`, `Issuer` or `Verification`.
    pub fn verify_cert(&self, cert_id: &IdentityId, ca_id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        let bytes = self.read(Kind::Cert, cert_id)?;
        self.check_cert(cert_id, ca_id, &bytes, &filename(Kind::Cert, cert_id))?;
        Ok(bytes)
    }

    /// Verified key bytes. Same as [`Self::verify_key`].
    ///
    /// # Errors
    ///
    /// See [`Self::verify_key`].
    pub fn read_key(&self, id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        self.verify_key(id)
    }

    /// Verified CA bytes. Same as [`Self::verify_ca`].
    ///
    /// # Errors
    ///
    /// See [`Self::verify_ca`].
    pub fn read_ca(&self, id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        self.verify_ca(id)
    }

    /// Verified CSR bytes. Same as [`Self::verify_csr`].
    ///
    /// # Errors
    ///
    /// See [`Self::verify_csr`].
    pub fn read_csr(&self, id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        self.verify_csr(id)
    }

    /// Verified certificate bytes. Same as [`Self::verify_cert`].
    ///
    /// # Errors
    ///
    /// See [`Self::verify_cert`].
    pub fn read_cert(&self, id: &IdentityId, ca_id: &IdentityId) -> Result<Vec<u8>, PkiError> {
        self.verify_cert(id, ca_id)
    }

    fn check_hash(id: &IdentityId, public_key: &[u8], name: &str) -> Result<(), PkiError> {
        let got = hash_pubkey(public_key);
        if got != *id {
            return Err(PkiError::PublicKey {
                filename: name.to_string(),
                expected: id.to_string(),
                got: got.to_string(),
            });
        }
        Ok(())
    }

    /// `cn` is only set when the whole name is a single `CN=` attribute.
    fn check_subject(
        id: &IdentityId,
        cn: Option<String>,
        subject: String,
        name: &str,
    ) -> Result<(), PkiError> {
        if cn.as_deref() != Some(id.as_str()) {
            return Err(PkiError::Subject {
                filename: name.to_string(),
                expected: id.to_string(),
                got: rendered(subject),
            });
        }
        Ok(())
    }

    fn check_issuer(
        ca_id: &IdentityId,
        cn: Option<String>,
        issuer: String,
        name: &str,
    ) -> Result<(), PkiError> {
        if cn.as_deref() != Some(ca_id.as_str()) {
            return Err(PkiError::Issuer {
                filename: name.to_string(),
                expected: ca_id.to_string(),
                got: rendered(issuer),
            });
        }
        Ok(())
    }

    fn check_key(&self, id: &IdentityId, bytes: &[u8], name: &str) -> Result<(), PkiError> {
        let public_key = self
            .backend
            .public_key_of_key(bytes)
            .map_err(|e| verification(name, e))?;
        Self::check_hash(id, &public_key, name)
    }

    fn check_ca(&self, id: &IdentityId, bytes: &[u8], name: &str) -> Result<(), PkiError> {
        let facts = self
            .backend
            .inspect_cert(bytes)
            .map_err(|e| verification(name, e))?;
        Self::check_hash(id, &facts.public_key, name)?;
        Self::check_subject(id, facts.subject_cn, facts.subject, name)?;
        Self::check_issuer(id, facts.issuer_cn, facts.issuer, name)?;
        self.backend
            .validate_self_signed(bytes)
            .map_err(|e| verification(name, e))
    }

    fn check_csr(&self, id: &IdentityId, bytes: &[u8], name: &str) -> Result<(), PkiError> {
        let facts = self
            .backend
            .inspect_csr(bytes)
            .map_err(|e| verification(name, e))?;
        Self::check_hash(id, &facts.public_key, name)?;
        Self::check_subject(id, facts.subject_cn, facts.subject, name)
    }

    fn check_cert(
        &self,
        id: &IdentityId,
        ca_id: &IdentityId,
        bytes: &[u8],
        name: &str,
    ) -> Result<(), PkiError> {
        let facts = self
            .backend
            .inspect_cert(bytes)
            .map_err(|e| verification(name, e))?;
        Self::check_hash(id, &facts.public_key, name)?;
        Self::check_subject(id, facts.subject_cn, facts.subject, name)?;
        Self::check_issuer(ca_id, facts.issuer_cn, facts.issuer, name)?;

        let ca = self.verify_ca(ca_id)?;
        self.backend
            .validate_chain(bytes, &ca)
            .map_err(|e| verification(name, e))
    }
}

fn filename(kind: Kind, id: &IdentityId) -> String {
    format!("{}.{}", id, kind.extension())
}

fn verification(name: &str, err: impl std::fmt::Display) -> PkiError {
    PkiError::Verification {
        filename: name.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn make_public(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn make_public(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
