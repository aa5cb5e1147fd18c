//! Signing key persistence.
//!
//! One P-256 key pair per capturing identity. The private scalar lives in a
//! hex file readable only by the owner; a separate identity record carries
//! the public half and metadata. Nothing here ever leaves the machine.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use p256::ecdsa::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SECRET_FILE: &str = "signing_key.hex";
const IDENTITY_FILE: &str = "identity.json";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no signing key at {0}")]
    NotFound(PathBuf),
    #[error("a signing key already exists at {0}")]
    AlreadyExists(PathBuf),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("key store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("identity record error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Public metadata about a signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// First 16 hex chars of SHA-256 over the SEC1 public key
    pub key_id: String,
    /// Base64 uncompressed SEC1 point
    pub public_key: String,
    pub created_at: DateTime<Utc>,
    pub host: String,
}

impl KeyInfo {
    fn for_key(verifying_key: &VerifyingKey) -> Self {
        Self {
            key_id: key_id(verifying_key),
            public_key: encode_public_key(verifying_key),
            created_at: Utc::now(),
            host: host_label(),
        }
    }
}

/// A loaded key pair.
#[derive(Clone)]
pub struct SigningIdentity {
    signing_key: SigningKey,
    info: KeyInfo,
}

impl SigningIdentity {
    /// Generate a fresh in-memory identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let info = KeyInfo::for_key(signing_key.verifying_key());
        Self { signing_key, info }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn info(&self) -> &KeyInfo {
        &self.info
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("key_id", &self.info.key_id)
            .finish_non_exhaustive()
    }
}

/// Directory-backed key store.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn secret_path(&self) -> PathBuf {
        self.dir.join(SECRET_FILE)
    }

    fn identity_path(&self) -> PathBuf {
        self.dir.join(IDENTITY_FILE)
    }

    pub fn exists(&self) -> bool {
        self.secret_path().exists()
    }

    /// Create and persist a new key pair. Refuses to replace an existing
    /// key unless `force` is set.
    pub fn generate(&self, force: bool) -> Result<SigningIdentity, KeyError> {
        if self.exists() && !force {
            return Err(KeyError::AlreadyExists(self.secret_path()));
        }
        std::fs::create_dir_all(&self.dir)?;

        let identity = SigningIdentity::generate();
        write_private(&self.secret_path(), &hex::encode(identity.signing_key.to_bytes()))?;
        std::fs::write(self.identity_path(), serde_json::to_string_pretty(&identity.info)?)?;

        tracing::info!(key_id = %identity.info.key_id, "signing key generated");
        Ok(identity)
    }

    pub fn load(&self) -> Result<SigningIdentity, KeyError> {
        let secret_path = self.secret_path();
        if !secret_path.exists() {
            return Err(KeyError::NotFound(secret_path));
        }
        let secret = hex::decode(std::fs::read_to_string(&secret_path)?.trim())
            .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        let signing_key =
            SigningKey::from_slice(&secret).map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        // The identity record is advisory; rebuild it if missing or stale.
        let expected_id = key_id(signing_key.verifying_key());
        let info = match std::fs::read_to_string(self.identity_path()) {
            Ok(content) => match serde_json::from_str::<KeyInfo>(&content) {
                Ok(info) if info.key_id == expected_id => info,
                _ => self.rewrite_identity(&signing_key)?,
            },
            Err(_) => self.rewrite_identity(&signing_key)?,
        };

        Ok(SigningIdentity { signing_key, info })
    }

    pub fn load_or_generate(&self) -> Result<SigningIdentity, KeyError> {
        if self.exists() {
            self.load()
        } else {
            self.generate(false)
        }
    }

    fn rewrite_identity(&self, signing_key: &SigningKey) -> Result<KeyInfo, KeyError> {
        tracing::warn!(path = %self.identity_path().display(), "identity record rebuilt");
        let info = KeyInfo::for_key(signing_key.verifying_key());
        std::fs::write(self.identity_path(), serde_json::to_string_pretty(&info)?)?;
        Ok(info)
    }
}

/// Base64 of the uncompressed SEC1 encoding.
pub fn encode_public_key(key: &VerifyingKey) -> String {
    STANDARD.encode(key.to_encoded_point(false).as_bytes())
}

pub fn decode_public_key(encoded: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| KeyError::InvalidKey(e.to_string()))?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| KeyError::InvalidKey(e.to_string()))
}

pub fn key_id(key: &VerifyingKey) -> String {
    let digest = Sha256::digest(key.to_encoded_point(false).as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn host_label() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(unix)]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // An existing file keeps its old mode on open.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(content.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &str) -> std::io::Result<()> {
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path().join("keys"));
        assert!(matches!(store.load(), Err(KeyError::NotFound(_))));

        let created = store.generate(false).unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(created.info(), loaded.info());
        assert_eq!(created.verifying_key(), loaded.verifying_key());
        assert_eq!(loaded.info().key_id.len(), 16);
    }

    #[test]
    fn test_generate_refuses_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let first = store.generate(false).unwrap();
        assert!(matches!(store.generate(false), Err(KeyError::AlreadyExists(_))));

        let second = store.generate(true).unwrap();
        assert_ne!(first.info().key_id, second.info().key_id);
        assert_eq!(store.load().unwrap().info().key_id, second.info().key_id);
    }

    #[cfg(unix)]
    #[test]
    fn test_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        store.generate(false).unwrap();
        let mode = std::fs::metadata(dir.path().join(SECRET_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_identity_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::new(dir.path());
        let created = store.generate(false).unwrap();
        std::fs::remove_file(dir.path().join(IDENTITY_FILE)).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.info().key_id, created.info().key_id);
        assert!(dir.path().join(IDENTITY_FILE).exists());
    }

    #[test]
    fn test_public_key_encoding() {
        let identity = SigningIdentity::generate();
        let encoded = encode_public_key(identity.verifying_key());
        assert_eq!(STANDARD.decode(&encoded).unwrap().len(), 65);
        assert_eq!(&decode_public_key(&encoded).unwrap(), identity.verifying_key());
        assert!(decode_public_key("not base64!").is_err());
    }
}
