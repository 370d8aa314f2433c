//! Authenticated-encryption key/value store for secrets.
//!
//! The on-disk file is the AES-256-GCM ciphertext of a JSON object, with
//! the random 96-bit nonce prepended.  The session key is derived from a
//! master key string via PBKDF2-HMAC-SHA256 (100 000 iterations, fixed
//! project salt).  The master key comes from an environment variable; when
//! absent, a fresh 32-byte key is generated once and persisted to a
//! `.master_key` file with owner-only permissions.
//!
//! Reads of a missing or undecryptable store log an error and yield an
//! empty object, so a corrupted secrets file never takes the controller
//! down.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, OsRng as AeadOsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use serde_json::Value;
use tracing::{error, info};

use mower_types::{ErrorCode, MowerError};

/// Environment variable holding the master key.
pub const MASTER_KEY_ENV: &str = "MOWER_MASTER_KEY";

const SALT: &[u8] = b"autonomous_mower_salt";
const PBKDF2_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const MASTER_KEY_FILE: &str = ".master_key";

pub struct SecureStorage {
    path: PathBuf,
    cipher: Aes256Gcm,
    data: serde_json::Map<String, Value>,
}

impl SecureStorage {
    /// Open the store at `path`, resolving the master key from `env_var`
    /// (falling back to the sibling `.master_key` file, generating one if
    /// neither exists).
    pub fn open(path: impl Into<PathBuf>, env_var: &str) -> Result<Self, MowerError> {
        let path = path.into();
        let master = match std::env::var(env_var) {
            Ok(key) if !key.is_empty() => key,
            _ => Self::master_key_from_file(&path)?,
        };
        Self::with_master_key(path, &master)
    }

    /// Open the store with an explicit master key string.
    pub fn with_master_key(path: impl Into<PathBuf>, master: &str) -> Result<Self, MowerError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| MowerError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }

        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<sha2::Sha256>(master.as_bytes(), SALT, PBKDF2_ITERATIONS, &mut key);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

        let mut storage = Self {
            path,
            cipher,
            data: serde_json::Map::new(),
        };
        storage.load();
        Ok(storage)
    }

    /// Read or bootstrap the sibling `.master_key` file.
    fn master_key_from_file(storage_path: &Path) -> Result<String, MowerError> {
        let key_file = storage_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(MASTER_KEY_FILE);
        if key_file.exists() {
            let raw = std::fs::read_to_string(&key_file).map_err(|e| MowerError::Io {
                path: key_file.display().to_string(),
                source: e,
            })?;
            return Ok(raw.trim().to_string());
        }

        if let Some(parent) = key_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MowerError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let master = BASE64.encode(bytes);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&key_file)
            .map_err(|e| MowerError::Io {
                path: key_file.display().to_string(),
                source: e,
            })?;
        file.write_all(master.as_bytes())
            .map_err(|e| MowerError::Io {
                path: key_file.display().to_string(),
                source: e,
            })?;
        info!(path = %key_file.display(), "generated new master key");
        Ok(master)
    }

    /// Decrypt the store file into memory; any failure leaves the store
    /// empty.
    fn load(&mut self) {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "could not read secure storage");
                return;
            }
        };
        if bytes.len() <= NONCE_LEN {
            error!(path = %self.path.display(), "secure storage file truncated");
            return;
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = match self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext) {
            Ok(plaintext) => plaintext,
            Err(_) => {
                error!(path = %self.path.display(), "secure storage decryption failed");
                return;
            }
        };
        match serde_json::from_slice(&plaintext) {
            Ok(Value::Object(map)) => self.data = map,
            _ => {
                error!(path = %self.path.display(), "secure storage payload is not an object");
            }
        }
    }

    /// Encrypt and persist the in-memory object.
    fn save(&self) -> Result<(), MowerError> {
        let plaintext = serde_json::to_vec(&Value::Object(self.data.clone()))
            .map_err(|e| MowerError::Serialization(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut AeadOsRng);
        let ciphertext = self.cipher.encrypt(&nonce, plaintext.as_slice()).map_err(|_| {
            MowerError::Security {
                code: ErrorCode::EncryptionError,
                message: "secure storage encryption failed".to_string(),
            }
        })?;

        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&self.path)
            .map_err(|e| MowerError::Io {
                path: self.path.display().to_string(),
                source: e,
            })?;
        file.write_all(&payload).map_err(|e| MowerError::Io {
            path: self.path.display().to_string(),
            source: e,
        })
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<(), MowerError> {
        self.data.insert(key.into(), value.into());
        self.save()
    }

    pub fn delete(&mut self, key: &str) -> Result<(), MowerError> {
        if self.data.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), MowerError> {
        self.data.clear();
        self.save()
    }

    /// A copy of every stored entry.
    pub fn get_all(&self) -> serde_json::Map<String, Value> {
        self.data.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn store(dir: &tempfile::TempDir) -> SecureStorage {
        SecureStorage::with_master_key(dir.path().join("secure_storage.enc"), "test-master-key")
            .unwrap()
    }

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = store(&dir);
        storage.set("api_key", "s3cr3t").unwrap();
        assert_eq!(storage.get("api_key"), Some(&Value::from("s3cr3t")));
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut storage = store(&dir);
            storage.set("token", "abc123").unwrap();
            storage.set("retries", 5).unwrap();
        }
        let storage = store(&dir);
        assert_eq!(storage.get("token"), Some(&Value::from("abc123")));
        assert_eq!(storage.get("retries"), Some(&Value::from(5)));
    }

    #[test]
    fn delete_then_get_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = store(&dir);
        storage.set("gone", "soon").unwrap();
        storage.delete("gone").unwrap();
        assert!(storage.get("gone").is_none());

        let reopened = store(&dir);
        assert!(reopened.get("gone").is_none());
    }

    #[test]
    fn wrong_master_key_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure_storage.enc");
        {
            let mut storage = SecureStorage::with_master_key(&path, "right-key").unwrap();
            storage.set("secret", "value").unwrap();
        }
        let storage = SecureStorage::with_master_key(&path, "wrong-key").unwrap();
        assert!(storage.get("secret").is_none());
        assert!(storage.get_all().is_empty());
    }

    #[test]
    fn corrupt_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure_storage.enc");
        std::fs::write(&path, b"garbage bytes, definitely not a ciphertext").unwrap();
        let storage = SecureStorage::with_master_key(&path, "key").unwrap();
        assert!(storage.get_all().is_empty());
    }

    #[test]
    fn file_is_not_plaintext_and_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure_storage.enc");
        let mut storage = SecureStorage::with_master_key(&path, "key").unwrap();
        storage.set("password", "hunter2").unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let haystack = String::from_utf8_lossy(&bytes);
        assert!(!haystack.contains("hunter2"));
        assert!(!haystack.contains("password"));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn clear_empties_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = store(&dir);
        storage.set("a", 1).unwrap();
        storage.set("b", 2).unwrap();
        storage.clear().unwrap();
        assert!(storage.get_all().is_empty());
        let reopened = store(&dir);
        assert!(reopened.get_all().is_empty());
    }

    #[test]
    fn master_key_file_is_bootstrapped_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secure_storage.enc");
        // Unset variable name forces the file path.
        let env_var = "MOWER_TEST_KEY_THAT_IS_NEVER_SET";
        {
            let mut storage = SecureStorage::open(&path, env_var).unwrap();
            storage.set("k", "v").unwrap();
        }
        let key_file = dir.path().join(MASTER_KEY_FILE);
        assert!(key_file.exists());
        let mode = std::fs::metadata(&key_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        // Reopening with the persisted key decrypts the data.
        let storage = SecureStorage::open(&path, env_var).unwrap();
        assert_eq!(storage.get("k"), Some(&Value::from("v")));
    }

    #[test]
    fn nested_json_values_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = store(&dir);
        storage
            .set("credentials", serde_json::json!({"user": "pi", "scopes": ["read", "mow"]}))
            .unwrap();
        let reopened = store(&dir);
        assert_eq!(
            reopened.get("credentials").unwrap()["scopes"][1],
            Value::from("mow")
        );
    }
}
