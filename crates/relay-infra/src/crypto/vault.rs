//! AES-256-GCM encryption for credential tokens at rest.
//!
//! The 32-byte master key comes from one of:
//! - `RELAY_MASTER_KEY` (base64), for deployments that inject secrets
//! - `{data_dir}/master.key`, generated on first use with owner-only permissions
//!
//! Encrypted format: `base64(nonce (12 bytes) || ciphertext)`
//!
//! SECURITY: Error types never contain plaintext or key material.

use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Environment variable holding a base64-encoded master key.
pub const MASTER_KEY_ENV: &str = "RELAY_MASTER_KEY";

/// Key file name inside the data directory.
const MASTER_KEY_FILE: &str = "master.key";

/// Errors from vault encryption operations.
///
/// Display/Debug output never includes plaintext, key material, or ciphertext.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("invalid ciphertext encoding")]
    InvalidEncoding,

    #[error("invalid master key: {0}")]
    InvalidKey(&'static str),

    #[error("master key file error: {0}")]
    KeyFile(String),
}

/// AES-256-GCM cipher for token material.
///
/// Each encryption call generates a random nonce, so encrypting the same
/// plaintext twice produces different output.
pub struct VaultCrypto {
    cipher: Aes256Gcm,
}

impl VaultCrypto {
    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Create a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, VaultError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| VaultError::InvalidKey("not valid base64"))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VaultError::InvalidKey("expected 32 bytes"))?;
        Ok(Self::new(&key))
    }

    /// Resolve the master key: `RELAY_MASTER_KEY` first, then the key file
    /// in `data_dir` (created with a random key if absent).
    pub fn load_or_create(data_dir: &Path) -> Result<Self, VaultError> {
        if let Ok(encoded) = std::env::var(MASTER_KEY_ENV) {
            tracing::debug!("using master key from {MASTER_KEY_ENV}");
            return Self::from_base64_key(&encoded);
        }

        let path = data_dir.join(MASTER_KEY_FILE);
        match std::fs::read_to_string(&path) {
            Ok(encoded) => Self::from_base64_key(&encoded),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let key = rand_key();
                std::fs::create_dir_all(data_dir).map_err(|e| VaultError::KeyFile(e.to_string()))?;
                write_key_file(&path, &STANDARD.encode(key))?;
                tracing::info!(path = %path.display(), "generated new master key");
                Ok(Self::new(&key))
            }
            Err(e) => Err(VaultError::KeyFile(e.to_string())),
        }
    }

    /// Encrypt raw bytes. Returns `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        if data.len() < NONCE_SIZE {
            return Err(VaultError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)
    }

    /// Encrypt a token into the base64 text stored in SQLite.
    pub fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        Ok(STANDARD.encode(self.encrypt(plaintext.as_bytes())?))
    }

    /// Reverse of [`seal`](Self::seal).
    pub fn open(&self, sealed: &str) -> Result<String, VaultError> {
        let data = STANDARD
            .decode(sealed)
            .map_err(|_| VaultError::InvalidEncoding)?;
        String::from_utf8(self.decrypt(&data)?).map_err(|_| VaultError::DecryptionFailed)
    }
}

/// 32 random bytes from the OS CSPRNG.
fn rand_key() -> [u8; 32] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

#[cfg(unix)]
fn write_key_file(path: &Path, contents: &str) -> Result<(), VaultError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| VaultError::KeyFile(e.to_string()))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| VaultError::KeyFile(e.to_string()))
}

#[cfg(not(unix))]
fn write_key_file(path: &Path, contents: &str) -> Result<(), VaultError> {
    std::fs::write(path, contents).map_err(|e| VaultError::KeyFile(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let crypto = VaultCrypto::new(&test_key());
        let sealed = crypto.seal("ya29.a0AfH6SMBx-access-token").unwrap();
        assert!(!sealed.contains("ya29"));
        assert_eq!(crypto.open(&sealed).unwrap(), "ya29.a0AfH6SMBx-access-token");
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let crypto1 = VaultCrypto::new(&test_key());
        let mut wrong_key = test_key();
        wrong_key[0] = 0xFF;
        let crypto2 = VaultCrypto::new(&wrong_key);

        let sealed = crypto1.seal("secret data").unwrap();
        assert!(matches!(
            crypto2.open(&sealed).unwrap_err(),
            VaultError::DecryptionFailed
        ));
    }

    #[test]
    fn test_random_nonce_produces_different_ciphertexts() {
        let crypto = VaultCrypto::new(&test_key());
        let a = crypto.seal("same plaintext").unwrap();
        let b = crypto.seal("same plaintext").unwrap();
        assert_ne!(a, b);
        assert_eq!(crypto.open(&a).unwrap(), crypto.open(&b).unwrap());
    }

    #[test]
    fn test_ciphertext_too_short() {
        let crypto = VaultCrypto::new(&test_key());
        assert!(matches!(
            crypto.decrypt(&[0u8; 5]).unwrap_err(),
            VaultError::CiphertextTooShort
        ));
        assert!(matches!(
            crypto.open("not base64 !!").unwrap_err(),
            VaultError::InvalidEncoding
        ));
    }

    #[test]
    fn test_from_base64_key_validates_length() {
        assert!(VaultCrypto::from_base64_key(&STANDARD.encode(test_key())).is_ok());
        assert!(matches!(
            VaultCrypto::from_base64_key(&STANDARD.encode([1u8; 16])),
            Err(VaultError::InvalidKey(_))
        ));
        assert!(VaultCrypto::from_base64_key("%%%").is_err());
    }

    #[test]
    fn test_key_file_is_created_once() {
        // Only meaningful when the env override is absent.
        if std::env::var(MASTER_KEY_ENV).is_ok() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let first = VaultCrypto::load_or_create(dir.path()).unwrap();
        assert!(dir.path().join(MASTER_KEY_FILE).exists());

        let sealed = first.seal("token").unwrap();
        let second = VaultCrypto::load_or_create(dir.path()).unwrap();
        assert_eq!(second.open(&sealed).unwrap(), "token");
    }

    #[test]
    fn test_vault_error_never_contains_secrets() {
        let errors = [
            VaultError::EncryptionFailed,
            VaultError::DecryptionFailed,
            VaultError::CiphertextTooShort,
            VaultError::InvalidEncoding,
            VaultError::InvalidKey("expected 32 bytes"),
        ];
        for err in &errors {
            assert!(!err.to_string().contains("sk-super-secret"));
        }
    }
}
