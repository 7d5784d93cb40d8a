//! Master key and record sealing
//!
//! Credential records are sealed with AES-256-GCM under a 32-byte master
//! secret. The key is an explicit value owned by the vault - never
//! process-global - so tests can run isolated vaults side by side.
//!
//! Sealed format: `v1:<base64 nonce>:<base64 ciphertext>`. GCM
//! authentication means any torn or tampered record fails cleanly on
//! open; there is no state distinguishable from "absent but garbage".

use std::fs;
use std::path::Path;

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use thiserror::Error;
use tracing::info;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const FORMAT_PREFIX: &str = "v1";

/// Error type for sealing operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    Encrypt(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
    #[error("key file error: {0}")]
    Key(String),
}

/// The vault's 32-byte master secret
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    /// Load the key from `path`, or generate and persist one on first use
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            return Self::load(path);
        }

        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CryptoError::Key(format!("creating {}: {e}", parent.display())))?;
        }
        fs::write(path, B64.encode(bytes))
            .map_err(|e| CryptoError::Key(format!("writing {}: {e}", path.display())))?;
        restrict_permissions(path)?;

        info!(path = %path.display(), "generated new vault master key");
        Ok(Self(bytes))
    }

    fn load(path: &Path) -> Result<Self, CryptoError> {
        let encoded = fs::read_to_string(path)
            .map_err(|e| CryptoError::Key(format!("reading {}: {e}", path.display())))?;
        let bytes = B64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Key(format!("decoding {}: {e}", path.display())))?;
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::Key(format!(
                "key in {} has wrong length: {} (expected {KEY_LEN})",
                path.display(),
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    /// Construct from raw bytes (testing and key injection)
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Encrypt a plaintext payload into the sealed record format
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;

        Ok(format!(
            "{FORMAT_PREFIX}:{}:{}",
            B64.encode(nonce_bytes),
            B64.encode(ciphertext)
        ))
    }

    /// Decrypt a sealed record back to its plaintext payload
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>, CryptoError> {
        let mut parts = sealed.trim().splitn(3, ':');
        let (prefix, nonce_b64, ct_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(p), Some(n), Some(c)) => (p, n, c),
            _ => return Err(CryptoError::Decrypt("malformed record".to_string())),
        };
        if prefix != FORMAT_PREFIX {
            return Err(CryptoError::Decrypt(format!(
                "unknown record format '{prefix}'"
            )));
        }

        let nonce_bytes = B64
            .decode(nonce_b64)
            .map_err(|e| CryptoError::Decrypt(format!("bad nonce encoding: {e}")))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::Decrypt(format!(
                "invalid nonce length: {} (expected {NONCE_LEN})",
                nonce_bytes.len()
            )));
        }
        let ciphertext = B64
            .decode(ct_b64)
            .map_err(|e| CryptoError::Decrypt(format!("bad ciphertext encoding: {e}")))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0));
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt("authentication failed".to_string()))
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material stays out of Debug output.
        f.write_str("MasterKey(..)")
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), CryptoError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| CryptoError::Key(format!("chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), CryptoError> {
    Ok(())
}
