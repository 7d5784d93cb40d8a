//! Credential Vault
//!
//! Encrypted at-rest storage of provider credentials: one sealed record
//! file per provider under `<state_dir>/credentials/`. Store is atomic
//! (temp file + rename) under an exclusive file lock; retrieve is
//! read-only and lock-free. Credential values never appear in logs.

mod crypto;

pub use crypto::{CryptoError, MasterKey};

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CaravelError, CaravelResult};
use crate::transfer::Transport;

const RECORD_EXT: &str = "cred";

/// A stored credential record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// Provider identity (record key)
    pub provider_id: String,
    /// Field name -> secret value
    pub fields: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a credential probe
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub detail: String,
}

/// Plaintext payload sealed into a record file
#[derive(Debug, Serialize, Deserialize)]
struct RecordPayload {
    fields: BTreeMap<String, String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Encrypted credential store
///
/// Owns its master key explicitly; two vaults over different directories
/// are fully independent.
#[derive(Debug)]
pub struct Vault {
    dir: PathBuf,
    key: MasterKey,
}

impl Vault {
    /// Open the vault under a state directory
    ///
    /// The master key lives at `<state_dir>/master.key` and is generated
    /// on first use.
    pub fn open(state_dir: &Path) -> CaravelResult<Self> {
        let key = MasterKey::load_or_generate(&state_dir.join("master.key"))
            .map_err(|e| CaravelError::Io(std::io::Error::other(e.to_string())))?;
        let dir = state_dir.join("credentials");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, key })
    }

    /// Open with an explicit key (testing, external key management)
    pub fn with_key(dir: PathBuf, key: MasterKey) -> CaravelResult<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, key })
    }

    fn record_path(&self, provider_id: &str) -> PathBuf {
        self.dir.join(format!("{provider_id}.{RECORD_EXT}"))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    fn check_provider_id(provider_id: &str) -> CaravelResult<()> {
        let valid = !provider_id.is_empty()
            && provider_id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if valid {
            Ok(())
        } else {
            Err(CaravelError::CredentialField {
                provider: provider_id.to_string(),
                message: "provider id must be lowercase alphanumeric with '-' or '_'".to_string(),
            })
        }
    }

    /// Store (or overwrite) credentials for a provider
    ///
    /// `created_at` survives re-authentication; `updated_at` moves.
    pub fn store(&self, provider_id: &str, fields: &BTreeMap<String, String>) -> CaravelResult<()> {
        Self::check_provider_id(provider_id)?;
        if fields.is_empty() {
            return Err(CaravelError::CredentialField {
                provider: provider_id.to_string(),
                message: "credential fields must not be empty".to_string(),
            });
        }

        let now = Utc::now();
        let created_at = self
            .retrieve(provider_id)
            .map(|r| r.created_at)
            .unwrap_or(now);
        let payload = RecordPayload {
            fields: fields.clone(),
            created_at,
            updated_at: now,
        };
        let plaintext = serde_json::to_vec(&payload)
            .map_err(|e| CaravelError::Io(std::io::Error::other(e.to_string())))?;
        let sealed = self
            .key
            .seal(&plaintext)
            .map_err(|e| CaravelError::Io(std::io::Error::other(e.to_string())))?;

        // Exclusive lock against concurrent writers, then temp+rename so
        // a crash mid-write leaves either the old record or the new one.
        let lock_file = fs::File::create(self.lock_path())?;
        lock_file.lock_exclusive()?;

        let result = (|| -> CaravelResult<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
            tmp.write_all(sealed.as_bytes())?;
            tmp.persist(self.record_path(provider_id))
                .map_err(|e| CaravelError::Io(e.error))?;
            Ok(())
        })();

        let _ = fs2::FileExt::unlock(&lock_file);
        result?;

        info!(provider = provider_id, "stored credentials");
        Ok(())
    }

    /// Decrypt and return the record for a provider
    pub fn retrieve(&self, provider_id: &str) -> CaravelResult<CredentialRecord> {
        Self::check_provider_id(provider_id)?;
        let path = self.record_path(provider_id);
        if !path.exists() {
            return Err(CaravelError::CredentialsNotFound {
                provider: provider_id.to_string(),
            });
        }

        let sealed = fs::read_to_string(&path)?;
        let plaintext =
            self.key
                .open(&sealed)
                .map_err(|e| CaravelError::CredentialDecryption {
                    provider: provider_id.to_string(),
                    message: e.to_string(),
                })?;
        let payload: RecordPayload =
            serde_json::from_slice(&plaintext).map_err(|e| CaravelError::CredentialDecryption {
                provider: provider_id.to_string(),
                message: format!("payload did not parse: {e}"),
            })?;

        Ok(CredentialRecord {
            provider_id: provider_id.to_string(),
            fields: payload.fields,
            created_at: payload.created_at,
            updated_at: payload.updated_at,
        })
    }

    /// Remove a provider's record; false when none existed
    pub fn delete(&self, provider_id: &str) -> CaravelResult<bool> {
        Self::check_provider_id(provider_id)?;
        let path = self.record_path(provider_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        info!(provider = provider_id, "deleted credentials");
        Ok(true)
    }

    /// Providers with stored records, sorted
    pub fn list_providers(&self) -> CaravelResult<Vec<String>> {
        let mut providers = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(RECORD_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    providers.push(stem.to_string());
                }
            }
        }
        providers.sort();
        Ok(providers)
    }

    /// Probe a provider with candidate credentials, without persisting
    ///
    /// Side-effect-free on the vault's own state: connect, close, report.
    pub fn validate(
        &self,
        transport: &dyn Transport,
        fields: &BTreeMap<String, String>,
    ) -> ValidationResult {
        match transport.connect(fields) {
            Ok(session) => {
                let _ = session.close();
                ValidationResult {
                    ok: true,
                    detail: format!("connected via {}", transport.id()),
                }
            }
            Err(e) => ValidationResult {
                ok: false,
                detail: e.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MemoryTransport;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn test_vault(dir: &Path) -> Vault {
        Vault::with_key(dir.join("credentials"), MasterKey::from_bytes([3u8; 32])).unwrap()
    }

    #[test]
    fn store_then_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());

        let creds = fields(&[("host", "ftp.example.com"), ("password", "hunter2")]);
        vault.store("shared_hosting", &creds).unwrap();

        let record = vault.retrieve("shared_hosting").unwrap();
        assert_eq!(record.fields, creds);
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn retrieve_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());
        let err = vault.retrieve("netlify").unwrap_err();
        assert!(matches!(err, CaravelError::CredentialsNotFound { .. }));
    }

    #[test]
    fn restore_overwrites_and_keeps_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());

        vault
            .store("netlify", &fields(&[("token", "first")]))
            .unwrap();
        let first = vault.retrieve("netlify").unwrap();

        vault
            .store("netlify", &fields(&[("token", "second")]))
            .unwrap();
        let second = vault.retrieve("netlify").unwrap();

        assert_eq!(second.fields["token"], "second");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(vault.list_providers().unwrap(), vec!["netlify".to_string()]);
    }

    #[test]
    fn record_file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());

        vault
            .store("hostm", &fields(&[("api_key", "sk-verysecret")]))
            .unwrap();

        let raw =
            fs::read_to_string(dir.path().join("credentials").join("hostm.cred")).unwrap();
        assert!(!raw.contains("sk-verysecret"));
        assert!(raw.starts_with("v1:"));
    }

    #[test]
    fn rotated_key_is_a_decryption_error() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault
            .store("vercel", &fields(&[("token", "t")]))
            .unwrap();

        let rotated = Vault {
            dir: dir.path().join("credentials"),
            key: MasterKey::from_bytes([4u8; 32]),
        };
        let err = rotated.retrieve("vercel").unwrap_err();
        assert!(matches!(err, CaravelError::CredentialDecryption { .. }));
    }

    #[test]
    fn corrupted_record_is_a_decryption_error() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.store("vercel", &fields(&[("token", "t")])).unwrap();

        let path = dir.path().join("credentials").join("vercel.cred");
        fs::write(&path, "v1:not-base64:zzzz").unwrap();

        let err = vault.retrieve("vercel").unwrap_err();
        assert!(matches!(err, CaravelError::CredentialDecryption { .. }));
    }

    #[test]
    fn delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.store("netlify", &fields(&[("token", "t")])).unwrap();

        assert!(vault.delete("netlify").unwrap());
        assert!(!vault.delete("netlify").unwrap());
        assert!(vault.list_providers().unwrap().is_empty());
    }

    #[test]
    fn provider_id_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());

        let err = vault
            .store("../escape", &fields(&[("k", "v")]))
            .unwrap_err();
        assert!(matches!(err, CaravelError::CredentialField { .. }));

        let err = vault.retrieve("Bad Name").unwrap_err();
        assert!(matches!(err, CaravelError::CredentialField { .. }));
    }

    #[test]
    fn empty_fields_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());
        let err = vault.store("netlify", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CaravelError::CredentialField { .. }));
    }

    #[test]
    fn no_stray_temp_files_after_store() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());
        vault.store("netlify", &fields(&[("token", "t")])).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join("credentials"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|n| n != ".lock")
            .collect();
        assert_eq!(names, vec!["netlify.cred".to_string()]);
    }

    #[test]
    fn validate_probes_without_storing() {
        let dir = tempfile::tempdir().unwrap();
        let vault = test_vault(dir.path());
        let transport = MemoryTransport::new();

        let good = vault.validate(&transport, &fields(&[("token", "anything")]));
        assert!(good.ok);

        let bad = vault.validate(&transport, &fields(&[("token", "reject")]));
        assert!(!bad.ok);
        assert!(bad.detail.contains("rejected"));

        assert!(vault.list_providers().unwrap().is_empty());
    }

    #[test]
    fn vault_open_generates_key_and_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Vault::open(dir.path()).unwrap();
        vault.store("netlify", &fields(&[("token", "t")])).unwrap();

        // Reopen: same key file, same plaintext.
        let reopened = Vault::open(dir.path()).unwrap();
        assert_eq!(reopened.retrieve("netlify").unwrap().fields["token"], "t");
    }
}
