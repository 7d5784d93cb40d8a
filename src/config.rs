//! Engine configuration
//!
//! Resolution order:
//! 1. Explicit config path given by the caller
//! 2. `<state_dir>/config.toml`
//! 3. Built-in defaults
//!
//! The state directory itself comes from `CARAVEL_STATE_DIR` or
//! `~/.caravel`. Unknown keys in a config file are surfaced as warnings
//! rather than errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CaravelError, CaravelResult};
use crate::transfer::RetryPolicy;

/// Transfer tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Worker pool size for independent file operations
    pub concurrency: usize,
    /// Per-operation transport timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per operation (1 = no retry)
    pub retry_attempts: u32,
    /// Backoff before the second attempt, in milliseconds; doubles after
    pub retry_base_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_secs: 30,
            retry_attempts: 3,
            retry_base_ms: 500,
        }
    }
}

impl TransferConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_ms),
        }
    }
}

/// Build subprocess tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Wall-clock timeout in seconds; the process is killed past it
    pub timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { timeout_secs: 600 }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub transfer: TransferConfig,
    pub build: BuildConfig,
}

/// Non-fatal configuration warning (e.g. an unknown key)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub key: String,
    pub file: PathBuf,
}

/// Per-user state directory (`CARAVEL_STATE_DIR` or `~/.caravel`)
pub fn default_state_dir() -> PathBuf {
    if let Ok(path) = std::env::var("CARAVEL_STATE_DIR") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .map(|h| h.join(".caravel"))
        .unwrap_or_else(|| PathBuf::from(".caravel"))
}

/// Load configuration and collect unknown-key warnings
pub fn load_with_warnings(path: &Path) -> CaravelResult<(EngineConfig, Vec<ConfigWarning>)> {
    let content = std::fs::read_to_string(path)?;

    let mut unknown: Vec<String> = Vec::new();
    let deserializer = toml::de::Deserializer::new(&content);
    let config: EngineConfig = serde_ignored::deserialize(deserializer, |p| {
        unknown.push(p.to_string());
    })
    .map_err(|e| CaravelError::Config {
        file: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let warnings = unknown
        .into_iter()
        .map(|key| ConfigWarning {
            key,
            file: path.to_path_buf(),
        })
        .collect();

    Ok((config, warnings))
}

/// Load from the state directory, falling back to defaults
pub fn load_or_default(state_dir: &Path) -> (EngineConfig, Vec<ConfigWarning>) {
    let path = state_dir.join("config.toml");
    if path.exists() {
        match load_with_warnings(&path) {
            Ok(result) => return result,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable config file");
            }
        }
    }
    (EngineConfig::default(), Vec::new())
}
