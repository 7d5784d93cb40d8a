//! Deployment records
//!
//! One TOML file per deployment attempt under
//! `<state_dir>/deployments/`, retained for troubleshooting lookups.
//! Writes take an exclusive file lock; records are only ever mutated by
//! the orchestrator that created them.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{CaravelError, CaravelResult};

/// Terminal and in-flight states of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    /// Orchestration is still running
    InProgress,
    /// Every planned operation applied
    Succeeded,
    /// Reached Reported with some failed operations
    PartialFailure,
    /// Terminal failure before Reported
    Failed,
}

impl DeployStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeployStatus::InProgress)
    }
}

/// Durable summary of one deployment attempt
///
/// Counters obey `operations_applied + operations_failed <=
/// operations_planned`; equality only holds at a terminal status.
/// Credential material never lands here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Opaque identifier, also the file stem
    pub id: String,
    /// Target identity (provider id)
    pub target_id: String,
    pub framework_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub operations_planned: usize,
    pub operations_applied: usize,
    pub operations_failed: usize,
    /// Backup staging directory, when a backup was taken
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_reference: Option<String>,
    pub final_status: DeployStatus,
    /// Human-readable cause plus error kind for failed attempts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<String>,
    /// Public URL, when derivable from the deploy options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
}

static RECORD_COUNTER: AtomicU32 = AtomicU32::new(0);

impl DeploymentRecord {
    /// Open a fresh in-progress record
    pub fn start(target_id: &str, framework_id: &str) -> Self {
        let started_at = Utc::now();
        let seq = RECORD_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!(
            "dep-{}-{}-{seq:04x}",
            started_at.format("%Y%m%d%H%M%S"),
            std::process::id()
        );
        Self {
            id,
            target_id: target_id.to_string(),
            framework_id: framework_id.to_string(),
            started_at,
            finished_at: None,
            operations_planned: 0,
            operations_applied: 0,
            operations_failed: 0,
            backup_reference: None,
            final_status: DeployStatus::InProgress,
            failure_detail: None,
            site_url: None,
        }
    }

    /// Close the record with a terminal status
    pub fn finish(&mut self, status: DeployStatus, failure_detail: Option<String>) {
        debug_assert!(status.is_terminal());
        self.final_status = status;
        self.failure_detail = failure_detail;
        self.finished_at = Some(Utc::now());
    }
}

/// TOML-backed record store
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn open(state_dir: &std::path::Path) -> CaravelResult<Self> {
        let dir = state_dir.join("deployments");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.toml"))
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    /// Persist a record, overwriting any prior snapshot of the same id
    pub fn save(&self, record: &DeploymentRecord) -> CaravelResult<()> {
        let content = toml::to_string_pretty(record).map_err(|e| CaravelError::RecordCorrupted {
            path: self.record_path(&record.id),
            message: e.to_string(),
        })?;

        let lock_file = fs::File::create(self.lock_path())?;
        lock_file.lock_exclusive()?;
        let result = fs::write(self.record_path(&record.id), content).map_err(CaravelError::Io);
        let _ = fs2::FileExt::unlock(&lock_file);
        result
    }

    /// Load a record by id
    pub fn load(&self, id: &str) -> CaravelResult<DeploymentRecord> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(CaravelError::RecordNotFound { id: id.to_string() });
        }
        let content = fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| CaravelError::RecordCorrupted {
            path,
            message: e.to_string(),
        })
    }

    /// All records, newest first
    pub fn list(&self) -> CaravelResult<Vec<DeploymentRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            // Skip records a newer caravel wrote rather than failing the
            // whole listing.
            if let Ok(record) = toml::from_str::<DeploymentRecord>(&content) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(records)
    }
}
