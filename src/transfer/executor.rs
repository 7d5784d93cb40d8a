//! Transfer execution - applies a sync plan over a transport session
//!
//! Order of battle:
//! 1. backup every Overwrite/Delete target (fail-fast: a deployment must
//!    never destroy data it cannot restore)
//! 2. directory creations, sequential, in plan order
//! 3. uploads/overwrites on a bounded worker pool, independent units
//! 4. deletes on the pool, same policy
//!
//! A failed file operation is recorded and the batch continues; only a
//! failed backup or a cancellation stops the run.

use std::path::PathBuf;
use std::time::Duration;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::{CaravelError, CaravelResult};
use crate::plan::SyncOperation;
use crate::transfer::{CancelToken, TransportError, TransportErrorKind, TransportSession};

/// Bounded retry with exponential backoff, applied per operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per operation (1 = no retry)
    pub max_attempts: u32,
    /// Delay before attempt 2; doubles each further attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay_before(&self, next_attempt: u32) -> Duration {
        // next_attempt is 2-based; cap the shift to stay sane
        let exp = next_attempt.saturating_sub(2).min(16);
        self.base_delay * 2u32.pow(exp)
    }
}

/// Options for one execution run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Snapshot mutated paths before touching them
    pub backup: bool,
    /// Where backups are staged; a unique temp directory when unset
    pub backup_dir: Option<PathBuf>,
    /// Worker pool size for independent file operations
    pub concurrency: usize,
    /// Per-operation retry policy
    pub retry: RetryPolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            backup: false,
            backup_dir: None,
            concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Why a file operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Transport,
    Permission,
    Timeout,
    Other,
}

impl From<TransportErrorKind> for FailureReason {
    fn from(kind: TransportErrorKind) -> Self {
        match kind {
            TransportErrorKind::Permission => FailureReason::Permission,
            TransportErrorKind::Timeout => FailureReason::Timeout,
            TransportErrorKind::Auth
            | TransportErrorKind::Connection
            | TransportErrorKind::NotFound
            | TransportErrorKind::AlreadyExists => FailureReason::Transport,
            TransportErrorKind::Other => FailureReason::Other,
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::Transport => "transport",
            FailureReason::Permission => "permission",
            FailureReason::Timeout => "timeout",
            FailureReason::Other => "other",
        };
        f.write_str(s)
    }
}

/// One recorded per-file failure
#[derive(Debug, Clone)]
pub struct FailedOperation {
    pub path: String,
    pub reason: FailureReason,
    pub message: String,
}

/// Where the pre-mutation snapshot went
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReference {
    pub directory: PathBuf,
    pub files: usize,
}

/// Aggregate result of one execution run
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Operations applied successfully (directories included)
    pub applied: usize,
    /// Per-file failures, in plan order
    pub failed: Vec<FailedOperation>,
    /// Backup location, when one was taken
    pub backup: Option<BackupReference>,
    /// Cancellation stopped the run before all operations were dispatched
    pub aborted: bool,
}

enum Outcome {
    Applied,
    Failed(FailedOperation),
    Skipped,
}

fn is_retryable(kind: TransportErrorKind) -> bool {
    matches!(
        kind,
        TransportErrorKind::Timeout | TransportErrorKind::Connection | TransportErrorKind::Other
    )
}

fn with_retry<F>(policy: &RetryPolicy, mut op: F) -> Result<(), TransportError>
where
    F: FnMut() -> Result<(), TransportError>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(e) if is_retryable(e.kind) && attempt < policy.max_attempts => {
                attempt += 1;
                debug!(attempt, error = %e, "retrying transfer operation");
                std::thread::sleep(policy.delay_before(attempt));
            }
            Err(e) => return Err(e),
        }
    }
}

fn stage_backup(
    session: &dyn TransportSession,
    operations: &[SyncOperation],
    options: &ExecuteOptions,
) -> CaravelResult<Option<BackupReference>> {
    let targets: Vec<_> = operations.iter().filter(|op| op.mutates_existing()).collect();
    if targets.is_empty() {
        return Ok(None);
    }

    let directory = match &options.backup_dir {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join(format!(
            "caravel-backup-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis()
        )),
    };
    std::fs::create_dir_all(&directory)?;

    let mut files = 0usize;
    for op in targets {
        let path = op.path();
        match session.get(path) {
            Ok(data) => {
                let staged = path.to_local(&directory);
                if let Some(parent) = staged.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&staged, data)?;
                files += 1;
            }
            // The listing was stale and the file is already gone;
            // nothing to protect.
            Err(e) if e.kind == TransportErrorKind::NotFound => continue,
            Err(e) => {
                return Err(CaravelError::Transfer {
                    message: format!("backup of '{path}' failed: {e}"),
                });
            }
        }
    }

    debug!(files, directory = %directory.display(), "staged remote backup");
    Ok(Some(BackupReference { directory, files }))
}

fn run_parallel<'a, F>(
    operations: Vec<&'a SyncOperation>,
    options: &ExecuteOptions,
    cancel: &CancelToken,
    apply: F,
) -> CaravelResult<Vec<Outcome>>
where
    F: Fn(&SyncOperation) -> Result<(), TransportError> + Send + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.concurrency.max(1))
        .build()
        .map_err(|e| CaravelError::Transfer {
            message: format!("could not start transfer workers: {e}"),
        })?;

    let retry = options.retry;
    let outcomes = pool.install(|| {
        operations
            .into_par_iter()
            .map(|op| {
                if cancel.is_cancelled() {
                    return Outcome::Skipped;
                }
                match with_retry(&retry, || apply(op)) {
                    Ok(()) => Outcome::Applied,
                    Err(e) => {
                        warn!(path = %op.path(), error = %e, "transfer operation failed");
                        Outcome::Failed(FailedOperation {
                            path: op.path().as_str().to_string(),
                            reason: e.kind.into(),
                            message: e.message,
                        })
                    }
                }
            })
            .collect()
    });

    Ok(outcomes)
}

/// Apply an operation list over an authenticated session
pub fn execute(
    session: &dyn TransportSession,
    operations: &[SyncOperation],
    options: &ExecuteOptions,
    cancel: &CancelToken,
) -> CaravelResult<ExecutionReport> {
    let mut report = ExecutionReport::default();

    if cancel.is_cancelled() {
        report.aborted = true;
        return Ok(report);
    }

    if options.backup {
        report.backup = stage_backup(session, operations, options)?;
    }

    // Directories first, sequentially: everything below depends on them.
    for op in operations {
        let path = match op {
            SyncOperation::CreateDirectory { path } => path,
            _ => continue,
        };
        if cancel.is_cancelled() {
            report.aborted = true;
            return Ok(report);
        }
        match session.mkdir(path) {
            Ok(()) => report.applied += 1,
            // Idempotent: an existing directory is success, not failure.
            Err(e) if e.kind == TransportErrorKind::AlreadyExists => report.applied += 1,
            Err(e) => {
                warn!(path = %path, error = %e, "mkdir failed");
                report.failed.push(FailedOperation {
                    path: path.as_str().to_string(),
                    reason: e.kind.into(),
                    message: e.message,
                });
            }
        }
    }

    let uploads: Vec<&SyncOperation> = operations
        .iter()
        .filter(|op| matches!(op, SyncOperation::Upload { .. } | SyncOperation::Overwrite { .. }))
        .collect();
    let outcomes = run_parallel(uploads, options, cancel, |op| {
        let (path, source) = match op {
            SyncOperation::Upload { path, source }
            | SyncOperation::Overwrite { path, source } => (path, source),
            _ => unreachable!("filtered to uploads"),
        };
        session.put(source, path)
    })?;
    fold_outcomes(&mut report, outcomes);

    // Deletes last: never remove anything until replacements landed.
    let deletes: Vec<&SyncOperation> = operations
        .iter()
        .filter(|op| matches!(op, SyncOperation::Delete { .. }))
        .collect();
    let outcomes = run_parallel(deletes, options, cancel, |op| session.delete(op.path()))?;
    fold_outcomes(&mut report, outcomes);

    if cancel.is_cancelled() {
        report.aborted = true;
    }
    Ok(report)
}

fn fold_outcomes(report: &mut ExecutionReport, outcomes: Vec<Outcome>) {
    for outcome in outcomes {
        match outcome {
            Outcome::Applied => report.applied += 1,
            Outcome::Failed(failure) => report.failed.push(failure),
            Outcome::Skipped => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::RelPath;
    use crate::transfer::{MemoryTransport, Transport};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn fast_options() -> ExecuteOptions {
        ExecuteOptions {
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
            ..ExecuteOptions::default()
        }
    }

    fn upload(dir: &Path, name: &str, content: &[u8]) -> SyncOperation {
        let source = dir.join(name.replace('/', "_"));
        std::fs::write(&source, content).unwrap();
        SyncOperation::Upload {
            path: RelPath::new(name).unwrap(),
            source,
        }
    }

    #[test]
    fn applies_uploads_and_dirs() {
        let transport = MemoryTransport::new();
        let session = transport.connect(&BTreeMap::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let ops = vec![
            SyncOperation::CreateDirectory {
                path: RelPath::new("assets").unwrap(),
            },
            upload(dir.path(), "assets/app.js", b"js"),
            upload(dir.path(), "index.html", b"html"),
        ];

        let report =
            execute(session.as_ref(), &ops, &fast_options(), &CancelToken::new()).unwrap();

        assert_eq!(report.applied, 3);
        assert!(report.failed.is_empty());
        assert_eq!(transport.snapshot().len(), 2);
    }

    #[test]
    fn existing_directory_counts_as_applied() {
        let transport = MemoryTransport::new();
        transport.seed_dir("assets");
        let session = transport.connect(&BTreeMap::new()).unwrap();

        let ops = vec![SyncOperation::CreateDirectory {
            path: RelPath::new("assets").unwrap(),
        }];
        let report =
            execute(session.as_ref(), &ops, &fast_options(), &CancelToken::new()).unwrap();

        assert_eq!(report.applied, 1);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn one_failed_upload_does_not_block_the_rest() {
        let transport = MemoryTransport::new();
        transport.fail_put("blocked.txt");
        let session = transport.connect(&BTreeMap::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let ops = vec![
            upload(dir.path(), "a.txt", b"a"),
            upload(dir.path(), "blocked.txt", b"b"),
            upload(dir.path(), "c.txt", b"c"),
        ];

        let report =
            execute(session.as_ref(), &ops, &fast_options(), &CancelToken::new()).unwrap();

        assert_eq!(report.applied, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "blocked.txt");
        assert_eq!(report.failed[0].reason, FailureReason::Permission);
        assert!(transport.snapshot().contains_key("a.txt"));
        assert!(transport.snapshot().contains_key("c.txt"));
    }

    #[test]
    fn failed_backup_aborts_with_zero_applied() {
        let transport = MemoryTransport::new();
        transport.seed_file("old.txt", b"precious", None, true);
        transport.fail_get("old.txt");
        let session = transport.connect(&BTreeMap::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let backup_dir = tempfile::tempdir().unwrap();
        let ops = vec![SyncOperation::Overwrite {
            path: RelPath::new("old.txt").unwrap(),
            source: {
                let p = dir.path().join("old.txt");
                std::fs::write(&p, b"new").unwrap();
                p
            },
        }];
        let options = ExecuteOptions {
            backup: true,
            backup_dir: Some(backup_dir.path().join("stage")),
            ..fast_options()
        };

        let err = execute(session.as_ref(), &ops, &options, &CancelToken::new()).unwrap_err();

        assert!(matches!(err, CaravelError::Transfer { .. }));
        // Remote unchanged: the overwrite never ran.
        assert_eq!(transport.snapshot()["old.txt"], b"precious".to_vec());
    }

    #[test]
    fn backup_stages_overwrite_and_delete_targets() {
        let transport = MemoryTransport::new();
        transport.seed_file("keep/replace.txt", b"v1", None, true);
        transport.seed_file("drop.txt", b"bye", None, true);
        let session = transport.connect(&BTreeMap::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let backup_root = tempfile::tempdir().unwrap();
        let stage = backup_root.path().join("stage");
        let ops = vec![
            SyncOperation::Overwrite {
                path: RelPath::new("keep/replace.txt").unwrap(),
                source: {
                    let p = dir.path().join("replace.txt");
                    std::fs::write(&p, b"v2").unwrap();
                    p
                },
            },
            SyncOperation::Delete {
                path: RelPath::new("drop.txt").unwrap(),
            },
        ];
        let options = ExecuteOptions {
            backup: true,
            backup_dir: Some(stage.clone()),
            ..fast_options()
        };

        let report = execute(session.as_ref(), &ops, &options, &CancelToken::new()).unwrap();

        let backup = report.backup.unwrap();
        assert_eq!(backup.files, 2);
        assert_eq!(
            std::fs::read(stage.join("keep/replace.txt")).unwrap(),
            b"v1"
        );
        assert_eq!(std::fs::read(stage.join("drop.txt")).unwrap(), b"bye");
        assert_eq!(report.applied, 2);
    }

    #[test]
    fn backup_skips_files_already_gone() {
        let transport = MemoryTransport::new();
        // Stale listing: plan wants to delete a file that vanished.
        let session = transport.connect(&BTreeMap::new()).unwrap();

        let ops = vec![SyncOperation::Delete {
            path: RelPath::new("ghost.txt").unwrap(),
        }];
        let backup_root = tempfile::tempdir().unwrap();
        let options = ExecuteOptions {
            backup: true,
            backup_dir: Some(backup_root.path().join("stage")),
            ..fast_options()
        };

        let report = execute(session.as_ref(), &ops, &options, &CancelToken::new()).unwrap();

        assert_eq!(report.backup.unwrap().files, 0);
        // The delete itself fails (NotFound) but was attempted.
        assert_eq!(report.failed.len(), 1);
    }

    #[test]
    fn deletes_run_after_uploads() {
        let transport = MemoryTransport::new();
        transport.seed_file("stale.txt", b"old", None, true);
        let session = transport.connect(&BTreeMap::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let ops = vec![
            SyncOperation::Delete {
                path: RelPath::new("stale.txt").unwrap(),
            },
            upload(dir.path(), "new.txt", b"new"),
        ];

        let report =
            execute(session.as_ref(), &ops, &fast_options(), &CancelToken::new()).unwrap();

        assert_eq!(report.applied, 2);
        let snapshot = transport.snapshot();
        assert!(snapshot.contains_key("new.txt"));
        assert!(!snapshot.contains_key("stale.txt"));
    }

    #[test]
    fn cancelled_before_start_applies_nothing() {
        let transport = MemoryTransport::new();
        let session = transport.connect(&BTreeMap::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ops = vec![upload(dir.path(), "a.txt", b"a")];

        let cancel = CancelToken::new();
        cancel.cancel();

        let report = execute(session.as_ref(), &ops, &fast_options(), &cancel).unwrap();

        assert!(report.aborted);
        assert_eq!(report.applied, 0);
        assert!(transport.snapshot().is_empty());
    }

    #[test]
    fn retry_policy_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_before(2), Duration::from_millis(100));
        assert_eq!(policy.delay_before(3), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(400));
    }

    #[test]
    fn permission_failures_are_not_retried() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };

        let result = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::new(
                TransportErrorKind::Permission,
                "denied",
            ))
        });

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timeouts_are_retried_up_to_the_bound() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };

        let result = with_retry(&policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::new(TransportErrorKind::Timeout, "slow"))
        });

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
