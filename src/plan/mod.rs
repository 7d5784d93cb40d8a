//! Sync planning - turns inventories into an operation list
//!
//! Stage 1 of every deployment: compare the local build inventory against
//! the remote snapshot and produce the minimal list of operations. No I/O
//! happens here; the Transfer Executor applies the list.
//!
//! Plan output is deterministic: directory creations first, then
//! uploads/overwrites, then deletes, each group sorted by relative path.

use std::collections::BTreeSet;
use std::path::PathBuf;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CaravelError, CaravelResult};
use crate::inventory::{LocalEntry, RelPath, RemoteEntry};
use crate::transfer::RemoteListing;

/// Comparison policy for a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Upload everything, delete everything remote-only (clean redeploy)
    Full,
    /// Upload only files absent remotely; never touch existing entries
    Incremental,
    /// Skip unchanged files by size, mtime and content hash
    #[default]
    Smart,
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            "smart" => Ok(SyncMode::Smart),
            other => Err(format!(
                "unknown sync mode '{other}' (expected full, incremental or smart)"
            )),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Smart => "smart",
        };
        f.write_str(s)
    }
}

/// One unit of work for the Transfer Executor
///
/// Operations are pure data; Upload/Overwrite carry the local source path
/// the executor reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOperation {
    /// Ensure a remote directory exists
    CreateDirectory { path: RelPath },
    /// Send a file that does not exist remotely
    Upload { path: RelPath, source: PathBuf },
    /// Replace an existing remote file
    Overwrite { path: RelPath, source: PathBuf },
    /// Remove a remote file
    Delete { path: RelPath },
}

impl SyncOperation {
    /// The relative path this operation targets
    pub fn path(&self) -> &RelPath {
        match self {
            SyncOperation::CreateDirectory { path }
            | SyncOperation::Upload { path, .. }
            | SyncOperation::Overwrite { path, .. }
            | SyncOperation::Delete { path } => path,
        }
    }

    /// Whether this operation mutates an existing remote path
    pub fn mutates_existing(&self) -> bool {
        matches!(
            self,
            SyncOperation::Overwrite { .. } | SyncOperation::Delete { .. }
        )
    }
}

/// Options controlling plan generation
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Comparison policy
    pub mode: SyncMode,
    /// In Smart mode, delete remote-only entries
    pub clean_destination: bool,
    /// Glob patterns removed from both inventories before comparison
    pub exclusions: Vec<String>,
}

fn build_exclusions(patterns: &[String]) -> CaravelResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CaravelError::ExclusionPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| CaravelError::ExclusionPattern {
        pattern: patterns.join(","),
        message: e.to_string(),
    })
}

/// Smart-mode unchanged test
///
/// A file is unchanged iff sizes match AND the remote either has an mtime
/// at least as new as the local one, or carries the same content hash.
/// Size/mtime is the cheap first filter; the hash is the authoritative
/// tie-breaker for transports with unreliable mtimes.
fn smart_unchanged(local: &LocalEntry, remote: &RemoteEntry) -> bool {
    if remote.size != local.size {
        return false;
    }
    let mtime_fresh = match (remote.modified, local.modified) {
        (Some(r), Some(l)) => r >= l,
        _ => false,
    };
    let hash_match = match &remote.hash {
        Some(h) => *h == local.hash,
        None => false,
    };
    mtime_fresh || hash_match
}

/// Compute the operation list for one deployment
///
/// `local` is the walked build inventory; `listing` is the remote snapshot
/// taken immediately before planning. Entries with invalid paths never get
/// here - `RelPath` construction rejects them at inventory time.
pub fn plan(
    local: &[LocalEntry],
    listing: &RemoteListing,
    options: &PlanOptions,
) -> CaravelResult<Vec<SyncOperation>> {
    let exclusions = build_exclusions(&options.exclusions)?;
    let excluded = |path: &RelPath| exclusions.is_match(path.as_str());

    let local: Vec<&LocalEntry> = local.iter().filter(|e| !excluded(&e.path)).collect();
    let remote: Vec<&RemoteEntry> = listing
        .entries
        .iter()
        .filter(|e| !excluded(&e.path))
        .collect();

    let remote_by_path: std::collections::BTreeMap<&RelPath, &RemoteEntry> =
        remote.iter().map(|e| (&e.path, *e)).collect();
    let local_paths: BTreeSet<&RelPath> = local.iter().map(|e| &e.path).collect();

    let mut uploads: Vec<SyncOperation> = Vec::new();
    let mut deletes: Vec<SyncOperation> = Vec::new();

    for entry in &local {
        let existing = remote_by_path.get(&entry.path).copied();
        match options.mode {
            SyncMode::Full => {
                let op = if existing.is_some() {
                    SyncOperation::Overwrite {
                        path: entry.path.clone(),
                        source: entry.source.clone(),
                    }
                } else {
                    SyncOperation::Upload {
                        path: entry.path.clone(),
                        source: entry.source.clone(),
                    }
                };
                uploads.push(op);
            }
            SyncMode::Incremental => {
                if existing.is_none() {
                    uploads.push(SyncOperation::Upload {
                        path: entry.path.clone(),
                        source: entry.source.clone(),
                    });
                }
            }
            SyncMode::Smart => match existing {
                None => uploads.push(SyncOperation::Upload {
                    path: entry.path.clone(),
                    source: entry.source.clone(),
                }),
                Some(remote_entry) => {
                    if !smart_unchanged(entry, remote_entry) {
                        uploads.push(SyncOperation::Overwrite {
                            path: entry.path.clone(),
                            source: entry.source.clone(),
                        });
                    }
                }
            },
        }
    }

    let delete_remote_only = match options.mode {
        SyncMode::Full => true,
        SyncMode::Incremental => false,
        SyncMode::Smart => options.clean_destination,
    };
    if delete_remote_only {
        for entry in &remote {
            if local_paths.contains(&entry.path) {
                continue;
            }
            // Unreadable subtrees stay out of the deletion scope - the
            // listing may be incomplete there.
            if listing
                .unreadable
                .iter()
                .any(|prefix| entry.path.starts_with(prefix))
            {
                continue;
            }
            deletes.push(SyncOperation::Delete {
                path: entry.path.clone(),
            });
        }
    }

    // Synthesize mkdir for every ancestor of an upload target the remote
    // is not already known to contain.
    let mut known_dirs: BTreeSet<RelPath> = listing.known_dirs.iter().cloned().collect();
    for entry in &listing.entries {
        for ancestor in entry.path.ancestors() {
            known_dirs.insert(ancestor);
        }
    }

    let mut new_dirs: BTreeSet<RelPath> = BTreeSet::new();
    for op in &uploads {
        for ancestor in op.path().ancestors() {
            if !known_dirs.contains(&ancestor) {
                new_dirs.insert(ancestor);
            }
        }
    }

    let mut operations: Vec<SyncOperation> = new_dirs
        .into_iter()
        .map(|path| SyncOperation::CreateDirectory { path })
        .collect();

    uploads.sort_by(|a, b| a.path().cmp(b.path()));
    deletes.sort_by(|a, b| a.path().cmp(b.path()));
    operations.extend(uploads);
    operations.extend(deletes);

    Ok(operations)
}
