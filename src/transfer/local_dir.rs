//! Directory-backed transport
//!
//! Deploys to a mounted path: a docroot exposed over NFS/SMB, a
//! container volume, or a plain directory during development. Doubles as
//! the reference implementation of the session capability set.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::inventory::{hash_file, RelPath, RemoteEntry};
use crate::transfer::{
    RemoteListing, Transport, TransportError, TransportErrorKind, TransportSession,
};

/// Transport for directory targets
///
/// Credentials carry a single `root` field: the absolute path of the
/// deployment root. Connect fails when the directory does not exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDirTransport;

impl LocalDirTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalDirTransport {
    fn id(&self) -> &'static str {
        "local_dir"
    }

    fn connect(
        &self,
        credentials: &BTreeMap<String, String>,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let root = credentials.get("root").ok_or_else(|| {
            TransportError::new(
                TransportErrorKind::Auth,
                "missing required credential field 'root'",
            )
        })?;
        let root = PathBuf::from(root);
        if !root.is_dir() {
            return Err(TransportError::new(
                TransportErrorKind::Connection,
                format!("deployment root not found: {}", root.display()),
            ));
        }
        Ok(Box::new(LocalDirSession { root }))
    }
}

struct LocalDirSession {
    root: PathBuf,
}

impl LocalDirSession {
    fn resolve(&self, remote: &RelPath) -> PathBuf {
        remote.to_local(&self.root)
    }

    fn walk(
        &self,
        dir: &Path,
        listing: &mut RemoteListing,
    ) -> Result<(), TransportError> {
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                // Record the unreadable subtree and keep going; the
                // planner excludes it from the deletion scope.
                if let Ok(rel) = dir.strip_prefix(&self.root) {
                    if let Ok(rel) = RelPath::new(rel) {
                        listing.unreadable.push(rel);
                    }
                }
                return Ok(());
            }
            Err(e) => {
                return Err(TransportError::from_io(&e, &format!("list {}", dir.display())))
            }
        };

        for entry in read {
            let entry =
                entry.map_err(|e| TransportError::from_io(&e, &format!("list {}", dir.display())))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|e| TransportError::from_io(&e, &format!("stat {}", path.display())))?;

            if file_type.is_dir() {
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    if let Ok(rel) = RelPath::new(rel) {
                        listing.known_dirs.push(rel);
                    }
                }
                self.walk(&path, listing)?;
            } else if file_type.is_file() {
                let rel = path
                    .strip_prefix(&self.root)
                    .ok()
                    .and_then(|r| RelPath::new(r).ok());
                let rel = match rel {
                    Some(rel) => rel,
                    None => continue,
                };
                let metadata = entry.metadata().map_err(|e| {
                    TransportError::from_io(&e, &format!("stat {}", path.display()))
                })?;
                let modified: Option<DateTime<Utc>> =
                    metadata.modified().ok().map(DateTime::<Utc>::from);
                // Hashing is cheap against a mounted path, so listings
                // always carry it.
                let hash = hash_file(&path).ok();
                listing.entries.push(RemoteEntry {
                    path: rel,
                    size: metadata.len(),
                    modified,
                    hash,
                });
            }
        }
        Ok(())
    }
}

impl TransportSession for LocalDirSession {
    fn list(&self) -> Result<RemoteListing, TransportError> {
        let mut listing = RemoteListing::default();
        self.walk(&self.root.clone(), &mut listing)?;
        listing.entries.sort_by(|a, b| a.path.cmp(&b.path));
        listing.known_dirs.sort();
        listing.unreadable.sort();
        Ok(listing)
    }

    fn put(&self, local: &Path, remote: &RelPath) -> Result<(), TransportError> {
        let target = self.resolve(remote);
        let parent = target.parent().ok_or_else(|| {
            TransportError::new(TransportErrorKind::Other, format!("put {remote}: no parent"))
        })?;

        let data = fs::read(local)
            .map_err(|e| TransportError::from_io(&e, &format!("read {}", local.display())))?;

        // Write-to-temp-then-rename so a crash never leaves a torn file
        // in the docroot.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| TransportError::from_io(&e, &format!("put {remote}")))?;
        tmp.write_all(&data)
            .map_err(|e| TransportError::from_io(&e, &format!("put {remote}")))?;
        tmp.persist(&target)
            .map_err(|e| TransportError::from_io(&e.error, &format!("put {remote}")))?;
        Ok(())
    }

    fn get(&self, remote: &RelPath) -> Result<Vec<u8>, TransportError> {
        fs::read(self.resolve(remote))
            .map_err(|e| TransportError::from_io(&e, &format!("get {remote}")))
    }

    fn delete(&self, remote: &RelPath) -> Result<(), TransportError> {
        fs::remove_file(self.resolve(remote))
            .map_err(|e| TransportError::from_io(&e, &format!("delete {remote}")))
    }

    fn mkdir(&self, remote: &RelPath) -> Result<(), TransportError> {
        let target = self.resolve(remote);
        if target.is_dir() {
            return Err(TransportError::new(
                TransportErrorKind::AlreadyExists,
                format!("mkdir {remote}: already exists"),
            ));
        }
        fs::create_dir(&target)
            .map_err(|e| TransportError::from_io(&e, &format!("mkdir {remote}")))
    }

    fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
