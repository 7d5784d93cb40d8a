//! In-memory transport
//!
//! Backs sessions with a shared map instead of a network endpoint. Used
//! by the test suites and handy for dry-run experiments; failure
//! injection covers the executor's partial-failure and backup paths.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::inventory::{hash_bytes, RelPath, RemoteEntry};
use crate::transfer::{
    RemoteListing, Transport, TransportError, TransportErrorKind, TransportSession,
};

#[derive(Debug, Clone)]
struct MemoryFile {
    data: Vec<u8>,
    modified: Option<DateTime<Utc>>,
    /// Whether list() reports a content hash for this file
    expose_hash: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<String, MemoryFile>,
    dirs: BTreeSet<String>,
    unreadable: BTreeSet<String>,
    fail_put: BTreeSet<String>,
    fail_get: BTreeSet<String>,
    fail_delete: BTreeSet<String>,
}

/// Transport over a shared in-memory tree
///
/// Cloning shares the underlying state, so a test can keep a handle for
/// seeding and assertions while the engine drives its own session.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a remote file; `expose_hash` controls whether listings carry it
    pub fn seed_file(
        &self,
        path: &str,
        data: &[u8],
        modified: Option<DateTime<Utc>>,
        expose_hash: bool,
    ) {
        let mut state = self.state.lock().unwrap();
        let rel = RelPath::new(path).expect("seed path must be relative");
        for ancestor in rel.ancestors() {
            state.dirs.insert(ancestor.as_str().to_string());
        }
        state.files.insert(
            rel.as_str().to_string(),
            MemoryFile {
                data: data.to_vec(),
                modified,
                expose_hash,
            },
        );
    }

    /// Seed an empty remote directory
    pub fn seed_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        state.dirs.insert(path.to_string());
    }

    /// Mark a subtree as unreadable in listings
    pub fn seed_unreadable(&self, prefix: &str) {
        let mut state = self.state.lock().unwrap();
        state.unreadable.insert(prefix.to_string());
    }

    /// Make every put to `path` fail with a permission error
    pub fn fail_put(&self, path: &str) {
        self.state.lock().unwrap().fail_put.insert(path.to_string());
    }

    /// Make every get of `path` fail
    pub fn fail_get(&self, path: &str) {
        self.state.lock().unwrap().fail_get.insert(path.to_string());
    }

    /// Make every delete of `path` fail
    pub fn fail_delete(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_delete
            .insert(path.to_string());
    }

    /// Current remote contents, for assertions
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .files
            .iter()
            .map(|(k, v)| (k.clone(), v.data.clone()))
            .collect()
    }

    /// Remote directories, for assertions
    pub fn dirs(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().dirs.clone()
    }
}

impl Transport for MemoryTransport {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn connect(
        &self,
        credentials: &BTreeMap<String, String>,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        if credentials.get("token").map(String::as_str) == Some("reject") {
            return Err(TransportError::new(
                TransportErrorKind::Auth,
                "authentication rejected",
            ));
        }
        Ok(Box::new(MemorySession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySession {
    state: Arc<Mutex<MemoryState>>,
}

impl TransportSession for MemorySession {
    fn list(&self) -> Result<RemoteListing, TransportError> {
        let state = self.state.lock().unwrap();
        let unreadable: Vec<RelPath> = state
            .unreadable
            .iter()
            .filter_map(|p| RelPath::new(p).ok())
            .collect();

        let mut entries = Vec::new();
        for (path, file) in &state.files {
            let rel = RelPath::new(path).expect("stored paths are valid");
            // Files under an unreadable prefix are invisible to listings.
            if unreadable.iter().any(|prefix| rel.starts_with(prefix)) {
                continue;
            }
            entries.push(RemoteEntry {
                path: rel,
                size: file.data.len() as u64,
                modified: file.modified,
                hash: file.expose_hash.then(|| hash_bytes(&file.data)),
            });
        }

        Ok(RemoteListing {
            entries,
            known_dirs: state
                .dirs
                .iter()
                .filter_map(|p| RelPath::new(p).ok())
                .collect(),
            unreadable,
        })
    }

    fn put(&self, local: &Path, remote: &RelPath) -> Result<(), TransportError> {
        let data = std::fs::read(local)
            .map_err(|e| TransportError::from_io(&e, &format!("read {}", local.display())))?;
        let mut state = self.state.lock().unwrap();
        if state.fail_put.contains(remote.as_str()) {
            return Err(TransportError::new(
                TransportErrorKind::Permission,
                format!("put {remote}: permission denied"),
            ));
        }
        state.files.insert(
            remote.as_str().to_string(),
            MemoryFile {
                data,
                modified: Some(Utc::now()),
                expose_hash: true,
            },
        );
        Ok(())
    }

    fn get(&self, remote: &RelPath) -> Result<Vec<u8>, TransportError> {
        let state = self.state.lock().unwrap();
        if state.fail_get.contains(remote.as_str()) {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                format!("get {remote}: read failed"),
            ));
        }
        state
            .files
            .get(remote.as_str())
            .map(|f| f.data.clone())
            .ok_or_else(|| {
                TransportError::new(TransportErrorKind::NotFound, format!("get {remote}: no such file"))
            })
    }

    fn delete(&self, remote: &RelPath) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete.contains(remote.as_str()) {
            return Err(TransportError::new(
                TransportErrorKind::Permission,
                format!("delete {remote}: permission denied"),
            ));
        }
        if state.files.remove(remote.as_str()).is_none() {
            return Err(TransportError::new(
                TransportErrorKind::NotFound,
                format!("delete {remote}: no such file"),
            ));
        }
        Ok(())
    }

    fn mkdir(&self, remote: &RelPath) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.dirs.insert(remote.as_str().to_string()) {
            return Err(TransportError::new(
                TransportErrorKind::AlreadyExists,
                format!("mkdir {remote}: already exists"),
            ));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}
