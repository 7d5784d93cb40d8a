//! File inventories
//!
//! Local and remote inventory entries are the inputs to sync planning.
//! All entry paths are `RelPath` values: validated, normalized relative
//! paths that can never escape the deployment root.

mod walk;

pub use walk::walk_build_dir;

use std::fmt;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{CaravelError, CaravelResult};

/// A validated relative path, normalized to forward slashes
///
/// Guarantees:
/// - non-empty and relative (no leading `/`, no drive prefix)
/// - no `..` or `.` components
/// - `/` separators regardless of platform
///
/// Ordering is lexicographic on the normalized string, which makes plan
/// output deterministic and sorts parents before their children.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelPath(String);

impl RelPath {
    /// Validate and normalize a path
    pub fn new<P: AsRef<Path>>(path: P) -> CaravelResult<Self> {
        let path = path.as_ref();
        let reject = || CaravelError::InvalidPath {
            path: path.display().to_string(),
        };

        if path.as_os_str().is_empty() {
            return Err(reject());
        }

        let mut segments: Vec<String> = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(seg) => {
                    let seg = seg.to_str().ok_or_else(reject)?;
                    // Windows-style separators inside a single component
                    for piece in seg.split('\\') {
                        if piece.is_empty() || piece == "." || piece == ".." {
                            return Err(reject());
                        }
                        segments.push(piece.to_string());
                    }
                }
                Component::CurDir => continue,
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(reject());
                }
            }
        }

        if segments.is_empty() {
            return Err(reject());
        }

        Ok(Self(segments.join("/")))
    }

    /// The normalized path as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment (file or directory name)
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Parent path, if any
    pub fn parent(&self) -> Option<RelPath> {
        self.0.rfind('/').map(|idx| RelPath(self.0[..idx].to_string()))
    }

    /// All ancestor directories, nearest last (`a/b/c.txt` -> `a`, `a/b`)
    pub fn ancestors(&self) -> Vec<RelPath> {
        let mut out = Vec::new();
        let mut idx = 0;
        while let Some(sep) = self.0[idx..].find('/') {
            idx += sep;
            out.push(RelPath(self.0[..idx].to_string()));
            idx += 1;
        }
        out
    }

    /// Whether `self` is `prefix` or lies underneath it
    pub fn starts_with(&self, prefix: &RelPath) -> bool {
        self.0 == prefix.0
            || (self.0.len() > prefix.0.len()
                && self.0.starts_with(&prefix.0)
                && self.0.as_bytes()[prefix.0.len()] == b'/')
    }

    /// Resolve against a local root directory
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for seg in self.0.split('/') {
            out.push(seg);
        }
        out
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RelPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for RelPath {
    type Error = CaravelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// One file in the local build output tree
///
/// The content hash is always computed; the walker reads every file once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    /// Path relative to the build output root
    pub path: RelPath,
    /// File size in bytes
    pub size: u64,
    /// Filesystem mtime, when the platform reports one
    pub modified: Option<DateTime<Utc>>,
    /// Content hash (`sha256:<hex>`)
    pub hash: String,
    /// Absolute path of the source file, for the executor
    pub source: PathBuf,
}

/// One file in the remote listing snapshot
///
/// Hash and mtime are best-effort: transports that cannot compute them
/// cheaply leave them unset, and the planner falls back accordingly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to the deployment root
    pub path: RelPath,
    /// File size in bytes
    pub size: u64,
    /// Remote mtime, when the transport reports one
    pub modified: Option<DateTime<Utc>>,
    /// Content hash (`sha256:<hex>`), when the transport can provide it
    pub hash: Option<String>,
}

/// Compute the `sha256:<hex>` hash of a byte slice
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Compute the `sha256:<hex>` hash of a file, streaming
pub fn hash_file(path: &Path) -> CaravelResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("sha256:{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relpath_accepts_nested() {
        let p = RelPath::new("assets/js/app.js").unwrap();
        assert_eq!(p.as_str(), "assets/js/app.js");
    }

    #[test]
    fn relpath_rejects_empty() {
        assert!(RelPath::new("").is_err());
    }

    #[test]
    fn relpath_rejects_traversal() {
        assert!(RelPath::new("../escape").is_err());
        assert!(RelPath::new("a/../../b").is_err());
    }

    #[test]
    fn relpath_rejects_absolute() {
        assert!(RelPath::new("/etc/passwd").is_err());
    }

    #[test]
    fn relpath_strips_curdir() {
        let p = RelPath::new("./a/./b.txt").unwrap();
        assert_eq!(p.as_str(), "a/b.txt");
    }

    #[test]
    fn relpath_normalizes_backslashes() {
        let p = RelPath::new("assets\\app.js").unwrap();
        assert_eq!(p.as_str(), "assets/app.js");
    }

    #[test]
    fn relpath_parent_and_name() {
        let p = RelPath::new("a/b/c.txt").unwrap();
        assert_eq!(p.file_name(), "c.txt");
        assert_eq!(p.parent().unwrap().as_str(), "a/b");
        assert!(RelPath::new("top.txt").unwrap().parent().is_none());
    }

    #[test]
    fn relpath_ancestors_in_order() {
        let p = RelPath::new("a/b/c.txt").unwrap();
        let ancestors: Vec<String> =
            p.ancestors().iter().map(|a| a.as_str().to_string()).collect();
        assert_eq!(ancestors, vec!["a".to_string(), "a/b".to_string()]);
    }

    #[test]
    fn relpath_starts_with() {
        let file = RelPath::new("a/b/c.txt").unwrap();
        let dir = RelPath::new("a/b").unwrap();
        let other = RelPath::new("a/bc").unwrap();
        assert!(file.starts_with(&dir));
        assert!(dir.starts_with(&dir));
        assert!(!other.starts_with(&dir));
    }

    #[test]
    fn relpath_ordering_is_lexicographic() {
        let mut paths = vec![
            RelPath::new("b.txt").unwrap(),
            RelPath::new("a/z.txt").unwrap(),
            RelPath::new("a.txt").unwrap(),
        ];
        paths.sort();
        let sorted: Vec<&str> = paths.iter().map(|p| p.as_str()).collect();
        assert_eq!(sorted, vec!["a.txt", "a/z.txt", "b.txt"]);
    }

    #[test]
    fn hash_bytes_format() {
        let hash = hash_bytes(b"hello");
        assert!(hash.starts_with("sha256:"));
        assert_eq!(hash.len(), 7 + 64);
    }

    #[test]
    fn hash_file_matches_hash_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"content").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"content"));
    }
}
