//! Transport abstraction and the Transfer Executor
//!
//! A `Transport` connects credentials to a `TransportSession` - the
//! capability set the executor drives (list/put/get/delete/mkdir/close).
//! Provider-specific transports (FTP, SFTP, deploy APIs) implement the
//! same traits outside this crate; caravel ships a directory-backed
//! transport and an in-memory one for tests.

mod executor;
mod local_dir;
mod memory;

pub use executor::{
    execute, BackupReference, ExecuteOptions, ExecutionReport, FailedOperation, FailureReason,
    RetryPolicy,
};
pub use local_dir::LocalDirTransport;
pub use memory::MemoryTransport;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::inventory::{RelPath, RemoteEntry};

/// Classified transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Authentication rejected by the provider
    Auth,
    /// Connection could not be established (refused, DNS, unreachable)
    Connection,
    /// The server denied the operation
    Permission,
    /// The operation exceeded the transport timeout
    Timeout,
    /// The remote path does not exist
    NotFound,
    /// The remote path already exists
    AlreadyExists,
    /// Anything else
    Other,
}

/// Error from a transport operation
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn from_io(err: &std::io::Error, context: &str) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => TransportErrorKind::Permission,
            std::io::ErrorKind::NotFound => TransportErrorKind::NotFound,
            std::io::ErrorKind::AlreadyExists => TransportErrorKind::AlreadyExists,
            std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
            std::io::ErrorKind::ConnectionRefused => TransportErrorKind::Connection,
            _ => TransportErrorKind::Other,
        };
        Self::new(kind, format!("{context}: {err}"))
    }
}

/// Remote inventory snapshot returned by `TransportSession::list`
///
/// `unreadable` records subtree prefixes the transport could not descend
/// into; the planner keeps deletions out of those.
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    /// Files visible in the listing
    pub entries: Vec<RemoteEntry>,
    /// Directories known to exist (even when empty)
    pub known_dirs: Vec<RelPath>,
    /// Prefixes the listing could not read
    pub unreadable: Vec<RelPath>,
}

/// Factory capability: credentials in, authenticated session out
pub trait Transport: Send + Sync {
    /// Registry identifier (e.g. "local_dir")
    fn id(&self) -> &'static str;

    /// Open an authenticated session
    fn connect(
        &self,
        credentials: &BTreeMap<String, String>,
    ) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// An authenticated handle to a remote file-serving endpoint
///
/// Methods take `&self` so independent operations can run on the
/// executor's worker pool; implementations synchronize internally.
pub trait TransportSession: Send + Sync {
    /// Snapshot the remote tree under the session root
    fn list(&self) -> Result<RemoteListing, TransportError>;

    /// Upload a local file to a remote path
    fn put(&self, local: &Path, remote: &RelPath) -> Result<(), TransportError>;

    /// Download a remote file
    fn get(&self, remote: &RelPath) -> Result<Vec<u8>, TransportError>;

    /// Remove a remote file
    fn delete(&self, remote: &RelPath) -> Result<(), TransportError>;

    /// Create a remote directory (parents must already exist)
    fn mkdir(&self, remote: &RelPath) -> Result<(), TransportError>;

    /// Release the session
    fn close(&self) -> Result<(), TransportError>;
}

/// Deployment-scoped cancellation signal
///
/// Cloned into the Ctrl-C handler by the CLI and checked by the executor
/// before each operation dispatch.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; in-flight operations finish, nothing new starts
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_starts_clear() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_token_propagates_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn transport_error_classifies_io_kinds() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let te = TransportError::from_io(&err, "put index.html");
        assert_eq!(te.kind, TransportErrorKind::Permission);
        assert!(te.to_string().contains("put index.html"));
    }
}
