//! Error types for Caravel
//!
//! Library errors use `thiserror`; the CLI binary wraps them in `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Caravel operations
pub type CaravelResult<T> = Result<T, CaravelError>;

/// Main error type for Caravel operations
#[derive(Error, Debug)]
pub enum CaravelError {
    /// No stored credentials for a provider
    #[error("no credentials stored for provider '{provider}' - run authenticate first")]
    CredentialsNotFound { provider: String },

    /// Stored credentials cannot be decrypted (corrupted record or rotated key)
    #[error("could not decrypt credentials for provider '{provider}': {message}")]
    CredentialDecryption { provider: String, message: String },

    /// A credential field is missing or malformed
    #[error("invalid credentials for provider '{provider}': {message}")]
    CredentialField { provider: String, message: String },

    /// Connection-level failure (refused, DNS, auth handshake)
    #[error("connection to '{target}' failed: {message}")]
    Connectivity { target: String, message: String },

    /// Provider identifier not known to the transport registry
    #[error("unsupported provider '{provider}'")]
    UnsupportedProvider { provider: String },

    /// Framework identifier not known to the registry
    #[error("unsupported framework '{framework}'")]
    UnsupportedFramework { framework: String },

    /// Project tree does not look like the claimed framework
    #[error("invalid {framework} project at {path}: {message}")]
    InvalidProjectStructure {
        framework: String,
        path: PathBuf,
        message: String,
    },

    /// Build command exited nonzero
    #[error("build command '{command}' failed with exit code {code}")]
    BuildFailed {
        command: String,
        code: i32,
        output_tail: String,
    },

    /// Build command exceeded its wall-clock timeout and was killed
    #[error("build command '{command}' timed out after {seconds}s")]
    BuildTimeout { command: String, seconds: u64 },

    /// Required environment variables were not provided for the build
    #[error("required environment variable(s) not set: {variables}")]
    MissingBuildEnv { variables: String },

    /// Transfer-level failure that aborts the run (backup, session setup)
    #[error("transfer failed: {message}")]
    Transfer { message: String },

    /// Deployment was cancelled by the caller
    #[error("deployment aborted")]
    Aborted,

    /// Another deployment for the same target is already in progress
    #[error("a deployment for target '{target}' is already in progress")]
    Busy { target: String },

    /// Inventory path is absolute, empty, or contains parent traversal
    #[error("path '{path}' is not a normalized relative path")]
    InvalidPath { path: String },

    /// Exclusion glob did not parse
    #[error("invalid exclusion pattern '{pattern}': {message}")]
    ExclusionPattern { pattern: String, message: String },

    /// Deployment record lookup failed
    #[error("deployment record '{id}' not found")]
    RecordNotFound { id: String },

    /// Deployment record file exists but does not parse
    #[error("deployment record at {path} is corrupted: {message}")]
    RecordCorrupted { path: PathBuf, message: String },

    /// Configuration file error
    #[error("configuration error in {file}: {message}")]
    Config { file: PathBuf, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaravelError {
    /// Short machine-readable kind, attached to failed deployment records.
    pub fn kind(&self) -> &'static str {
        match self {
            CaravelError::CredentialsNotFound { .. }
            | CaravelError::CredentialDecryption { .. }
            | CaravelError::CredentialField { .. } => "credential",
            CaravelError::Connectivity { .. } | CaravelError::UnsupportedProvider { .. } => {
                "connectivity"
            }
            CaravelError::UnsupportedFramework { .. }
            | CaravelError::InvalidProjectStructure { .. } => "analysis",
            CaravelError::BuildFailed { .. }
            | CaravelError::BuildTimeout { .. }
            | CaravelError::MissingBuildEnv { .. } => "build",
            CaravelError::Transfer { .. } => "transfer",
            CaravelError::Aborted => "aborted",
            CaravelError::Busy { .. } => "busy",
            CaravelError::InvalidPath { .. } | CaravelError::ExclusionPattern { .. } => "plan",
            CaravelError::RecordNotFound { .. } | CaravelError::RecordCorrupted { .. } => "record",
            CaravelError::Config { .. } => "config",
            CaravelError::Io(_) => "io",
        }
    }
}
