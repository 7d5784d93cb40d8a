//! Caravel - deployment synchronization and orchestration engine
//!
//! Caravel turns a local build output directory into a minimal, safe set
//! of remote file operations, runs authenticate → analyze → build → sync
//! → report as a recoverable state machine, and keeps provider
//! credentials encrypted at rest.

pub mod build;
pub mod config;
pub mod engine;
pub mod error;
pub mod frameworks;
pub mod inventory;
pub mod orchestrate;
pub mod plan;
pub mod transfer;
pub mod troubleshoot;
pub mod ui;
pub mod vault;

// Re-exports for convenience
pub use engine::{Engine, TransportRegistry};
pub use error::{CaravelError, CaravelResult};
pub use frameworks::{all_frameworks, get_framework, Framework, ProjectRequirements};
pub use inventory::{walk_build_dir, LocalEntry, RelPath, RemoteEntry};
pub use orchestrate::{
    DeployOptions, DeployRequest, DeployStatus, DeploymentRecord, RecordStore,
};
pub use plan::{plan, PlanOptions, SyncMode, SyncOperation};
pub use transfer::{
    execute, CancelToken, ExecuteOptions, ExecutionReport, LocalDirTransport, MemoryTransport,
    RemoteListing, Transport, TransportSession,
};
pub use troubleshoot::Diagnosis;
pub use vault::{CredentialRecord, MasterKey, ValidationResult, Vault};
