//! The engine facade
//!
//! Everything external callers (the protocol adapter, the bundled CLI)
//! may do goes through these operations: authenticate, analyze, deploy,
//! troubleshoot, plus provider/framework/record listings. The adapter
//! layer shares no state with the engine beyond the records it returns.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing::info;

use crate::build::{BuildRunner, ProcessBuildRunner};
use crate::config::EngineConfig;
use crate::error::{CaravelError, CaravelResult};
use crate::frameworks::{self, ProjectRequirements};
use crate::orchestrate::{
    DeployOptions, DeployRequest, DeploymentRecord, Orchestrator, RecordStore,
};
use crate::transfer::{CancelToken, LocalDirTransport, Transport};
use crate::troubleshoot::{self, Diagnosis};
use crate::vault::{ValidationResult, Vault};

/// Transports known to this engine, keyed by provider id
///
/// Ships with the directory transport; callers register provider
/// transports (FTP, SFTP, deploy APIs) before use.
pub struct TransportRegistry {
    transports: Vec<Box<dyn Transport>>,
}

impl TransportRegistry {
    /// Registry with the built-in transports
    pub fn with_defaults() -> Self {
        Self {
            transports: vec![Box::new(LocalDirTransport::new())],
        }
    }

    /// Empty registry (testing)
    pub fn empty() -> Self {
        Self {
            transports: Vec::new(),
        }
    }

    /// Add a transport; replaces any previous one with the same id
    pub fn register(&mut self, transport: Box<dyn Transport>) {
        self.transports.retain(|t| t.id() != transport.id());
        self.transports.push(transport);
    }

    pub fn get(&self, id: &str) -> Option<&dyn Transport> {
        self.transports
            .iter()
            .find(|t| t.id() == id)
            .map(|t| t.as_ref())
    }

    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<&'static str> = self.transports.iter().map(|t| t.id()).collect();
        ids.sort_unstable();
        ids
    }
}

/// Deployment engine
///
/// Owns the vault, the registries, the record store and the busy set.
/// One engine per state directory; concurrent deploys to distinct
/// targets are fine, a second deploy to the same target returns `Busy`.
pub struct Engine {
    config: EngineConfig,
    state_dir: PathBuf,
    vault: Vault,
    transports: TransportRegistry,
    records: RecordStore,
    build_runner: Box<dyn BuildRunner>,
    active_targets: Mutex<Vec<String>>,
}

impl Engine {
    /// Open an engine over a state directory with default collaborators
    pub fn open(state_dir: &Path, config: EngineConfig) -> CaravelResult<Self> {
        Self::with_parts(
            state_dir,
            config,
            TransportRegistry::with_defaults(),
            Box::new(ProcessBuildRunner::new()),
        )
    }

    /// Open with explicit transports and build runner (testing, embedding)
    pub fn with_parts(
        state_dir: &Path,
        config: EngineConfig,
        transports: TransportRegistry,
        build_runner: Box<dyn BuildRunner>,
    ) -> CaravelResult<Self> {
        let vault = Vault::open(state_dir)?;
        let records = RecordStore::open(state_dir)?;
        Ok(Self {
            config,
            state_dir: state_dir.to_path_buf(),
            vault,
            transports,
            records,
            build_runner,
            active_targets: Mutex::new(Vec::new()),
        })
    }

    fn transport(&self, provider_id: &str) -> CaravelResult<&dyn Transport> {
        self.transports
            .get(provider_id)
            .ok_or_else(|| CaravelError::UnsupportedProvider {
                provider: provider_id.to_string(),
            })
    }

    /// Validate candidate credentials and store them on success
    ///
    /// Field values are never logged; only the provider id is.
    pub fn authenticate(
        &self,
        provider_id: &str,
        fields: &BTreeMap<String, String>,
    ) -> CaravelResult<ValidationResult> {
        let transport = self.transport(provider_id)?;
        let result = self.vault.validate(transport, fields);
        if result.ok {
            self.vault.store(provider_id, fields)?;
            info!(provider = provider_id, "authenticated");
        }
        Ok(result)
    }

    /// Analyze a project for a framework/provider combination
    ///
    /// The provider must be known to the registry; requirement analysis
    /// itself is framework-driven and touches neither network nor vault.
    pub fn analyze(
        &self,
        project_path: &Path,
        framework_id: &str,
        provider_id: &str,
    ) -> CaravelResult<ProjectRequirements> {
        self.transport(provider_id)?;
        frameworks::analyze(project_path, framework_id)
    }

    /// Run a deployment to its terminal state
    pub fn deploy(
        &self,
        project_path: &Path,
        framework_id: &str,
        provider_id: &str,
        options: DeployOptions,
        cancel: &CancelToken,
    ) -> CaravelResult<DeploymentRecord> {
        let transport = self.transport(provider_id)?;
        let _guard = self.claim_target(provider_id)?;

        let orchestrator = Orchestrator {
            vault: &self.vault,
            transport,
            build_runner: self.build_runner.as_ref(),
            records: &self.records,
            build_timeout: Duration::from_secs(self.config.build.timeout_secs),
            transfer_concurrency: self.config.transfer.concurrency,
            retry: self.config.transfer.retry_policy(),
            backup_root: self.state_dir.join("backups"),
        };
        let request = DeployRequest {
            project_path: project_path.to_path_buf(),
            framework_id: framework_id.to_string(),
            provider_id: provider_id.to_string(),
            options,
        };
        orchestrator.deploy(&request, cancel)
    }

    /// Map error signatures to remediation suggestions
    ///
    /// With a provider id, missing-credential problems for that provider
    /// are diagnosed up front.
    pub fn troubleshoot(
        &self,
        query: &str,
        provider_id: Option<&str>,
    ) -> CaravelResult<Vec<Diagnosis>> {
        let mut diagnoses = Vec::new();
        if let Some(provider) = provider_id {
            self.transport(provider)?;
            if !self.vault.list_providers()?.iter().any(|p| p == provider) {
                diagnoses.push(Diagnosis {
                    problem: format!("No stored credentials for provider '{provider}'"),
                    suggested_fix: "Run authenticate for this provider before deploying."
                        .to_string(),
                });
            }
        }
        diagnoses.extend(troubleshoot::troubleshoot(&self.records, query)?);
        Ok(diagnoses)
    }

    /// Look up one deployment record
    pub fn record(&self, deployment_id: &str) -> CaravelResult<DeploymentRecord> {
        self.records.load(deployment_id)
    }

    /// All deployment records, newest first
    pub fn list_records(&self) -> CaravelResult<Vec<DeploymentRecord>> {
        self.records.list()
    }

    /// Providers with stored credentials
    pub fn list_providers(&self) -> CaravelResult<Vec<String>> {
        self.vault.list_providers()
    }

    /// Framework identifiers known to the registry
    pub fn list_frameworks(&self) -> Vec<&'static str> {
        frameworks::all_frameworks().iter().map(|f| f.id()).collect()
    }

    /// Remove stored credentials for a provider
    pub fn forget(&self, provider_id: &str) -> CaravelResult<bool> {
        self.vault.delete(provider_id)
    }

    fn claim_target(&self, target: &str) -> CaravelResult<TargetGuard<'_>> {
        let mut active = self.active_targets.lock().expect("active target lock");
        if active.iter().any(|t| t == target) {
            return Err(CaravelError::Busy {
                target: target.to_string(),
            });
        }
        active.push(target.to_string());
        Ok(TargetGuard {
            engine: self,
            target: target.to_string(),
        })
    }
}

/// Releases the busy claim on drop, error paths included
struct TargetGuard<'a> {
    engine: &'a Engine,
    target: String,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.engine.active_targets.lock() {
            active.retain(|t| t != &self.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MemoryTransport;

    fn engine_with_memory(dir: &Path) -> (Engine, MemoryTransport) {
        let transport = MemoryTransport::new();
        let mut registry = TransportRegistry::empty();
        registry.register(Box::new(transport.clone()));
        let engine = Engine::with_parts(
            dir,
            EngineConfig::default(),
            registry,
            Box::new(crate::build::ScriptedBuildRunner::succeeding()),
        )
        .unwrap();
        (engine, transport)
    }

    fn memory_creds() -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("token".to_string(), "valid".to_string());
        fields
    }

    #[test]
    fn authenticate_stores_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_memory(dir.path());

        let result = engine.authenticate("memory", &memory_creds()).unwrap();
        assert!(result.ok);
        assert_eq!(engine.list_providers().unwrap(), vec!["memory".to_string()]);
    }

    #[test]
    fn authenticate_rejected_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_memory(dir.path());

        let mut fields = BTreeMap::new();
        fields.insert("token".to_string(), "reject".to_string());

        let result = engine.authenticate("memory", &fields).unwrap();
        assert!(!result.ok);
        assert!(engine.list_providers().unwrap().is_empty());
    }

    #[test]
    fn reauthentication_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_memory(dir.path());

        engine.authenticate("memory", &memory_creds()).unwrap();
        let mut second = memory_creds();
        second.insert("region".to_string(), "eu".to_string());
        engine.authenticate("memory", &second).unwrap();

        assert_eq!(engine.list_providers().unwrap(), vec!["memory".to_string()]);
    }

    #[test]
    fn unknown_provider_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_memory(dir.path());

        let err = engine
            .authenticate("hostm", &memory_creds())
            .unwrap_err();
        assert!(matches!(err, CaravelError::UnsupportedProvider { .. }));
    }

    #[test]
    fn registry_register_replaces_same_id() {
        let mut registry = TransportRegistry::empty();
        registry.register(Box::new(MemoryTransport::new()));
        registry.register(Box::new(MemoryTransport::new()));
        assert_eq!(registry.ids(), vec!["memory"]);
    }

    #[test]
    fn frameworks_listing_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_memory(dir.path());
        assert_eq!(engine.list_frameworks(), vec!["wasp", "nextjs", "static"]);
    }

    #[test]
    fn claim_target_blocks_second_claim() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine_with_memory(dir.path());

        let guard = engine.claim_target("memory").unwrap();
        let err = engine.claim_target("memory").err().unwrap();
        assert!(matches!(err, CaravelError::Busy { .. }));

        drop(guard);
        assert!(engine.claim_target("memory").is_ok());
    }
}
