//! Deployment orchestration
//!
//! The state machine behind `deploy`: authenticate, analyze, build, sync,
//! report. Every transition is re-entrant from its source state (the
//! build step always re-executes); a failed transition finalizes the
//! deployment record with the originating error kind.

mod record;

pub use record::{DeployStatus, DeploymentRecord, RecordStore};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::build::BuildRunner;
use crate::error::{CaravelError, CaravelResult};
use crate::frameworks::{self, ProjectRequirements};
use crate::inventory::walk_build_dir;
use crate::plan::{plan, PlanOptions, SyncMode};
use crate::transfer::{
    execute, CancelToken, ExecuteOptions, RetryPolicy, Transport, TransportErrorKind,
    TransportSession,
};
use crate::vault::Vault;

/// Caller-facing options for one deployment
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub sync_mode: SyncMode,
    /// Snapshot mutated remote files before touching them
    pub backup: bool,
    /// In smart mode, delete remote-only files
    pub clean_destination: bool,
    /// Glob patterns kept out of the sync (e.g. ".git/**")
    pub exclusions: Vec<String>,
    /// Extra environment for the build subprocess
    pub env: BTreeMap<String, String>,
    /// Public URL recorded on success; derived from the provider's host
    /// field when unset
    pub site_url: Option<String>,
}

/// One deployment request
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub project_path: PathBuf,
    pub framework_id: String,
    pub provider_id: String,
    pub options: DeployOptions,
}

/// Where the state machine currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployState {
    Idle,
    Authenticated,
    Analyzed,
    Built,
    Synced,
    Reported,
    Failed,
}

/// Shared collaborators and tuning for deployments
pub struct Orchestrator<'a> {
    pub vault: &'a Vault,
    pub transport: &'a dyn Transport,
    pub build_runner: &'a dyn BuildRunner,
    pub records: &'a RecordStore,
    pub build_timeout: Duration,
    pub transfer_concurrency: usize,
    pub retry: RetryPolicy,
    /// Root under which per-deployment backup directories are staged
    pub backup_root: PathBuf,
}

impl Orchestrator<'_> {
    /// Run a full deployment to its terminal state
    pub fn deploy(
        &self,
        request: &DeployRequest,
        cancel: &CancelToken,
    ) -> CaravelResult<DeploymentRecord> {
        let mut deployment = Deployment::start(self, request, cancel)?;

        while !matches!(
            deployment.state,
            DeployState::Reported | DeployState::Failed
        ) {
            if let Err(error) = deployment.step() {
                let detail = format!("{}: {error}", error.kind());
                warn!(
                    deployment = %deployment.record.id,
                    state = ?deployment.state,
                    %error,
                    "deployment failed"
                );
                deployment.state = DeployState::Failed;
                deployment
                    .record
                    .finish(DeployStatus::Failed, Some(detail));
                self.records.save(&deployment.record)?;
                return Err(error);
            }
            self.records.save(&deployment.record)?;
        }

        Ok(deployment.record)
    }
}

/// An in-flight deployment
///
/// `step` advances one transition; errors leave the state unchanged so
/// the same transition can be retried by a driver that wants to.
pub struct Deployment<'a> {
    orchestrator: &'a Orchestrator<'a>,
    request: &'a DeployRequest,
    cancel: &'a CancelToken,
    state: DeployState,
    record: DeploymentRecord,
    credentials: Option<BTreeMap<String, String>>,
    requirements: Option<ProjectRequirements>,
}

impl<'a> Deployment<'a> {
    fn start(
        orchestrator: &'a Orchestrator<'a>,
        request: &'a DeployRequest,
        cancel: &'a CancelToken,
    ) -> CaravelResult<Self> {
        let record = DeploymentRecord::start(&request.provider_id, &request.framework_id);
        orchestrator.records.save(&record)?;
        info!(deployment = %record.id, provider = %request.provider_id, "deployment started");
        Ok(Self {
            orchestrator,
            request,
            cancel,
            state: DeployState::Idle,
            record,
            credentials: None,
            requirements: None,
        })
    }

    pub fn state(&self) -> DeployState {
        self.state
    }

    pub fn record(&self) -> &DeploymentRecord {
        &self.record
    }

    /// Advance one state transition
    pub fn step(&mut self) -> CaravelResult<()> {
        if self.cancel.is_cancelled() {
            return Err(CaravelError::Aborted);
        }
        match self.state {
            DeployState::Idle => self.authenticate(),
            DeployState::Authenticated => self.analyze(),
            DeployState::Analyzed => self.build(),
            DeployState::Built => self.sync(),
            DeployState::Synced => self.report(),
            DeployState::Reported | DeployState::Failed => Ok(()),
        }
    }

    /// Idle -> Authenticated: stored record + live probe
    fn authenticate(&mut self) -> CaravelResult<()> {
        let stored = self
            .orchestrator
            .vault
            .retrieve(&self.request.provider_id)?;

        let probe = self
            .orchestrator
            .vault
            .validate(self.orchestrator.transport, &stored.fields);
        if !probe.ok {
            // State stays Idle; the caller can re-authenticate and retry.
            return Err(CaravelError::Connectivity {
                target: self.request.provider_id.clone(),
                message: probe.detail,
            });
        }

        self.credentials = Some(stored.fields);
        self.state = DeployState::Authenticated;
        Ok(())
    }

    /// Authenticated -> Analyzed
    fn analyze(&mut self) -> CaravelResult<()> {
        let requirements =
            frameworks::analyze(&self.request.project_path, &self.request.framework_id)?;
        for warning in &requirements.compatibility_warnings {
            warn!(deployment = %self.record.id, "{warning}");
        }
        self.requirements = Some(requirements);
        self.state = DeployState::Analyzed;
        Ok(())
    }

    /// Analyzed -> Built (always re-executes on retry)
    fn build(&mut self) -> CaravelResult<()> {
        let requirements = self.requirements.as_ref().expect("analyzed");

        let missing: Vec<&String> = requirements
            .required_env
            .iter()
            .filter(|var| {
                !self.request.options.env.contains_key(*var) && std::env::var(var.as_str()).is_err()
            })
            .collect();
        if !missing.is_empty() {
            return Err(CaravelError::MissingBuildEnv {
                variables: missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }

        if let Some(command) = &requirements.build_command {
            let output = self.orchestrator.build_runner.run(
                command,
                &self.request.project_path,
                &self.request.options.env,
                self.orchestrator.build_timeout,
            )?;
            if !output.success() {
                return Err(CaravelError::BuildFailed {
                    command: command.clone(),
                    code: output.exit_code,
                    output_tail: output.tail(40),
                });
            }
        }

        self.state = DeployState::Built;
        Ok(())
    }

    /// Built -> Synced: list, plan, execute
    fn sync(&mut self) -> CaravelResult<()> {
        let requirements = self.requirements.clone().expect("analyzed");
        let credentials = self.credentials.clone().expect("authenticated");

        let session = self
            .orchestrator
            .transport
            .connect(&credentials)
            .map_err(|e| connectivity(&self.request.provider_id, e))?;

        let result = self.sync_with_session(session.as_ref(), &requirements);
        let _ = session.close();
        result
    }

    fn sync_with_session(
        &mut self,
        session: &dyn TransportSession,
        requirements: &ProjectRequirements,
    ) -> CaravelResult<()> {
        let listing = session
            .list()
            .map_err(|e| connectivity(&self.request.provider_id, e))?;

        let output_dir = self
            .request
            .project_path
            .join(&requirements.output_directory);
        let local = walk_build_dir(&output_dir)?;

        let operations = plan(
            &local,
            &listing,
            &PlanOptions {
                mode: self.request.options.sync_mode,
                clean_destination: self.request.options.clean_destination,
                exclusions: self.request.options.exclusions.clone(),
            },
        )?;

        self.record.operations_planned = operations.len();
        self.orchestrator.records.save(&self.record)?;
        info!(
            deployment = %self.record.id,
            planned = operations.len(),
            mode = %self.request.options.sync_mode,
            "sync plan ready"
        );

        let report = execute(
            session,
            &operations,
            &ExecuteOptions {
                backup: self.request.options.backup,
                backup_dir: Some(self.orchestrator.backup_root.join(&self.record.id)),
                concurrency: self.orchestrator.transfer_concurrency,
                retry: self.orchestrator.retry,
            },
            self.cancel,
        )?;

        self.record.operations_applied = report.applied;
        self.record.operations_failed = report.failed.len();
        self.record.backup_reference = report
            .backup
            .as_ref()
            .map(|b| b.directory.display().to_string());

        if report.aborted {
            return Err(CaravelError::Aborted);
        }

        // Per-file failures do not abort the batch; the record carries
        // the partial-failure evidence forward.
        if let Some(first) = report.failed.first() {
            self.record.failure_detail = Some(format!(
                "{} operation(s) failed; first: {} ({}: {})",
                report.failed.len(),
                first.path,
                first.reason,
                first.message
            ));
        }

        self.state = DeployState::Synced;
        Ok(())
    }

    /// Synced -> Reported: always succeeds
    fn report(&mut self) -> CaravelResult<()> {
        let credentials = self.credentials.as_ref().expect("authenticated");

        self.record.site_url = self.request.options.site_url.clone().or_else(|| {
            credentials
                .get("host")
                .map(|host| format!("http://{host}"))
        });

        let status = if self.record.operations_failed == 0 {
            DeployStatus::Succeeded
        } else {
            DeployStatus::PartialFailure
        };
        let detail = self.record.failure_detail.take();
        self.record.finish(status, detail);

        info!(
            deployment = %self.record.id,
            applied = self.record.operations_applied,
            failed = self.record.operations_failed,
            status = ?self.record.final_status,
            "deployment reported"
        );
        self.state = DeployState::Reported;
        Ok(())
    }
}

fn connectivity(provider: &str, e: crate::transfer::TransportError) -> CaravelError {
    match e.kind {
        TransportErrorKind::Auth => CaravelError::CredentialField {
            provider: provider.to_string(),
            message: e.message,
        },
        _ => CaravelError::Connectivity {
            target: provider.to_string(),
            message: e.message,
        },
    }
}
