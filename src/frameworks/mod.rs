//! Framework capability and registry
//!
//! Each supported framework supplies detection and a requirements report;
//! the engine depends only on this interface. Concrete frameworks are
//! selected through the registry by identifier.

mod nextjs;
mod static_site;
mod wasp;

pub use nextjs::NextJs;
pub use static_site::StaticSite;
pub use wasp::Wasp;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{CaravelError, CaravelResult};

/// Requirements report for one project analysis
///
/// Produced fresh on every call; nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRequirements {
    /// Framework that produced this report
    pub framework_id: String,
    /// Shell command producing the build output; None for static projects
    pub build_command: Option<String>,
    /// Build output directory, relative to the project root
    pub output_directory: PathBuf,
    /// Environment variables the build requires
    pub required_env: BTreeSet<String>,
    /// Ordered warnings about likely deployment problems
    pub compatibility_warnings: Vec<String>,
}

/// Capability a concrete framework must supply
pub trait Framework: Send + Sync {
    /// Registry identifier (e.g. "wasp")
    fn id(&self) -> &'static str;

    /// Cheap structural check: does this project look like the framework?
    fn detect(&self, project: &Path) -> bool;

    /// Full analysis; pure inspection, no writes, no network
    fn requirements(&self, project: &Path) -> CaravelResult<ProjectRequirements>;
}

/// All frameworks caravel ships with
pub fn all_frameworks() -> Vec<Box<dyn Framework>> {
    vec![
        Box::new(Wasp::new()),
        Box::new(NextJs::new()),
        Box::new(StaticSite::new()),
    ]
}

/// Look up a framework by identifier
pub fn get_framework(id: &str) -> Option<Box<dyn Framework>> {
    all_frameworks().into_iter().find(|f| f.id() == id)
}

/// Analyze a project with an explicit framework choice
pub fn analyze(project: &Path, framework_id: &str) -> CaravelResult<ProjectRequirements> {
    let framework =
        get_framework(framework_id).ok_or_else(|| CaravelError::UnsupportedFramework {
            framework: framework_id.to_string(),
        })?;
    if !project.is_dir() {
        return Err(CaravelError::InvalidProjectStructure {
            framework: framework_id.to_string(),
            path: project.to_path_buf(),
            message: "project path does not exist".to_string(),
        });
    }
    framework.requirements(project)
}
