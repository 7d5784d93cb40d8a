//! Wasp framework support

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{CaravelError, CaravelResult};
use crate::frameworks::{Framework, ProjectRequirements};

/// Wasp full-stack projects
///
/// `wasp build` emits a server and a static web client; caravel deploys
/// the client bundle at `.wasp/build/web/app`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Wasp;

impl Wasp {
    pub fn new() -> Self {
        Self
    }
}

impl Framework for Wasp {
    fn id(&self) -> &'static str {
        "wasp"
    }

    fn detect(&self, project: &Path) -> bool {
        project.join("main.wasp").is_file()
    }

    fn requirements(&self, project: &Path) -> CaravelResult<ProjectRequirements> {
        let main_wasp = project.join("main.wasp");
        if !main_wasp.is_file() {
            return Err(CaravelError::InvalidProjectStructure {
                framework: "wasp".to_string(),
                path: project.to_path_buf(),
                message: "main.wasp file is missing".to_string(),
            });
        }
        if !project.join("package.json").is_file() {
            return Err(CaravelError::InvalidProjectStructure {
                framework: "wasp".to_string(),
                path: project.to_path_buf(),
                message: "package.json file is missing".to_string(),
            });
        }

        let mut warnings = Vec::new();

        // Basic sanity check on the app declaration.
        let content = std::fs::read_to_string(&main_wasp)?;
        if !content.contains("app ") {
            warnings.push("main.wasp has no app declaration; the build will likely fail".to_string());
        }

        if !project.join("node_modules").is_dir() {
            warnings.push(
                "node_modules directory is missing, run 'npm install' before deploying"
                    .to_string(),
            );
        }

        let mut required_env = BTreeSet::new();
        // The generated server needs a database; the client build bakes
        // the API origin in.
        required_env.insert("DATABASE_URL".to_string());
        if content.contains("auth") {
            required_env.insert("JWT_SECRET".to_string());
        }

        Ok(ProjectRequirements {
            framework_id: "wasp".to_string(),
            build_command: Some("wasp build".to_string()),
            output_directory: PathBuf::from(".wasp/build/web/app"),
            required_env,
            compatibility_warnings: warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn wasp_project(with_auth: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let main = if with_auth {
            "app todoApp {\n  auth: { methods: { usernameAndPassword: {} } }\n}\n"
        } else {
            "app todoApp {\n  title: \"Todo\"\n}\n"
        };
        fs::write(dir.path().join("main.wasp"), main).unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        dir
    }

    #[test]
    fn detects_main_wasp() {
        let dir = wasp_project(false);
        assert!(Wasp::new().detect(dir.path()));

        let empty = tempfile::tempdir().unwrap();
        assert!(!Wasp::new().detect(empty.path()));
    }

    #[test]
    fn requirements_report_shape() {
        let dir = wasp_project(false);
        let reqs = Wasp::new().requirements(dir.path()).unwrap();

        assert_eq!(reqs.framework_id, "wasp");
        assert_eq!(reqs.build_command.as_deref(), Some("wasp build"));
        assert_eq!(reqs.output_directory, PathBuf::from(".wasp/build/web/app"));
        assert!(reqs.required_env.contains("DATABASE_URL"));
        assert!(!reqs.required_env.contains("JWT_SECRET"));
    }

    #[test]
    fn auth_projects_require_jwt_secret() {
        let dir = wasp_project(true);
        let reqs = Wasp::new().requirements(dir.path()).unwrap();
        assert!(reqs.required_env.contains("JWT_SECRET"));
    }

    #[test]
    fn missing_node_modules_is_a_warning() {
        let dir = wasp_project(false);
        let reqs = Wasp::new().requirements(dir.path()).unwrap();
        assert!(reqs
            .compatibility_warnings
            .iter()
            .any(|w| w.contains("node_modules")));

        fs::create_dir(dir.path().join("node_modules")).unwrap();
        let reqs = Wasp::new().requirements(dir.path()).unwrap();
        assert!(reqs.compatibility_warnings.is_empty());
    }

    #[test]
    fn missing_main_wasp_is_invalid_structure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();
        let err = Wasp::new().requirements(dir.path()).unwrap_err();
        assert!(matches!(err, CaravelError::InvalidProjectStructure { .. }));
    }

    #[test]
    fn missing_package_json_is_invalid_structure() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.wasp"), "app x {}").unwrap();
        let err = Wasp::new().requirements(dir.path()).unwrap_err();
        assert!(matches!(err, CaravelError::InvalidProjectStructure { .. }));
    }
}
