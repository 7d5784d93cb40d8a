//! Plain static site support

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{CaravelError, CaravelResult};
use crate::frameworks::{Framework, ProjectRequirements};

/// Prebuilt static sites: no build step, the project root is the output
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSite;

impl StaticSite {
    pub fn new() -> Self {
        Self
    }
}

impl Framework for StaticSite {
    fn id(&self) -> &'static str {
        "static"
    }

    fn detect(&self, project: &Path) -> bool {
        project.join("index.html").is_file()
    }

    fn requirements(&self, project: &Path) -> CaravelResult<ProjectRequirements> {
        if !project.join("index.html").is_file() {
            return Err(CaravelError::InvalidProjectStructure {
                framework: "static".to_string(),
                path: project.to_path_buf(),
                message: "index.html is missing".to_string(),
            });
        }

        let mut warnings = Vec::new();
        if project.join("package.json").is_file() {
            warnings.push(
                "package.json present; if this project needs a build step, pick its \
                 framework instead of 'static'"
                    .to_string(),
            );
        }

        Ok(ProjectRequirements {
            framework_id: "static".to_string(),
            build_command: None,
            output_directory: PathBuf::from("."),
            required_env: BTreeSet::new(),
            compatibility_warnings: warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn detects_index_html() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        assert!(StaticSite::new().detect(dir.path()));
    }

    #[test]
    fn no_build_command_and_root_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();

        let reqs = StaticSite::new().requirements(dir.path()).unwrap();
        assert!(reqs.build_command.is_none());
        assert_eq!(reqs.output_directory, PathBuf::from("."));
        assert!(reqs.required_env.is_empty());
    }

    #[test]
    fn package_json_triggers_warning() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        fs::write(dir.path().join("package.json"), "{}").unwrap();

        let reqs = StaticSite::new().requirements(dir.path()).unwrap();
        assert_eq!(reqs.compatibility_warnings.len(), 1);
    }

    #[test]
    fn missing_index_is_invalid_structure() {
        let dir = tempfile::tempdir().unwrap();
        let err = StaticSite::new().requirements(dir.path()).unwrap_err();
        assert!(matches!(err, CaravelError::InvalidProjectStructure { .. }));
    }
}
