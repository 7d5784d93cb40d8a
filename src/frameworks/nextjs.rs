//! Next.js framework support

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{CaravelError, CaravelResult};
use crate::frameworks::{Framework, ProjectRequirements};

/// Next.js projects deployed as a static export
///
/// Hosting targets here serve plain files, so the project must use
/// `output: 'export'`; the build lands in `out/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextJs;

impl NextJs {
    pub fn new() -> Self {
        Self
    }

    fn package_json(project: &Path) -> Option<serde_json::Value> {
        let raw = std::fs::read_to_string(project.join("package.json")).ok()?;
        serde_json::from_str(&raw).ok()
    }

    fn has_next_dependency(package: &serde_json::Value) -> bool {
        ["dependencies", "devDependencies"].iter().any(|section| {
            package
                .get(section)
                .and_then(|deps| deps.get("next"))
                .is_some()
        })
    }
}

impl Framework for NextJs {
    fn id(&self) -> &'static str {
        "nextjs"
    }

    fn detect(&self, project: &Path) -> bool {
        Self::package_json(project)
            .map(|pkg| Self::has_next_dependency(&pkg))
            .unwrap_or(false)
    }

    fn requirements(&self, project: &Path) -> CaravelResult<ProjectRequirements> {
        let package = Self::package_json(project).ok_or_else(|| {
            CaravelError::InvalidProjectStructure {
                framework: "nextjs".to_string(),
                path: project.to_path_buf(),
                message: "package.json is missing or not valid JSON".to_string(),
            }
        })?;
        if !Self::has_next_dependency(&package) {
            return Err(CaravelError::InvalidProjectStructure {
                framework: "nextjs".to_string(),
                path: project.to_path_buf(),
                message: "package.json does not list 'next' as a dependency".to_string(),
            });
        }

        let mut warnings = Vec::new();

        if !project.join("node_modules").is_dir() {
            warnings.push(
                "node_modules directory is missing, run 'npm install' before deploying"
                    .to_string(),
            );
        }

        // Static hosting needs a static export; peek at next.config for
        // the output setting.
        let config_exports = ["next.config.js", "next.config.mjs", "next.config.ts"]
            .iter()
            .filter_map(|name| std::fs::read_to_string(project.join(name)).ok())
            .any(|content| content.contains("output") && content.contains("export"));
        if !config_exports {
            warnings.push(
                "next.config does not set output: 'export'; static hosting targets \
                 cannot run the Next.js server"
                    .to_string(),
            );
        }

        Ok(ProjectRequirements {
            framework_id: "nextjs".to_string(),
            build_command: Some("npm run build".to_string()),
            output_directory: PathBuf::from("out"),
            required_env: BTreeSet::new(),
            compatibility_warnings: warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn next_project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"dependencies": {"next": "^14.0.0", "react": "^18"}}"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn detects_next_dependency() {
        let dir = next_project();
        assert!(NextJs::new().detect(dir.path()));

        let plain = tempfile::tempdir().unwrap();
        fs::write(plain.path().join("package.json"), r#"{"dependencies": {}}"#).unwrap();
        assert!(!NextJs::new().detect(plain.path()));
    }

    #[test]
    fn requirements_report_shape() {
        let dir = next_project();
        let reqs = NextJs::new().requirements(dir.path()).unwrap();

        assert_eq!(reqs.build_command.as_deref(), Some("npm run build"));
        assert_eq!(reqs.output_directory, PathBuf::from("out"));
    }

    #[test]
    fn warns_without_static_export_config() {
        let dir = next_project();
        let reqs = NextJs::new().requirements(dir.path()).unwrap();
        assert!(reqs
            .compatibility_warnings
            .iter()
            .any(|w| w.contains("export")));
    }

    #[test]
    fn export_config_clears_the_warning() {
        let dir = next_project();
        fs::write(
            dir.path().join("next.config.js"),
            "module.exports = { output: 'export' };",
        )
        .unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();

        let reqs = NextJs::new().requirements(dir.path()).unwrap();
        assert!(reqs.compatibility_warnings.is_empty());
    }

    #[test]
    fn dev_dependency_also_counts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("package.json"),
            r#"{"devDependencies": {"next": "14.0.0"}}"#,
        )
        .unwrap();
        assert!(NextJs::new().detect(dir.path()));
    }

    #[test]
    fn missing_package_json_is_invalid_structure() {
        let dir = tempfile::tempdir().unwrap();
        let err = NextJs::new().requirements(dir.path()).unwrap_err();
        assert!(matches!(err, CaravelError::InvalidProjectStructure { .. }));
    }
}
