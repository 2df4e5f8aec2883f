//! Dependency lookup and installation through the host package manager.
//!
//! Lookup works on bare package names; installation passes the declared
//! strings through untouched so version pins reach the package manager.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{EnvError, Result};
use crate::language::Language;
use crate::probe::find_executable;
use crate::process::{run_captured, CommandSpec, Termination};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);

const PYTHON_LOOKUP: &str = r#"
import importlib.util, json, sys
missing = []
for idx, name in enumerate(json.loads(sys.argv[1])):
    try:
        if importlib.util.find_spec(name) is None:
            missing.append(idx)
    except (ImportError, ValueError):
        missing.append(idx)
print(json.dumps(missing))
"#;

const NODE_LOOKUP: &str = r#"
const missing = [];
JSON.parse(process.argv[1]).forEach((name, idx) => {
  try { require.resolve(name); } catch (e) { missing.push(idx); }
});
console.log(JSON.stringify(missing));
"#;

/// Distribution names whose import name differs.
const PYTHON_MODULE_ALIASES: &[(&str, &str)] = &[
    ("scikit-learn", "sklearn"),
    ("pillow", "PIL"),
    ("beautifulsoup4", "bs4"),
    ("opencv-python", "cv2"),
    ("opencv-python-headless", "cv2"),
    ("pyyaml", "yaml"),
    ("python-dateutil", "dateutil"),
    ("protobuf", "google.protobuf"),
];

/// Host package manager family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageEcosystem {
    Pip,
    Npm,
}

impl PackageEcosystem {
    /// The ecosystem for a language, if it has a resolver.
    pub fn for_language(language: Language) -> Option<Self> {
        match language {
            Language::Python => Some(PackageEcosystem::Pip),
            Language::JavaScript => Some(PackageEcosystem::Npm),
            _ => None,
        }
    }
}

/// Outcome of an installation request. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLog {
    pub success: bool,
    /// Combined package manager output, or a reason when nothing ran.
    pub output: String,
}

/// Strip version qualifiers and extras, leaving the bare package name.
///
/// Handles pip specifiers (`==`, `>=`, `<=`, `~=`, `!=`, `<`, `>`,
/// `[extras]`, `; markers`) and npm `name@range`, including scoped packages.
pub fn strip_version_qualifier(dep: &str) -> String {
    let dep = dep.trim();
    if let Some(rest) = dep.strip_prefix('@') {
        return match rest.find('@') {
            Some(idx) => dep[..idx + 1].to_string(),
            None => dep.to_string(),
        };
    }
    let end = dep
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | '[' | '@' | ';' | '^') || c.is_whitespace())
        .unwrap_or(dep.len());
    dep[..end].to_string()
}

/// Import name for a Python distribution name.
pub fn python_module_name(package: &str) -> String {
    let lowered = package.to_lowercase();
    PYTHON_MODULE_ALIASES
        .iter()
        .find(|(dist, _)| *dist == lowered)
        .map(|(_, module)| module.to_string())
        .unwrap_or_else(|| package.replace('-', "_"))
}

/// Looks up and installs packages for one host.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver {
    python: Option<String>,
    work_dir: Option<PathBuf>,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific Python interpreter instead of the first on `PATH`.
    pub fn with_python(mut self, program: impl Into<String>) -> Self {
        self.python = Some(program.into());
        self
    }

    /// Directory npm installs into and resolves from.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    fn python_program(&self) -> Option<String> {
        if let Some(python) = &self.python {
            return Some(python.clone());
        }
        ["python3", "python"]
            .iter()
            .find_map(|name| find_executable(name))
            .map(|p| p.to_string_lossy().into_owned())
    }

    /// Declared dependencies that cannot be resolved on this host.
    ///
    /// The result is always a subset of `deps`, in declaration order. When
    /// the lookup itself fails every dependency is reported missing.
    pub async fn missing(&self, language: Language, deps: &[String]) -> Vec<String> {
        let deps: Vec<String> = deps
            .iter()
            .filter(|d| !d.trim().is_empty())
            .cloned()
            .collect();
        if deps.is_empty() {
            return Vec::new();
        }
        let Some(ecosystem) = PackageEcosystem::for_language(language) else {
            return Vec::new();
        };

        match self.lookup(ecosystem, &deps).await {
            Ok(indices) => indices
                .into_iter()
                .filter_map(|idx| deps.get(idx).cloned())
                .collect(),
            Err(err) => {
                warn!(language = %language, error = %err, "dependency lookup failed");
                deps
            }
        }
    }

    async fn lookup(&self, ecosystem: PackageEcosystem, deps: &[String]) -> Result<Vec<usize>> {
        let spec = match ecosystem {
            PackageEcosystem::Pip => {
                let names: Vec<String> = deps
                    .iter()
                    .map(|d| python_module_name(&strip_version_qualifier(d)))
                    .collect();
                let python = self
                    .python_program()
                    .ok_or_else(|| EnvError::ExecutableNotFound("python3".to_string()))?;
                CommandSpec::new(python)
                    .arg("-c")
                    .arg(PYTHON_LOOKUP)
                    .arg(serde_json::to_string(&names)?)
            }
            PackageEcosystem::Npm => {
                let names: Vec<String> = deps.iter().map(|d| strip_version_qualifier(d)).collect();
                CommandSpec::new("node")
                    .arg("-e")
                    .arg(NODE_LOOKUP)
                    .arg(serde_json::to_string(&names)?)
            }
        };
        let spec = match &self.work_dir {
            Some(dir) => spec.with_work_dir(dir),
            None => spec,
        };

        let output = run_captured(&spec, Some(LOOKUP_TIMEOUT), &CancellationToken::new()).await?;
        if output.termination == Termination::TimedOut {
            return Err(EnvError::Timeout(spec.program.clone()));
        }
        let last_line = output
            .stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or_default();
        serde_json::from_str::<Vec<usize>>(last_line.trim()).map_err(|_| {
            EnvError::UnexpectedOutput {
                program: spec.program.clone(),
                detail: output.combined_output(),
            }
        })
    }

    /// Install dependencies with the host package manager.
    ///
    /// Never returns an error: spawn failures, non-zero exits and
    /// cancellation are all reported through [`InstallLog`].
    pub async fn install(
        &self,
        language: Language,
        deps: &[String],
        cancel: &CancellationToken,
    ) -> InstallLog {
        let deps: Vec<&String> = deps.iter().filter(|d| !d.trim().is_empty()).collect();
        if deps.is_empty() {
            return InstallLog {
                success: true,
                output: "No dependencies to install.".to_string(),
            };
        }
        let Some(ecosystem) = PackageEcosystem::for_language(language) else {
            return InstallLog {
                success: true,
                output: format!("No package manager is configured for {language}; nothing installed."),
            };
        };

        let spec = match ecosystem {
            PackageEcosystem::Pip => match self.python_program() {
                Some(python) => CommandSpec::new(python).with_args(["-m", "pip", "install"]),
                None => {
                    return InstallLog {
                        success: false,
                        output: "Python interpreter not found; cannot run pip.".to_string(),
                    }
                }
            },
            PackageEcosystem::Npm => CommandSpec::new("npm").with_args(["install", "--no-save"]),
        };
        let mut spec = deps.iter().fold(spec, |spec, dep| spec.arg(dep.as_str()));
        if let Some(dir) = &self.work_dir {
            spec = spec.with_work_dir(dir);
        }

        info!(command = %spec.display(), "installing dependencies");
        match run_captured(&spec, Some(INSTALL_TIMEOUT), cancel).await {
            Ok(output) => match output.termination {
                Termination::Cancelled => InstallLog {
                    success: false,
                    output: format!("Installation cancelled.\n{}", output.combined_output()),
                },
                Termination::TimedOut => InstallLog {
                    success: false,
                    output: format!(
                        "Installation timed out after {}s.\n{}",
                        INSTALL_TIMEOUT.as_secs(),
                        output.combined_output()
                    ),
                },
                Termination::Exited if output.success() => {
                    debug!("dependency installation succeeded");
                    InstallLog {
                        success: true,
                        output: output.combined_output(),
                    }
                }
                Termination::Exited => InstallLog {
                    success: false,
                    output: format!(
                        "Installation failed (exit code {}):\n{}",
                        output
                            .exit_code
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| "unknown".to_string()),
                        output.combined_output()
                    ),
                },
            },
            Err(err) => InstallLog {
                success: false,
                output: format!("Installation could not start: {err}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_version_qualifier_pip() {
        assert_eq!(strip_version_qualifier("pandas==2.1.0"), "pandas");
        assert_eq!(strip_version_qualifier("numpy>=1.24"), "numpy");
        assert_eq!(strip_version_qualifier("requests<=2.31"), "requests");
        assert_eq!(strip_version_qualifier("flask~=3.0"), "flask");
        assert_eq!(strip_version_qualifier("django!=4.0"), "django");
        assert_eq!(strip_version_qualifier("uvicorn[standard]>0.20"), "uvicorn");
        assert_eq!(strip_version_qualifier("  scipy  "), "scipy");
        assert_eq!(strip_version_qualifier("tomli; python_version < '3.11'"), "tomli");
    }

    #[test]
    fn test_strip_version_qualifier_npm() {
        assert_eq!(strip_version_qualifier("lodash@4.17.21"), "lodash");
        assert_eq!(strip_version_qualifier("@types/node@18"), "@types/node");
        assert_eq!(strip_version_qualifier("@scope/pkg"), "@scope/pkg");
        assert_eq!(strip_version_qualifier("express^4"), "express");
    }

    #[test]
    fn test_python_module_aliases() {
        assert_eq!(python_module_name("scikit-learn"), "sklearn");
        assert_eq!(python_module_name("Pillow"), "PIL");
        assert_eq!(python_module_name("typing-extensions"), "typing_extensions");
        assert_eq!(python_module_name("pandas"), "pandas");
    }

    #[tokio::test]
    async fn test_languages_without_resolver_report_nothing() {
        let resolver = DependencyResolver::new();
        let deps = vec!["boost".to_string()];
        assert!(resolver.missing(Language::Cpp, &deps).await.is_empty());

        let log = resolver
            .install(Language::Cpp, &deps, &CancellationToken::new())
            .await;
        assert!(log.success);
    }

    #[tokio::test]
    async fn test_empty_install_is_a_noop() {
        let log = DependencyResolver::new()
            .install(Language::Python, &[], &CancellationToken::new())
            .await;
        assert!(log.success);
        assert!(log.output.contains("No dependencies"));
    }

    #[tokio::test]
    async fn test_failed_lookup_reports_everything_missing() {
        let resolver = DependencyResolver::new().with_python("definitely-not-a-real-python");
        let deps = vec!["json".to_string(), "math".to_string()];
        assert_eq!(resolver.missing(Language::Python, &deps).await, deps);
    }

    #[tokio::test]
    async fn test_install_spawn_failure_is_reported_not_raised() {
        let resolver = DependencyResolver::new().with_python("definitely-not-a-real-python");
        let log = resolver
            .install(Language::Python, &["six".to_string()], &CancellationToken::new())
            .await;
        assert!(!log.success);
        assert!(log.output.contains("could not start"));
    }
}
