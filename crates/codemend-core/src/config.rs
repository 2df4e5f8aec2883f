//! Pipeline configuration.
//!
//! Every field has a default, so a TOML file only needs the keys it changes:
//!
//! ```toml
//! max_attempts = 5
//! timeout_ms = 10000
//! stagnation = "exact"
//! artifacts_dir = "target/codemend"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CodemendError, Result};
use crate::repair::{RepairPolicy, StagnationCheck};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Maximum fix requests per session.
    pub max_attempts: u32,
    /// Per-attempt execution time limit in milliseconds.
    pub timeout_ms: u64,
    /// Install missing dependencies before running.
    pub install_dependencies: bool,
    /// Detect interactive input and synthesize test data.
    pub analyze_input: bool,
    pub stagnation: StagnationCheck,
    /// Interpreter for Python snippets; `"auto"` probes `PATH`.
    pub python_executable: String,
    /// Where session audit artifacts are written; unset disables them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout_ms: 30_000,
            install_dependencies: true,
            analyze_input: true,
            stagnation: StagnationCheck::Normalized,
            python_executable: "auto".to_string(),
            artifacts_dir: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| CodemendError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
            .map_err(|e| CodemendError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(CodemendError::Config("timeout_ms must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Interpreter override, or `None` to probe.
    pub fn python_override(&self) -> Option<String> {
        let python = self.python_executable.trim();
        (!python.is_empty() && python != "auto").then(|| python.to_string())
    }

    pub fn repair_policy(&self) -> RepairPolicy {
        RepairPolicy {
            max_attempts: self.max_attempts,
            timeout: self.timeout(),
            stagnation: self.stagnation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.python_override().is_none());
        assert_eq!(config.repair_policy(), RepairPolicy::default());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml_str(
            "max_attempts = 0\nstagnation = \"exact\"\npython_executable = \"/opt/py/bin/python3\"\n",
        )
        .unwrap();
        assert_eq!(config.max_attempts, 0);
        assert_eq!(config.stagnation, StagnationCheck::Exact);
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.python_override().as_deref(), Some("/opt/py/bin/python3"));
    }

    #[test]
    fn test_rejects_unknown_keys_and_zero_timeout() {
        assert!(matches!(
            PipelineConfig::from_toml_str("max_attempt = 2"),
            Err(CodemendError::Config(_))
        ));
        assert!(PipelineConfig::from_toml_str("timeout_ms = 0").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codemend.toml");
        std::fs::write(&path, "analyze_input = false\n").unwrap();
        let config = PipelineConfig::from_toml_file(&path).unwrap();
        assert!(!config.analyze_input);
        assert!(PipelineConfig::from_toml_file(&dir.path().join("absent.toml")).is_err());
    }
}
