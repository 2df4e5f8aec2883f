//! Toolchain availability checks.
//!
//! A probe looks for the executables a language needs on `PATH`. Version
//! lookup is best-effort: a failing `--version` call never flips readiness.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::guidance::install_guide;
use crate::language::{normalize_language, Language};
use crate::process::{run_captured, CommandSpec, Termination};

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Host operating system family, used to pick executables and guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostOs {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "windows" => HostOs::Windows,
            "macos" => HostOs::MacOs,
            "linux" => HostOs::Linux,
            _ => HostOs::Other,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            HostOs::Windows => "Windows",
            HostOs::MacOs => "macOS",
            HostOs::Linux => "Linux",
            HostOs::Other => "this system",
        }
    }
}

/// Result of checking one language toolchain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Normalized language name as requested.
    pub language: String,
    pub ready: bool,
    /// Display text: version on success, guidance on failure.
    pub message: String,
    pub version: Option<String>,
    /// Resolved executables, one per requirement, when ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub executables: Vec<PathBuf>,
}

impl ProbeReport {
    fn unsupported(language: String) -> Self {
        let message = format!(
            "Cannot verify a toolchain for '{language}'. Make sure it is installed \
             and run the code manually."
        );
        Self {
            language,
            ready: false,
            message,
            version: None,
            executables: Vec::new(),
        }
    }

    /// The first resolved executable (the interpreter or compiler driver).
    pub fn primary_executable(&self) -> Option<&Path> {
        self.executables.first().map(PathBuf::as_path)
    }
}

/// Executables a language needs. Every group must resolve; within a group the
/// first name found on `PATH` wins.
pub fn required_executables(language: Language, os: HostOs) -> &'static [&'static [&'static str]] {
    match language {
        Language::Python => &[&["python3", "python"]],
        Language::JavaScript => &[&["node"], &["npm"]],
        Language::Java => &[&["java"], &["javac"]],
        Language::CSharp => &[&["dotnet"]],
        Language::Cpp if os == HostOs::Windows => &[&["cl", "g++"]],
        Language::Cpp => &[&["g++", "clang++"]],
        Language::Php => &[&["php"]],
        Language::Ruby => &[&["ruby"]],
        Language::R => &[&["Rscript", "R"]],
        Language::Shell => &[&["sh", "bash"]],
    }
}

/// Check a toolchain by free-form language name.
pub async fn probe(language: &str) -> ProbeReport {
    let normalized = normalize_language(language);
    match Language::parse(&normalized) {
        Some(lang) => probe_language(lang).await,
        None => ProbeReport::unsupported(normalized),
    }
}

/// Check the toolchain of a known language on the current host.
pub async fn probe_language(language: Language) -> ProbeReport {
    let os = HostOs::current();
    let mut executables = Vec::new();
    let mut missing = Vec::new();

    for group in required_executables(language, os) {
        match group.iter().find_map(|name| find_executable(name)) {
            Some(path) => executables.push(path),
            None => missing.push(group.join(" or ")),
        }
    }

    if !missing.is_empty() {
        debug!(language = %language, missing = ?missing, "toolchain not ready");
        return ProbeReport {
            language: language.canonical_name().to_string(),
            ready: false,
            message: format!(
                "{} is not installed or not on PATH (missing: {}).\n{}",
                language.display_name(),
                missing.join(", "),
                install_guide(language, os)
            ),
            version: None,
            executables: Vec::new(),
        };
    }

    let version = match executables.first() {
        Some(exe) => version_of(language, exe).await,
        None => None,
    };
    let message = match &version {
        Some(v) => format!("{} is available: {}", language.display_name(), v),
        None => format!("{} is available", language.display_name()),
    };

    ProbeReport {
        language: language.canonical_name().to_string(),
        ready: true,
        message,
        version,
        executables,
    }
}

/// Locate an executable on `PATH`. Names containing a path separator are
/// checked directly.
pub fn find_executable(name: &str) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        return is_executable(direct).then(|| direct.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    let suffixes = executable_suffixes();
    for dir in std::env::split_paths(&search) {
        for suffix in &suffixes {
            let candidate = dir.join(format!("{name}{suffix}"));
            if is_executable(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

fn executable_suffixes() -> Vec<String> {
    let mut suffixes = vec![String::new()];
    if cfg!(windows) {
        let pathext = std::env::var("PATHEXT").unwrap_or_else(|_| ".EXE;.CMD;.BAT".to_string());
        suffixes.extend(
            pathext
                .split(';')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase()),
        );
    }
    suffixes
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

async fn version_of(language: Language, exe: &Path) -> Option<String> {
    let flag = match language {
        Language::Java => "-version",
        Language::Shell => return None,
        _ => "--version",
    };
    let spec = CommandSpec::new(exe.to_string_lossy()).arg(flag);
    let output = run_captured(&spec, Some(VERSION_TIMEOUT), &CancellationToken::new())
        .await
        .ok()?;
    if output.termination != Termination::Exited {
        return None;
    }
    output
        .stdout
        .lines()
        .chain(output.stderr.lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}
