//! Python execution through a wrapper harness.
//!
//! The harness compiles the snippet under the name `<generated>`, executes it
//! in a fresh namespace seeded with the snippet's capability set, redirects
//! the standard streams into buffers for the call and restores them in a
//! `finally`. It writes a JSON envelope describing the result to
//! `envelope.json` in the attempt directory; anything the child prints to the
//! real standard streams is stray output. A run that leaves no envelope is
//! always a fault.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use toolchain_env::{find_executable, probe_language, run_captured, CommandSpec, Language, ProbeReport};
use tracing::{debug, warn};

use super::imports::capability_set;
use super::subprocess::classify_stderr;
use super::{interrupted, setup_failure, ExecutionRequest, LanguageExecutor};
use crate::domain::{excerpt_around, ExecutionOutcome, ExecutionStatus};
use crate::error::Result;

const HARNESS: &str = include_str!("harness.py");
const ENVELOPE_FILE: &str = "envelope.json";
const EXCERPT_RADIUS: u32 = 2;

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    result: Option<String>,
    fault_class: Option<String>,
    fault_line: Option<u32>,
    message: Option<String>,
    #[serde(default = "default_true")]
    streams_restored: bool,
}

fn default_true() -> bool {
    true
}

/// Runs Python snippets through the harness.
#[derive(Debug, Clone, Default)]
pub struct PythonExecutor {
    /// Interpreter override; `None` uses the probed interpreter.
    python: Option<String>,
}

impl PythonExecutor {
    pub fn new(python: Option<String>) -> Self {
        Self {
            python: python.filter(|p| !p.trim().is_empty() && p != "auto"),
        }
    }

    async fn run(&self, request: &ExecutionRequest, toolchain: &ProbeReport) -> Result<ExecutionOutcome> {
        let python = match (&self.python, toolchain.primary_executable()) {
            (Some(python), _) => python.clone(),
            (None, Some(path)) => path.to_string_lossy().into_owned(),
            (None, None) => "python3".to_string(),
        };

        let dir = tempfile::Builder::new()
            .prefix(&request.temp_prefix())
            .tempdir()?;
        let harness = dir.path().join("harness.py");
        let snippet = dir.path().join("snippet.py");
        let bindings = dir.path().join("bindings.json");
        tokio::fs::write(&harness, HARNESS).await?;
        tokio::fs::write(&snippet, &request.code).await?;
        tokio::fs::write(&bindings, serde_json::to_vec(&capability_set(&request.code))?).await?;

        let spec = CommandSpec::new(python)
            .arg("-B")
            .arg(path_arg(&harness))
            .arg(path_arg(&snippet))
            .arg(path_arg(&bindings))
            .arg(path_arg(dir.path()))
            .with_env("PYTHONDONTWRITEBYTECODE", "1")
            .with_env("PYTHONUNBUFFERED", "1")
            .with_env("PYTHONIOENCODING", "utf-8")
            .with_env("MPLBACKEND", "Agg")
            .with_stdin(request.stdin.clone());

        let output = run_captured(&spec, Some(request.timeout), &request.cancel).await?;
        if let Some(mut outcome) = interrupted(request, &output) {
            // Output the snippet produced before it was killed.
            outcome.stdout = read_partial(dir.path(), "stdout.partial").await;
            outcome.stderr = read_partial(dir.path(), "stderr.partial").await;
            return Ok(outcome);
        }

        let mut outcome = match read_envelope(dir.path()).await {
            Some(envelope) => from_envelope(request, envelope, &output.stdout, &output.stderr),
            None => {
                let mut stdout = read_partial(dir.path(), "stdout.partial").await;
                append_stream(&mut stdout, &output.stdout);
                let mut stderr = read_partial(dir.path(), "stderr.partial").await;
                append_stream(&mut stderr, &output.stderr);
                from_bare_exit(request, stdout, stderr, output.exit_code)
            }
        };
        outcome.exit_code = output.exit_code;
        outcome.duration_ms = output.duration_ms;
        if let Some(line) = outcome.fault_line {
            outcome.excerpt = excerpt_around(&request.code, line, EXCERPT_RADIUS);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl LanguageExecutor for PythonExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn probe(&self) -> ProbeReport {
        let Some(python) = &self.python else {
            return probe_language(Language::Python).await;
        };
        match find_executable(python) {
            Some(path) => ProbeReport {
                language: Language::Python.canonical_name().to_string(),
                ready: true,
                message: format!("Python is available at {}", path.display()),
                version: None,
                executables: vec![path],
            },
            None => ProbeReport {
                language: Language::Python.canonical_name().to_string(),
                ready: false,
                message: format!("Configured Python interpreter '{python}' was not found."),
                version: None,
                executables: Vec::new(),
            },
        }
    }

    async fn execute(&self, request: &ExecutionRequest, toolchain: &ProbeReport) -> ExecutionOutcome {
        match self.run(request, toolchain).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "python harness could not run");
                setup_failure(request, &err)
            }
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

async fn read_partial(dir: &Path, name: &str) -> String {
    tokio::fs::read_to_string(dir.join(name))
        .await
        .unwrap_or_default()
}

async fn read_envelope(dir: &Path) -> Option<Envelope> {
    let raw = tokio::fs::read_to_string(dir.join(ENVELOPE_FILE)).await.ok()?;
    parse_envelope(&raw)
}

fn parse_envelope(raw: &str) -> Option<Envelope> {
    match serde_json::from_str(raw) {
        Ok(envelope) => Some(envelope),
        Err(err) => {
            debug!(error = %err, "unreadable harness envelope");
            None
        }
    }
}

/// Append `extra` on its own line unless it is blank.
fn append_stream(base: &mut String, extra: &str) {
    if extra.trim().is_empty() {
        return;
    }
    if !base.is_empty() && !base.ends_with('\n') {
        base.push('\n');
    }
    base.push_str(extra);
}

fn from_envelope(
    request: &ExecutionRequest,
    envelope: Envelope,
    stray_stdout: &str,
    process_stderr: &str,
) -> ExecutionOutcome {
    let status = match envelope.status.as_str() {
        "success" => ExecutionStatus::Success,
        "syntax" => ExecutionStatus::SyntaxFault,
        _ => ExecutionStatus::RuntimeFault,
    };
    if !envelope.streams_restored {
        warn!(
            session_id = %request.session_id,
            attempt = request.attempt_index,
            "standard streams were not restored after execution"
        );
    }

    let mut stdout = envelope.stdout;
    append_stream(&mut stdout, stray_stdout);
    let mut stderr = envelope.stderr;
    append_stream(&mut stderr, process_stderr);

    ExecutionOutcome {
        stdout,
        stderr,
        result_value: envelope.result,
        fault_class: envelope.fault_class,
        fault_line: envelope.fault_line,
        fault_message: envelope.message,
        streams_restored: Some(envelope.streams_restored),
        ..ExecutionOutcome::new(request.attempt_index, status)
    }
}

/// The harness died without reporting (e.g. `os._exit` or a crash). Even a
/// zero exit status is a fault: the snippet never finished normally.
fn from_bare_exit(
    request: &ExecutionRequest,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
) -> ExecutionOutcome {
    let mut fault = classify_stderr(Language::Python, &stderr, "snippet.py", exit_code);
    if exit_code == Some(0) {
        fault.message = Some("the interpreter exited without reporting a result".to_string());
    }
    debug!(?exit_code, class = ?fault.class, "python harness left no envelope");
    ExecutionOutcome {
        stdout,
        stderr,
        fault_class: fault.class,
        fault_line: fault.line,
        fault_message: fault.message,
        ..ExecutionOutcome::new(
            request.attempt_index,
            if fault.syntax {
                ExecutionStatus::SyntaxFault
            } else {
                ExecutionStatus::RuntimeFault
            },
        )
    }
}
