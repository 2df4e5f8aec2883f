//! Language executor registry.
//!
//! Executors are strategies keyed by canonical language. The registry probes
//! a toolchain before its first use (caching the report), refuses to run code
//! whose toolchain is not ready, and never invokes a strategy for an unknown
//! language.

pub mod imports;
pub mod python;
pub mod subprocess;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use toolchain_env::{normalize_language, probe_language, Language, ProbeReport, ProcessOutput, Termination};
use tracing::debug;

use crate::domain::{
    ExecutionOutcome, ExecutionStatus, CANCELLED_FAULT_CLASS, TIMEOUT_FAULT_CLASS,
};
use crate::metrics::METRICS;

pub use python::PythonExecutor;
pub use subprocess::SubprocessExecutor;

/// Default per-attempt time limit.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything an executor needs for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub session_id: String,
    pub attempt_index: u32,
    pub language: String,
    pub code: String,
    pub timeout: Duration,
    /// Data fed to the program's standard input.
    pub stdin: Option<String>,
    pub cancel: CancellationToken,
}

impl ExecutionRequest {
    pub fn new(language: &str, code: impl Into<String>) -> Self {
        Self {
            session_id: "adhoc".to_string(),
            attempt_index: 0,
            language: normalize_language(language),
            code: code.into(),
            timeout: DEFAULT_TIMEOUT,
            stdin: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>, attempt_index: u32) -> Self {
        self.session_id = session_id.into();
        self.attempt_index = attempt_index;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Prefix for per-attempt temporary directories.
    pub(crate) fn temp_prefix(&self) -> String {
        let session: String = self
            .session_id
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .take(36)
            .collect();
        format!("codemend-{}-{}-", session, self.attempt_index)
    }
}

/// A strategy that runs code for one language.
#[async_trait]
pub trait LanguageExecutor: Send + Sync {
    fn language(&self) -> Language;

    /// Check the toolchain. The registry caches the result.
    async fn probe(&self) -> ProbeReport {
        probe_language(self.language()).await
    }

    /// Run one attempt. Faults are reported on the outcome, never raised.
    async fn execute(&self, request: &ExecutionRequest, toolchain: &ProbeReport) -> ExecutionOutcome;
}

/// Strategy table with a per-registry probe cache.
pub struct ExecutorRegistry {
    strategies: HashMap<Language, Arc<dyn LanguageExecutor>>,
    probes: Mutex<HashMap<Language, ProbeReport>>,
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::with_defaults(None)
    }
}

impl ExecutorRegistry {
    /// A registry with no strategies.
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
            probes: Mutex::new(HashMap::new()),
        }
    }

    /// The harness-based Python executor plus a subprocess strategy for
    /// every other known language.
    pub fn with_defaults(python_executable: Option<String>) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PythonExecutor::new(python_executable)));
        for language in Language::ALL {
            if language != Language::Python {
                registry.register(Arc::new(SubprocessExecutor::new(language)));
            }
        }
        registry
    }

    /// Register a strategy, replacing any previous one for its language.
    pub fn register(&mut self, executor: Arc<dyn LanguageExecutor>) -> Option<Arc<dyn LanguageExecutor>> {
        self.strategies.insert(executor.language(), executor)
    }

    pub fn supports(&self, language: &str) -> bool {
        self.resolve(language).is_some()
    }

    fn resolve(&self, language: &str) -> Option<(Language, &Arc<dyn LanguageExecutor>)> {
        let language = Language::parse(language)?;
        self.strategies.get(&language).map(|s| (language, s))
    }

    /// Toolchain report for a language name. Unknown names are never ready.
    pub async fn probe(&self, language: &str) -> ProbeReport {
        match self.resolve(language) {
            Some((language, strategy)) => self.cached_probe(language, strategy).await,
            None => toolchain_env::probe(language).await,
        }
    }

    async fn cached_probe(&self, language: Language, strategy: &Arc<dyn LanguageExecutor>) -> ProbeReport {
        if let Some(report) = self.probes.lock().await.get(&language) {
            return report.clone();
        }
        let report = strategy.probe().await;
        debug!(language = %language, ready = report.ready, "toolchain probed");
        self.probes
            .lock()
            .await
            .entry(language)
            .or_insert(report)
            .clone()
    }

    /// Run one attempt through the matching strategy.
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        let Some((language, strategy)) = self.resolve(&request.language) else {
            return ExecutionOutcome::toolchain_unavailable(
                request.attempt_index,
                format!(
                    "No executor is available for '{}'; manual execution required.",
                    normalize_language(&request.language)
                ),
            );
        };

        let report = self.cached_probe(language, strategy).await;
        if !report.ready {
            return ExecutionOutcome::toolchain_unavailable(request.attempt_index, report.message);
        }
        if request.cancel.is_cancelled() {
            return cancelled(request, String::new(), String::new());
        }

        METRICS.inc_executions();
        let started = Instant::now();
        let mut outcome = strategy.execute(request, &report).await;
        outcome.attempt_index = request.attempt_index;
        if outcome.duration_ms == 0 {
            outcome.duration_ms = started.elapsed().as_millis() as u64;
        }
        if outcome.is_timeout() {
            METRICS.inc_timeouts();
        }
        outcome
    }
}

/// Outcome for a child that was killed rather than exiting, if it was.
pub(crate) fn interrupted(request: &ExecutionRequest, output: &ProcessOutput) -> Option<ExecutionOutcome> {
    match output.termination {
        Termination::Exited => None,
        Termination::TimedOut => Some(ExecutionOutcome {
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
            fault_class: Some(TIMEOUT_FAULT_CLASS.to_string()),
            fault_message: Some(format!(
                "execution exceeded the {} ms time limit and was terminated",
                request.timeout.as_millis()
            )),
            duration_ms: output.duration_ms,
            ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::RuntimeFault)
        }),
        Termination::Cancelled => Some(ExecutionOutcome {
            duration_ms: output.duration_ms,
            ..cancelled(request, output.stdout.clone(), output.stderr.clone())
        }),
    }
}

fn cancelled(request: &ExecutionRequest, stdout: String, stderr: String) -> ExecutionOutcome {
    ExecutionOutcome {
        stdout,
        stderr,
        fault_class: Some(CANCELLED_FAULT_CLASS.to_string()),
        fault_message: Some("execution was cancelled".to_string()),
        ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::RuntimeFault)
    }
}

/// Outcome for an executor that could not even set up the attempt.
pub(crate) fn setup_failure(request: &ExecutionRequest, err: &dyn std::fmt::Display) -> ExecutionOutcome {
    ExecutionOutcome {
        fault_class: Some("ExecutionError".to_string()),
        fault_message: Some(err.to_string()),
        ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::RuntimeFault)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingExecutor {
        language: Language,
        ready: bool,
        probes: AtomicU32,
        executions: AtomicU32,
    }

    impl CountingExecutor {
        fn new(language: Language, ready: bool) -> Arc<Self> {
            Arc::new(Self {
                language,
                ready,
                probes: AtomicU32::new(0),
                executions: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageExecutor for CountingExecutor {
        fn language(&self) -> Language {
            self.language
        }

        async fn probe(&self) -> ProbeReport {
            self.probes.fetch_add(1, Ordering::SeqCst);
            ProbeReport {
                language: self.language.to_string(),
                ready: self.ready,
                message: if self.ready { "ok" } else { "install it" }.to_string(),
                version: None,
                executables: Vec::new(),
            }
        }

        async fn execute(&self, request: &ExecutionRequest, _toolchain: &ProbeReport) -> ExecutionOutcome {
            self.executions.fetch_add(1, Ordering::SeqCst);
            ExecutionOutcome {
                stdout: request.code.clone(),
                ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::Success)
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_language_is_toolchain_unavailable() {
        let registry = ExecutorRegistry::empty();
        let outcome = registry.execute(&ExecutionRequest::new("cobol", "DISPLAY 'X'")).await;
        assert_eq!(outcome.status, ExecutionStatus::ToolchainUnavailable);
        assert!(outcome
            .fault_message
            .unwrap()
            .contains("manual execution required"));
    }

    #[tokio::test]
    async fn test_not_ready_probe_skips_strategy() {
        let exec = CountingExecutor::new(Language::Ruby, false);
        let mut registry = ExecutorRegistry::empty();
        registry.register(exec.clone());

        let outcome = registry.execute(&ExecutionRequest::new("rb", "puts 1")).await;
        assert_eq!(outcome.status, ExecutionStatus::ToolchainUnavailable);
        assert_eq!(outcome.fault_message.as_deref(), Some("install it"));
        assert_eq!(exec.executions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_is_cached_per_registry() {
        let exec = CountingExecutor::new(Language::Php, true);
        let mut registry = ExecutorRegistry::empty();
        registry.register(exec.clone());

        for attempt in 0..3 {
            let request = ExecutionRequest::new("php", "echo 1;").with_session("s", attempt);
            let outcome = registry.execute(&request).await;
            assert!(outcome.is_success());
            assert_eq!(outcome.attempt_index, attempt);
        }
        assert_eq!(exec.probes.load(Ordering::SeqCst), 1);
        assert_eq!(exec.executions.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_request_never_runs() {
        let exec = CountingExecutor::new(Language::Shell, true);
        let mut registry = ExecutorRegistry::empty();
        registry.register(exec.clone());

        let token = CancellationToken::new();
        token.cancel();
        let outcome = registry
            .execute(&ExecutionRequest::new("sh", "echo 1").with_cancel(token))
            .await;
        assert!(outcome.is_cancelled());
        assert_eq!(exec.executions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_temp_prefix_is_sanitized() {
        let request = ExecutionRequest::new("python", "").with_session("ab/../c d", 4);
        assert_eq!(request.temp_prefix(), "codemend-abcd-4-");
    }

    #[test]
    fn test_default_registry_covers_every_language() {
        let registry = ExecutorRegistry::default();
        for language in Language::ALL {
            assert!(registry.supports(language.canonical_name()));
        }
        assert!(registry.supports("node"));
        assert!(!registry.supports("cobol"));
    }
}
