//! Bounded execute-fix loop.
//!
//! Attempt *i* executes the latest artifact. Success ends the session. A
//! fault with attempts left asks the collaborator for a fix; a failed call or
//! an unchanged fix stalls the session without another execution. With
//! `max_attempts = N` the loop makes at most `N + 1` executions and `N` fix
//! requests.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, Instrument};

use super::session::{FinalStatus, RepairSession};
use crate::domain::{Advisory, CodeArtifact, ExecutionStatus, FixAttempt, FixDisposition};
use crate::executor::{ExecutionRequest, ExecutorRegistry, DEFAULT_TIMEOUT};
use crate::generation::{CodeGenerator, FixRequest};
use crate::metrics::METRICS;
use crate::obs;
use crate::parser::{parse, ResponseSchema};

/// How a proposed fix is compared with the code it replaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagnationCheck {
    /// Byte-for-byte comparison.
    Exact,
    /// Ignore line endings, trailing whitespace and surrounding blank lines.
    #[default]
    Normalized,
}

impl StagnationCheck {
    pub fn is_unchanged(&self, before: &str, after: &str) -> bool {
        match self {
            StagnationCheck::Exact => before == after,
            StagnationCheck::Normalized => normalize_source(before) == normalize_source(after),
        }
    }
}

fn normalize_source(source: &str) -> String {
    let lines: Vec<&str> = source
        .split('\n')
        .map(|l| l.trim_end_matches(['\r', ' ', '\t']))
        .collect();
    let first = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let last = lines.iter().rposition(|l| !l.is_empty()).map_or(first, |i| i + 1);
    lines[first..last.max(first)].join("\n")
}

/// Bounds for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairPolicy {
    /// Maximum number of fix requests.
    pub max_attempts: u32,
    /// Per-attempt execution time limit.
    pub timeout: Duration,
    pub stagnation: StagnationCheck,
}

impl Default for RepairPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: DEFAULT_TIMEOUT,
            stagnation: StagnationCheck::default(),
        }
    }
}

/// Inputs for one session.
#[derive(Debug, Clone)]
pub struct RepairContext {
    pub session_id: String,
    pub task: String,
    pub artifact: CodeArtifact,
    pub stdin: Option<String>,
    pub advisories: Vec<Advisory>,
    pub cancel: CancellationToken,
}

impl RepairContext {
    pub fn new(task: impl Into<String>, artifact: CodeArtifact) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            artifact,
            stdin: None,
            advisories: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn with_advisories(mut self, advisories: Vec<Advisory>) -> Self {
        self.advisories = advisories;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Drives one session through the registry and the collaborator.
pub struct RepairLoop<'a> {
    registry: &'a ExecutorRegistry,
    generator: &'a dyn CodeGenerator,
    policy: RepairPolicy,
}

impl<'a> RepairLoop<'a> {
    pub fn new(registry: &'a ExecutorRegistry, generator: &'a dyn CodeGenerator, policy: RepairPolicy) -> Self {
        Self {
            registry,
            generator,
            policy,
        }
    }

    pub fn policy(&self) -> &RepairPolicy {
        &self.policy
    }

    /// Run the session to a final status. Never fails; every attempt, fault
    /// and fix is kept on the returned session.
    pub async fn run(&self, ctx: RepairContext) -> RepairSession {
        let span = obs::session_span(&ctx.session_id);
        self.run_inner(ctx).instrument(span).await
    }

    async fn run_inner(&self, ctx: RepairContext) -> RepairSession {
        let RepairContext {
            session_id,
            task,
            artifact,
            stdin,
            advisories,
            cancel,
        } = ctx;
        let mut session = RepairSession::new(&session_id, &task, artifact, self.policy.max_attempts);
        session.advisories = advisories;
        session.stdin = stdin.clone();
        obs::emit_session_started(&session_id, session.language(), self.policy.max_attempts);

        let mut attempt = 0u32;
        let status = loop {
            let version = session.chain.latest_version();
            let current = session.chain.latest().clone();
            let request = ExecutionRequest::new(&current.language, current.source.clone())
                .with_session(&session_id, attempt)
                .with_timeout(self.policy.timeout)
                .with_stdin(stdin.clone())
                .with_cancel(cancel.clone());

            let mut outcome = self.registry.execute(&request).await;
            outcome.artifact_version = version;
            session.final_code = current.source.clone();
            obs::emit_attempt_executed(&session_id, &outcome);

            let status = outcome.status;
            let cancelled = outcome.is_cancelled();
            let fault_text = outcome.fault_text();
            session.record_execution(outcome);

            match status {
                ExecutionStatus::Success => break FinalStatus::Succeeded,
                ExecutionStatus::ToolchainUnavailable => break FinalStatus::NotExecuted,
                _ if cancelled => break FinalStatus::Cancelled,
                ExecutionStatus::RuntimeFault | ExecutionStatus::SyntaxFault => {}
            }
            if attempt >= self.policy.max_attempts {
                break FinalStatus::AttemptsExhausted;
            }

            let fix_request = FixRequest {
                task: task.clone(),
                language: current.language.clone(),
                code: current.source.clone(),
                fault_text,
                attempt_index: attempt,
            };
            METRICS.inc_fix_requests();
            obs::emit_fix_requested(&session_id, attempt);
            let response = tokio::select! {
                _ = cancel.cancelled() => break FinalStatus::Cancelled,
                response = self.generator.fix(&fix_request) => response,
            };

            let response = match response {
                Ok(response) => response,
                Err(err) => {
                    session.record_fix(FixAttempt::generation_failed(
                        attempt,
                        current.source.clone(),
                        err.to_string(),
                    ));
                    break FinalStatus::Stalled;
                }
            };

            let fields = parse(&response, &ResponseSchema::FIX);
            let fixed = fields.text("fixed_code").to_string();
            let unchanged =
                fixed.trim().is_empty() || self.policy.stagnation.is_unchanged(&current.source, &fixed);
            let mut fix = FixAttempt {
                attempt_index: attempt,
                error_analysis: fields.text("error_analysis").to_string(),
                fix_approach: fields.text("fix_approach").to_string(),
                original_code: current.source.clone(),
                fixed_code: (!fixed.trim().is_empty()).then(|| fixed.clone()),
                disposition: FixDisposition::Unchanged,
                failure: None,
            };
            if unchanged {
                debug!(attempt, "fix returned no new code");
                session.record_fix(fix);
                break FinalStatus::Stalled;
            }

            fix.disposition = FixDisposition::Modified;
            session.record_fix(fix);
            session.chain.push(current.revised(fixed));
            attempt += 1;
        };

        if status == FinalStatus::Stalled {
            METRICS.inc_stalls();
        }
        session.finish(status);
        obs::emit_session_finished(
            &session_id,
            status.label(),
            session.execution_count(),
            session.total_fix_count,
        );
        session
    }
}
