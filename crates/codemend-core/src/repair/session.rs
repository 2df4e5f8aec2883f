//! The audit trail of one repair session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Advisory, ArtifactChain, CodeArtifact, ExecutionOutcome, FixAttempt};

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    Succeeded,
    AttemptsExhausted,
    /// A fix call failed or returned unchanged code.
    Stalled,
    /// The toolchain was unavailable or the language unknown.
    NotExecuted,
    Cancelled,
}

impl FinalStatus {
    pub fn label(&self) -> &'static str {
        match self {
            FinalStatus::Succeeded => "succeeded",
            FinalStatus::AttemptsExhausted => "attempts exhausted",
            FinalStatus::Stalled => "stalled",
            FinalStatus::NotExecuted => "not executed",
            FinalStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FinalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One record in the session timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEntry {
    Execution(ExecutionOutcome),
    Fix(FixAttempt),
}

/// Ordered executions and fixes for one code task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSession {
    pub session_id: String,
    pub task: String,
    pub max_attempts: u32,
    pub chain: ArtifactChain,
    pub entries: Vec<SessionEntry>,
    /// Findings from the stages before the loop.
    #[serde(default)]
    pub advisories: Vec<Advisory>,
    /// Data fed to standard input on every attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Source of the last artifact handed to an executor.
    pub final_code: String,
    /// `None` while the loop is running.
    pub final_status: Option<FinalStatus>,
    pub total_fix_count: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RepairSession {
    pub fn new(
        session_id: impl Into<String>,
        task: impl Into<String>,
        artifact: CodeArtifact,
        max_attempts: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            task: task.into(),
            max_attempts,
            final_code: artifact.source.clone(),
            chain: ArtifactChain::new(artifact),
            entries: Vec::new(),
            advisories: Vec::new(),
            stdin: None,
            final_status: None,
            total_fix_count: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn language(&self) -> &str {
        &self.chain.latest().language
    }

    pub(crate) fn record_execution(&mut self, outcome: ExecutionOutcome) {
        debug_assert!(self
            .outcomes()
            .last()
            .map_or(true, |prev| prev.attempt_index < outcome.attempt_index));
        self.entries.push(SessionEntry::Execution(outcome));
    }

    pub(crate) fn record_fix(&mut self, fix: FixAttempt) {
        self.total_fix_count += 1;
        self.entries.push(SessionEntry::Fix(fix));
    }

    pub(crate) fn finish(&mut self, status: FinalStatus) {
        self.final_status = Some(status);
        self.finished_at = Some(Utc::now());
    }

    pub fn outcomes(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.entries.iter().filter_map(|e| match e {
            SessionEntry::Execution(outcome) => Some(outcome),
            SessionEntry::Fix(_) => None,
        })
    }

    pub fn fixes(&self) -> impl Iterator<Item = &FixAttempt> {
        self.entries.iter().filter_map(|e| match e {
            SessionEntry::Fix(fix) => Some(fix),
            SessionEntry::Execution(_) => None,
        })
    }

    pub fn execution_count(&self) -> usize {
        self.outcomes().count()
    }

    pub fn last_outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcomes().last()
    }

    pub fn succeeded(&self) -> bool {
        self.final_status == Some(FinalStatus::Succeeded)
    }
}
