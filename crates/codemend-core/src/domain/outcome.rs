//! Execution outcomes.

use serde::{Deserialize, Serialize};

/// Fault class recorded when an attempt runs past its deadline.
pub const TIMEOUT_FAULT_CLASS: &str = "TimeoutError";

/// Fault class recorded when the caller cancels an attempt.
pub const CANCELLED_FAULT_CLASS: &str = "Cancelled";

/// Fault class recorded when a compile step fails.
pub const COMPILE_FAULT_CLASS: &str = "CompileError";

/// How an execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    RuntimeFault,
    SyntaxFault,
    ToolchainUnavailable,
}

/// Captured result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub attempt_index: u32,
    /// Index into the session's artifact chain.
    pub artifact_version: usize,
    pub status: ExecutionStatus,
    pub stdout: String,
    pub stderr: String,
    /// Rendered value of `result` after a Python run, when non-null.
    pub result_value: Option<String>,
    pub fault_class: Option<String>,
    /// Line number relative to the executed snippet, 1-based.
    pub fault_line: Option<u32>,
    pub fault_message: Option<String>,
    /// Source lines around the fault line.
    pub excerpt: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Whether the Python harness put the standard streams back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streams_restored: Option<bool>,
}

impl ExecutionOutcome {
    /// An outcome with only the status set; executors fill in the rest.
    pub fn new(attempt_index: u32, status: ExecutionStatus) -> Self {
        Self {
            attempt_index,
            artifact_version: 0,
            status,
            stdout: String::new(),
            stderr: String::new(),
            result_value: None,
            fault_class: None,
            fault_line: None,
            fault_message: None,
            excerpt: None,
            exit_code: None,
            duration_ms: 0,
            streams_restored: None,
        }
    }

    pub fn toolchain_unavailable(attempt_index: u32, message: impl Into<String>) -> Self {
        Self {
            fault_message: Some(message.into()),
            ..Self::new(attempt_index, ExecutionStatus::ToolchainUnavailable)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Faults that a code fix can address.
    pub fn is_fault(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::RuntimeFault | ExecutionStatus::SyntaxFault
        )
    }

    pub fn is_timeout(&self) -> bool {
        self.fault_class.as_deref() == Some(TIMEOUT_FAULT_CLASS)
    }

    pub fn is_cancelled(&self) -> bool {
        self.fault_class.as_deref() == Some(CANCELLED_FAULT_CLASS)
    }

    /// One-line fault summary such as `ZeroDivisionError at line 3: division by zero`.
    pub fn fault_summary(&self) -> Option<String> {
        if !self.is_fault() && self.status != ExecutionStatus::ToolchainUnavailable {
            return None;
        }
        let class = self.fault_class.as_deref().unwrap_or("Error");
        let mut summary = class.to_string();
        if let Some(line) = self.fault_line {
            summary.push_str(&format!(" at line {line}"));
        }
        if let Some(message) = self.fault_message.as_deref().filter(|m| !m.is_empty()) {
            summary.push_str(": ");
            summary.push_str(message);
        }
        Some(summary)
    }

    /// Text handed to the collaborator when asking for a fix.
    pub fn fault_text(&self) -> String {
        let mut text = self.fault_summary().unwrap_or_default();
        if let Some(excerpt) = &self.excerpt {
            text.push_str("\n\nCode around the fault:\n");
            text.push_str(excerpt);
        }
        if !self.stderr.trim().is_empty() {
            text.push_str("\n\nStandard error:\n");
            text.push_str(self.stderr.trim_end());
        }
        text
    }
}

/// Render source lines around `line` (1-based) with a marker on the fault line.
pub fn excerpt_around(source: &str, line: u32, radius: u32) -> Option<String> {
    let lines: Vec<&str> = source.lines().collect();
    let line = line as usize;
    if line == 0 || line > lines.len() {
        return None;
    }
    let radius = radius as usize;
    let first = line.saturating_sub(radius).max(1);
    let last = (line + radius).min(lines.len());
    let width = last.to_string().len();
    let rendered = (first..=last)
        .map(|n| {
            let marker = if n == line { ">" } else { " " };
            format!("{marker} {n:>width$} | {}", lines[n - 1])
        })
        .collect::<Vec<_>>()
        .join("\n");
    Some(rendered)
}
