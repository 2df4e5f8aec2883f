//! Structured observability hooks for repair session lifecycle events.
//!
//! This module provides:
//! - Session-scoped tracing spans, either as a `SessionSpan` RAII guard for
//!   synchronous code or as a plain [`tracing::Span`] for `.instrument()`
//! - Emission functions for key lifecycle events: start, attempt, fix, finish, advisory
//!
//! Events are emitted at `info!` level; advisories at `warn!`.

use tracing::{info, warn};

use crate::domain::{Advisory, ExecutionOutcome};

/// The span every session's events are recorded under.
pub fn session_span(session_id: &str) -> tracing::Span {
    tracing::info_span!("codemend.session", session_id = %session_id)
}

/// RAII guard that enters a session-scoped span.
///
/// ```ignore
/// let _span = SessionSpan::enter("0b6f...");
/// // tracing calls are now tagged with session_id
/// ```
pub struct SessionSpan {
    _span: tracing::span::EnteredSpan,
}

impl SessionSpan {
    pub fn enter(session_id: &str) -> Self {
        Self {
            _span: session_span(session_id).entered(),
        }
    }
}

/// Emit event: a repair session started.
pub fn emit_session_started(session_id: &str, language: &str, max_attempts: u32) {
    info!(
        event = "session.started",
        session_id = %session_id,
        language = %language,
        max_attempts = max_attempts,
    );
}

/// Emit event: one attempt finished executing.
pub fn emit_attempt_executed(session_id: &str, outcome: &ExecutionOutcome) {
    info!(
        event = "session.attempt_executed",
        session_id = %session_id,
        attempt = outcome.attempt_index,
        status = ?outcome.status,
        fault_class = outcome.fault_class.as_deref().unwrap_or(""),
        fault_line = outcome.fault_line.unwrap_or(0),
        duration_ms = outcome.duration_ms,
    );
}

/// Emit event: a fix was requested after a failing attempt.
pub fn emit_fix_requested(session_id: &str, attempt_index: u32) {
    info!(event = "session.fix_requested", session_id = %session_id, attempt = attempt_index);
}

/// Emit event: the session reached its final status.
pub fn emit_session_finished(session_id: &str, status: &str, executions: usize, fixes: u32) {
    info!(
        event = "session.finished",
        session_id = %session_id,
        status = %status,
        executions = executions,
        fixes = fixes,
    );
}

/// Emit event: a non-fatal stage finding.
pub fn emit_advisory(session_id: &str, advisory: &Advisory) {
    warn!(
        event = "session.advisory",
        session_id = %session_id,
        kind = advisory.kind.label(),
        message = %advisory.message,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AdvisoryKind, ExecutionStatus};

    #[test]
    fn test_session_span_create() {
        let _span = SessionSpan::enter("test-session");
        emit_session_started("test-session", "python", 3);
        emit_attempt_executed("test-session", &ExecutionOutcome::new(0, ExecutionStatus::Success));
        emit_advisory(
            "test-session",
            &Advisory::new(AdvisoryKind::DependencyMissing, "pandas"),
        );
        emit_session_finished("test-session", "succeeded", 1, 0);
    }
}
