//! Global atomic counters for pipeline observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a pipeline run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    executions: AtomicU64,
    fix_requests: AtomicU64,
    stalls: AtomicU64,
    timeouts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            executions: AtomicU64::new(0),
            fix_requests: AtomicU64::new(0),
            stalls: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    /// An attempt was handed to a language strategy.
    pub fn inc_executions(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions", "counter incremented");
    }

    /// A fix was requested from the generation collaborator.
    pub fn inc_fix_requests(&self) {
        self.fix_requests.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fix_requests", "counter incremented");
    }

    /// A repair session ended as stalled.
    pub fn inc_stalls(&self) {
        self.stalls.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stalls", "counter incremented");
    }

    /// An attempt was killed at its deadline.
    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            executions = self.executions(),
            fix_requests = self.fix_requests(),
            stalls = self.stalls(),
            timeouts = self.timeouts(),
        );
    }

    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn fix_requests(&self) -> u64 {
        self.fix_requests.load(Ordering::Relaxed)
    }

    pub fn stalls(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.executions.store(0, Ordering::Relaxed);
        self.fix_requests.store(0, Ordering::Relaxed);
        self.stalls.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
    }
}
