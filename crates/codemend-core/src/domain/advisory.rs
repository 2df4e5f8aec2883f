//! Non-fatal stage findings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryKind {
    /// A response section was missing or empty.
    ParseDegraded,
    ToolchainUnavailable,
    DependencyMissing,
    InstallFailure,
    InputSynthesisFailed,
    /// The static screen found a risky call.
    SafetyConcern,
}

impl AdvisoryKind {
    pub fn label(&self) -> &'static str {
        match self {
            AdvisoryKind::ParseDegraded => "parse degraded",
            AdvisoryKind::ToolchainUnavailable => "toolchain unavailable",
            AdvisoryKind::DependencyMissing => "dependency missing",
            AdvisoryKind::InstallFailure => "install failure",
            AdvisoryKind::InputSynthesisFailed => "input synthesis failed",
            AdvisoryKind::SafetyConcern => "safety concern",
        }
    }
}

/// A finding that never aborts the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advisory {
    pub kind: AdvisoryKind,
    pub message: String,
}

impl Advisory {
    pub fn new(kind: AdvisoryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.message)
    }
}
