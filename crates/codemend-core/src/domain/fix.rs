//! Fix attempts.

use serde::{Deserialize, Serialize};

/// What a fix request produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixDisposition {
    /// New code was adopted.
    Modified,
    /// The collaborator returned empty or identical code.
    Unchanged,
    /// The collaborator call itself failed.
    GenerationFailed,
}

/// One request to the collaborator for a fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    /// Index of the failed execution this fix responds to.
    pub attempt_index: u32,
    pub error_analysis: String,
    pub fix_approach: String,
    pub original_code: String,
    pub fixed_code: Option<String>,
    pub disposition: FixDisposition,
    /// Collaborator error text when the disposition is `GenerationFailed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl FixAttempt {
    pub fn generation_failed(
        attempt_index: u32,
        original_code: impl Into<String>,
        failure: impl Into<String>,
    ) -> Self {
        Self {
            attempt_index,
            error_analysis: String::new(),
            fix_approach: String::new(),
            original_code: original_code.into(),
            fixed_code: None,
            disposition: FixDisposition::GenerationFailed,
            failure: Some(failure.into()),
        }
    }

    pub fn is_modified(&self) -> bool {
        self.disposition == FixDisposition::Modified
    }
}
