//! Error taxonomy for codemend-core.
//!
//! Execution faults are not errors: they are recorded on an
//! `ExecutionOutcome` and drive the repair loop. These variants cover the
//! steps that can genuinely fail.

/// Core errors.
#[derive(Debug, thiserror::Error)]
pub enum CodemendError {
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("generated response contained no code")]
    EmptyCode,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("toolchain error: {0}")]
    Toolchain(#[from] toolchain_env::EnvError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for codemend-core operations.
pub type Result<T> = std::result::Result<T, CodemendError>;
