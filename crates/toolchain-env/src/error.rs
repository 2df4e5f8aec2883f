//! Error types for toolchain-env

use thiserror::Error;

/// Errors that can occur while probing toolchains or driving subprocesses.
///
/// Probe and install operations fold these into advisory text; only the
/// subprocess runner surfaces them to callers.
#[derive(Error, Debug)]
pub enum EnvError {
    /// Command spec had no program to run
    #[error("empty command")]
    EmptyCommand,

    /// The program could not be started
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Required executable is not on PATH
    #[error("executable not found on PATH: {0}")]
    ExecutableNotFound(String),

    /// A helper subprocess ran past its deadline
    #[error("`{0}` timed out")]
    Timeout(String),

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// A helper subprocess produced output we could not interpret
    #[error("unexpected output from `{program}`: {detail}")]
    UnexpectedOutput { program: String, detail: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for toolchain-env operations.
pub type Result<T> = std::result::Result<T, EnvError>;
