//! The generation collaborator.
//!
//! Code generation, fixes and test-input synthesis are delegated to an
//! external text generator. Responses are marker-schema text read by
//! [`crate::parser`]; the collaborator itself is opaque.

pub mod chat;
pub mod prompts;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use chat::{ChatConfig, ChatGenerator, ChatProvider};
pub use scripted::ScriptedGenerator;

/// Everything the collaborator needs to propose a fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    /// The task the code was generated for.
    pub task: String,
    pub language: String,
    /// Source of the attempt that failed.
    pub code: String,
    /// Fault summary, excerpt and captured error output.
    pub fault_text: String,
    pub attempt_index: u32,
}

/// Produces marker-schema responses. Errors are fatal for the current step only.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Generate code for a task (`LANGUAGE`, `DEPENDENCIES`, `CODE`, `EXPLANATION`).
    async fn generate(&self, task: &str) -> Result<String>;

    /// Propose a fix (`ERROR_ANALYSIS`, `FIX_APPROACH`, `FIXED_CODE`).
    async fn fix(&self, request: &FixRequest) -> Result<String>;

    /// Synthesize test input (`INPUT_ANALYSIS`, `TEST_DATA`, `EXECUTION_METHOD`, `MODIFIED_CODE`).
    async fn synthesize_input(&self, code: &str, language: &str) -> Result<String>;
}
