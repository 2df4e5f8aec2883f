//! Domain models for codemend.
//!
//! Canonical definitions for the records a repair session produces:
//! - `CodeArtifact`: one immutable version of generated code
//! - `ExecutionOutcome`: the captured result of one execution attempt
//! - `FixAttempt`: one request to the collaborator for a fix
//! - `Advisory`: a non-fatal finding folded into the final report

pub mod advisory;
pub mod artifact;
pub mod fix;
pub mod outcome;

pub use advisory::{Advisory, AdvisoryKind};
pub use artifact::{ArtifactChain, CodeArtifact};
pub use fix::{FixAttempt, FixDisposition};
pub use outcome::{
    excerpt_around, ExecutionOutcome, ExecutionStatus, CANCELLED_FAULT_CLASS, COMPILE_FAULT_CLASS,
    TIMEOUT_FAULT_CLASS,
};
