//! Codemend Core Library
//!
//! Code synthesis, sandboxed execution and self-repair. A task goes to the
//! generation collaborator, the response is parsed into a [`CodeArtifact`],
//! the host toolchain and dependencies are prepared, and the code runs
//! through a bounded execute-fix loop that keeps every attempt.

pub mod config;
pub mod domain;
pub mod error;
pub mod executor;
pub mod generation;
pub mod input_analysis;
pub mod metrics;
pub mod obs;
pub mod parser;
pub(crate) mod pattern;
pub mod pipeline;
pub mod repair;
pub mod reporting;
pub mod safety;
pub mod telemetry;

pub use config::PipelineConfig;

pub use domain::{
    Advisory, AdvisoryKind, ArtifactChain, CodeArtifact, ExecutionOutcome, ExecutionStatus,
    FixAttempt, FixDisposition,
};

pub use error::{CodemendError, Result};

pub use executor::{ExecutionRequest, ExecutorRegistry, LanguageExecutor};

pub use generation::{ChatConfig, ChatGenerator, CodeGenerator, FixRequest, ScriptedGenerator};

pub use input_analysis::{needs_input, InputSynthesis};

pub use parser::{parse, render, ParsedFields, ResponseSchema};

pub use pipeline::{extract_task, CodePipeline, PipelineReport};

pub use repair::{
    FinalStatus, RepairContext, RepairLoop, RepairPolicy, RepairSession, SessionEntry,
    StagnationCheck,
};

pub use reporting::{
    read_session_artifact, render_final_response, render_session_md, write_session_artifact,
};

pub use toolchain_env::{InstallLog, Language, ProbeReport};
