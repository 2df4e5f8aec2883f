//! Toolchain-Env: host toolchain probing, dependency resolution and captured
//! subprocess execution for codemend.
//!
//! ## Environment/Tooling layer
//!
//! Everything that touches the host goes through here: finding executables on
//! `PATH`, asking package managers what is installed, and running children
//! under a deadline with their output captured.

pub mod deps;
pub mod error;
pub mod guidance;
pub mod language;
pub mod probe;
pub mod process;

pub use deps::{
    python_module_name, strip_version_qualifier, DependencyResolver, InstallLog,
    PackageEcosystem,
};
pub use error::{EnvError, Result};
pub use guidance::install_guide;
pub use language::{normalize_language, Language, UnknownLanguage};
pub use probe::{find_executable, probe, probe_language, required_executables, HostOs, ProbeReport};
pub use process::{run_captured, CommandSpec, ProcessOutput, Termination, MAX_CAPTURE_BYTES};
