//! codemend - generate, run and repair code from the command line.
//!
//! ## Commands
//!
//! - `run`: generate code for a task and repair it until it runs
//! - `exec`: run an existing source file, optionally through the repair loop
//! - `probe`: report whether language toolchains are installed
//! - `deps`: list or install missing dependencies
//! - `needs-input`: check whether code reads interactive input
//! - `show`: render a stored session artifact

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codemend_core::executor::{ExecutionRequest, ExecutorRegistry};
use codemend_core::obs::SessionSpan;
use codemend_core::telemetry::init_tracing;
use codemend_core::{
    needs_input, read_session_artifact, render_session_md, ChatGenerator, CodeArtifact,
    CodePipeline, ExecutionOutcome, PipelineConfig, PipelineReport, StagnationCheck,
};
use tokio_util::sync::CancellationToken;
use toolchain_env::{probe, DependencyResolver, Language};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "codemend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate code for a task, run it, and repair it until it works", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Pipeline configuration file (TOML)
    #[arg(long, global = true, env = "CODEMEND_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that override the configuration file.
#[derive(clap::Args, Debug, Default, Clone)]
struct Overrides {
    /// Maximum fix requests per session
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Per-attempt time limit in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Directory for session audit artifacts
    #[arg(long, env = "CODEMEND_ARTIFACTS_DIR")]
    artifacts_dir: Option<PathBuf>,

    /// Python interpreter to use instead of probing PATH
    #[arg(long, env = "CODEMEND_PYTHON")]
    python: Option<String>,

    /// Report missing dependencies without installing them
    #[arg(long)]
    no_install: bool,

    /// Skip interactive input detection
    #[arg(long)]
    no_input_analysis: bool,

    /// Treat whitespace-only fixes as changes
    #[arg(long)]
    exact_stagnation: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    /// Final code and what it produced
    #[default]
    Text,
    /// Full session history as markdown
    Markdown,
    /// The whole report as JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate code for a task and run it through the repair loop
    Run {
        /// Task description, e.g. "write code to sum 1 to 10"
        #[arg(required = true, num_args = 1..)]
        task: Vec<String>,

        #[command(flatten)]
        overrides: Overrides,

        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },

    /// Run an existing source file
    Exec {
        /// Source file to run
        file: PathBuf,

        /// Language (inferred from the file extension if omitted)
        #[arg(short, long)]
        language: Option<String>,

        /// File whose contents are piped to standard input
        #[arg(long)]
        stdin_file: Option<PathBuf>,

        /// Send faults to the generation service for repair
        #[arg(long)]
        repair: bool,

        #[command(flatten)]
        overrides: Overrides,

        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },

    /// Report toolchain availability
    Probe {
        /// Languages to probe (default: all supported)
        languages: Vec<String>,
    },

    /// Dependency lookup and installation
    Deps {
        #[command(subcommand)]
        action: DepsAction,
    },

    /// Check whether a source file reads interactive input
    NeedsInput {
        file: PathBuf,

        #[arg(short, long)]
        language: Option<String>,
    },

    /// Render a stored session artifact
    Show {
        /// Session ID
        session: String,

        /// Root directory containing session artifacts
        #[arg(long, env = "CODEMEND_ARTIFACTS_DIR", default_value = ".codemend/sessions")]
        artifacts_dir: PathBuf,

        #[arg(long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,
    },
}

#[derive(Subcommand)]
enum DepsAction {
    /// List dependencies that are not installed
    Missing {
        language: String,
        #[arg(required = true, num_args = 1..)]
        deps: Vec<String>,
    },

    /// Install dependencies with the host package manager
    Install {
        language: String,
        #[arg(required = true, num_args = 1..)]
        deps: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json_logs, level);

    match cli.command {
        Commands::Run {
            task,
            overrides,
            format,
        } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_run(config, &task.join(" "), format).await
        }
        Commands::Exec {
            file,
            language,
            stdin_file,
            repair,
            overrides,
            format,
        } => {
            let config = load_config(cli.config.as_deref(), &overrides)?;
            cmd_exec(config, &file, language.as_deref(), stdin_file.as_deref(), repair, format).await
        }
        Commands::Probe { languages } => cmd_probe(&languages).await,
        Commands::Deps { action } => match action {
            DepsAction::Missing { language, deps } => cmd_deps_missing(&language, &deps).await,
            DepsAction::Install { language, deps } => cmd_deps_install(&language, &deps).await,
        },
        Commands::NeedsInput { file, language } => cmd_needs_input(&file, language.as_deref()),
        Commands::Show {
            session,
            artifacts_dir,
            format,
        } => cmd_show(&session, &artifacts_dir, format),
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    if let Some(max_attempts) = overrides.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(timeout_ms) = overrides.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(dir) = &overrides.artifacts_dir {
        config.artifacts_dir = Some(dir.clone());
    }
    if let Some(python) = &overrides.python {
        config.python_executable = python.clone();
    }
    if overrides.no_install {
        config.install_dependencies = false;
    }
    if overrides.no_input_analysis {
        config.analyze_input = false;
    }
    if overrides.exact_stagnation {
        config.stagnation = StagnationCheck::Exact;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Cancellation token tripped by Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

fn chat_pipeline(config: PipelineConfig) -> Result<CodePipeline> {
    let generator = ChatGenerator::from_env().context("Generation service is not configured")?;
    Ok(CodePipeline::new(config, Arc::new(generator)))
}

/// Language named explicitly, or inferred from the file extension.
fn resolve_language(file: &Path, language: Option<&str>) -> Result<String> {
    if let Some(language) = language {
        return Ok(toolchain_env::normalize_language(language));
    }
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .with_context(|| format!("Cannot infer a language for {:?}; pass --language", file))?;
    Language::parse(extension)
        .map(|l| l.canonical_name().to_string())
        .with_context(|| format!("Unrecognised extension '.{extension}'; pass --language"))
}

fn print_report(report: &PipelineReport, format: ReportFormat) -> Result<()> {
    match (format, &report.session) {
        (ReportFormat::Json, _) => println!("{}", serde_json::to_string_pretty(report)?),
        (ReportFormat::Markdown, Some(session)) => print!("{}", render_session_md(session)),
        _ => println!("{}", report.response.trim_end()),
    }
    if let Some(path) = &report.artifact_path {
        info!(path = %path.display(), "session artifact written");
    }
    Ok(())
}

fn finish(report: &PipelineReport) -> Result<()> {
    if let Some(failure) = &report.failure {
        anyhow::bail!("{failure}");
    }
    match report.final_status() {
        Some(status) if !report.succeeded() => anyhow::bail!("Session ended: {status}"),
        _ => Ok(()),
    }
}

async fn cmd_run(config: PipelineConfig, task: &str, format: ReportFormat) -> Result<()> {
    let pipeline = chat_pipeline(config)?;
    let report = pipeline.run_with_cancel(task, cancel_on_ctrl_c()).await;
    print_report(&report, format)?;
    finish(&report)
}

async fn cmd_exec(
    config: PipelineConfig,
    file: &Path,
    language: Option<&str>,
    stdin_file: Option<&Path>,
    repair: bool,
    format: ReportFormat,
) -> Result<()> {
    let language = resolve_language(file, language)?;
    let code = std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    let stdin = match stdin_file {
        Some(path) => Some(
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?,
        ),
        None => None,
    };

    if repair {
        let pipeline = chat_pipeline(config)?;
        let task = format!("make {} run without errors", file.display());
        let report = pipeline
            .run_artifact(task, CodeArtifact::new(&language, code), Vec::new(), cancel_on_ctrl_c())
            .await;
        print_report(&report, format)?;
        return finish(&report);
    }

    let registry = ExecutorRegistry::with_defaults(config.python_override());
    let request = ExecutionRequest::new(&language, code)
        .with_timeout(config.timeout())
        .with_stdin(stdin)
        .with_cancel(cancel_on_ctrl_c());
    let outcome = registry.execute(&request).await;
    print_outcome(&outcome, format)?;
    if !outcome.is_success() {
        anyhow::bail!(
            "Execution failed: {}",
            outcome.fault_summary().unwrap_or_else(|| "unknown fault".to_string())
        );
    }
    Ok(())
}

fn print_outcome(outcome: &ExecutionOutcome, format: ReportFormat) -> Result<()> {
    if format == ReportFormat::Json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    if !outcome.stdout.is_empty() {
        print!("{}", outcome.stdout);
    }
    if !outcome.stderr.is_empty() {
        eprint!("{}", outcome.stderr);
    }
    if let Some(value) = &outcome.result_value {
        println!("result = {value}");
    }
    if let Some(excerpt) = &outcome.excerpt {
        eprintln!("{excerpt}");
    }
    println!("({} ms)", outcome.duration_ms);
    Ok(())
}

async fn cmd_probe(languages: &[String]) -> Result<()> {
    let names: Vec<String> = if languages.is_empty() {
        Language::ALL.iter().map(|l| l.canonical_name().to_string()).collect()
    } else {
        languages.to_vec()
    };
    for name in &names {
        let report = probe(name).await;
        let mark = if report.ready { "ok" } else { "missing" };
        println!("{:<12} {:<8} {}", report.language, mark, report.message);
    }
    Ok(())
}

fn parse_language(name: &str) -> Result<Language> {
    name.parse::<Language>().map_err(anyhow::Error::from)
}

async fn cmd_deps_missing(language: &str, deps: &[String]) -> Result<()> {
    let language = parse_language(language)?;
    let missing = DependencyResolver::new().missing(language, deps).await;
    if missing.is_empty() {
        println!("All dependencies are installed.");
    } else {
        for dep in &missing {
            println!("{dep}");
        }
    }
    Ok(())
}

async fn cmd_deps_install(language: &str, deps: &[String]) -> Result<()> {
    let language = parse_language(language)?;
    let log = DependencyResolver::new()
        .install(language, deps, &cancel_on_ctrl_c())
        .await;
    println!("{}", log.output.trim_end());
    if !log.success {
        anyhow::bail!("Dependency installation failed");
    }
    Ok(())
}

fn cmd_needs_input(file: &Path, language: Option<&str>) -> Result<()> {
    let language = resolve_language(file, language)?;
    let code = std::fs::read_to_string(file).with_context(|| format!("Failed to read {:?}", file))?;
    println!("{}", if needs_input(&code, &language) { "yes" } else { "no" });
    Ok(())
}

fn cmd_show(session_id: &str, artifacts_dir: &Path, format: ReportFormat) -> Result<()> {
    let _span = SessionSpan::enter(session_id);
    let session = read_session_artifact(session_id, artifacts_dir)
        .with_context(|| format!("Failed to load session {session_id} from {:?}", artifacts_dir))?;
    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&session)?),
        ReportFormat::Markdown => print!("{}", render_session_md(&session)),
        ReportFormat::Text => print!("{}", codemend_core::render_final_response(&session)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_core::{write_session_artifact, ExecutionStatus, FinalStatus, RepairSession};

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_joins_task_words() {
        let cli = Cli::try_parse_from(["codemend", "run", "write", "code", "to", "sum", "--max-attempts", "5"]).unwrap();
        match cli.command {
            Commands::Run { task, overrides, format } => {
                assert_eq!(task.join(" "), "write code to sum");
                assert_eq!(overrides.max_attempts, Some(5));
                assert_eq!(format, ReportFormat::Text);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_overrides_apply_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codemend.toml");
        std::fs::write(&path, "max_attempts = 1\ntimeout_ms = 500\n").unwrap();

        let overrides = Overrides {
            max_attempts: Some(4),
            no_install: true,
            exact_stagnation: true,
            ..Default::default()
        };
        let config = load_config(Some(&path), &overrides).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.timeout_ms, 500);
        assert!(!config.install_dependencies);
        assert_eq!(config.stagnation, StagnationCheck::Exact);

        let defaults = load_config(None, &Overrides::default()).unwrap();
        assert_eq!(defaults.timeout(), std::time::Duration::from_secs(30));
        assert!(load_config(None, &Overrides { timeout_ms: Some(0), ..Default::default() }).is_err());
    }

    #[test]
    fn test_language_from_extension() {
        assert_eq!(resolve_language(Path::new("a/main.py"), None).unwrap(), "python");
        assert_eq!(resolve_language(Path::new("Main.java"), None).unwrap(), "java");
        assert_eq!(resolve_language(Path::new("prog.cs"), None).unwrap(), "csharp");
        assert_eq!(resolve_language(Path::new("run.sh"), None).unwrap(), "shell");
        assert_eq!(resolve_language(Path::new("x.txt"), Some("Ruby")).unwrap(), "ruby");
        assert!(resolve_language(Path::new("notes.txt"), None).is_err());
        assert!(resolve_language(Path::new("Makefile"), None).is_err());
    }

    #[test]
    fn test_show_reads_and_verifies_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = RepairSession::new("cli-1", "print", CodeArtifact::new("python", "print(1)\n"), 3);
        session.final_code = "print(1)\n".to_string();
        session.entries.push(codemend_core::SessionEntry::Execution(ExecutionOutcome {
            stdout: "1\n".to_string(),
            ..ExecutionOutcome::new(0, ExecutionStatus::Success)
        }));
        session.final_status = Some(FinalStatus::Succeeded);
        write_session_artifact(&session, dir.path()).unwrap();

        assert!(cmd_show("cli-1", dir.path(), ReportFormat::Markdown).is_ok());
        assert!(cmd_show("missing", dir.path(), ReportFormat::Json).is_err());
    }

    #[test]
    fn test_needs_input_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ask.py");
        std::fs::write(&path, "name = input('who? ')\n").unwrap();
        assert!(cmd_needs_input(&path, None).is_ok());
        assert!(cmd_needs_input(&dir.path().join("absent.py"), None).is_err());
    }

    #[test]
    fn test_unknown_language_is_rejected_for_deps() {
        assert!(parse_language("cobol").is_err());
        assert_eq!(parse_language("node").unwrap(), Language::JavaScript);
    }
}
