//! The outer boundary: task text in, report out.
//!
//! Stages run in order: task extraction, generation, parsing, safety screen,
//! toolchain probe, dependency resolution, input analysis, then the repair
//! loop. Every stage but generation degrades to an advisory. The pipeline
//! never fails; unexpected failures become a message on the report.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use toolchain_env::{normalize_language, DependencyResolver, InstallLog, Language, PackageEcosystem};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::domain::{Advisory, AdvisoryKind, CodeArtifact};
use crate::error::CodemendError;
use crate::executor::ExecutorRegistry;
use crate::generation::CodeGenerator;
use crate::input_analysis::{manual_input_advisory, needs_input, synthesize, InputPlan, InputSynthesis};
use crate::metrics::METRICS;
use crate::obs;
use crate::parser::{parse, ResponseSchema};
use crate::repair::{FinalStatus, RepairContext, RepairLoop, RepairSession};
use crate::reporting::{render_final_response, write_session_artifact};
use crate::safety;

/// Request phrasings that split a task wherever they appear.
const CJK_TASK_PREFIXES: &[&str] = &["請幫我寫代碼", "生成代碼", "寫一段程式", "代碼生成"];

/// Request phrasings stripped only when they open the message.
const TASK_PREFIXES: &[&str] = &[
    "write code to",
    "write code for",
    "write code that",
    "write a program to",
    "write a program that",
    "generate code to",
    "generate code for",
    "generate code",
    "write code",
];

/// Language assumed when the response names none.
const DEFAULT_LANGUAGE: &str = "python";

/// Strip a leading request phrase, keeping what follows it.
pub fn extract_task(message: &str) -> String {
    let trimmed = message.trim();
    for prefix in CJK_TASK_PREFIXES {
        if let Some(pos) = trimmed.find(prefix) {
            if let Some(rest) = task_after(&trimmed[pos + prefix.len()..]) {
                return rest;
            }
        }
    }

    let lowered = trimmed.to_ascii_lowercase();
    let offset = if lowered.starts_with("please ") { "please ".len() } else { 0 };
    for prefix in TASK_PREFIXES {
        if lowered[offset..].starts_with(prefix) {
            if let Some(rest) = task_after(&trimmed[offset + prefix.len()..]) {
                return rest;
            }
        }
    }
    trimmed.to_string()
}

fn task_after(rest: &str) -> Option<String> {
    let rest = rest
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '：' | ',' | '，'))
        .trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub task: String,
    /// Absent when generation failed before any code existed.
    pub session: Option<RepairSession>,
    pub advisories: Vec<Advisory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_log: Option<InstallLog>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<InputSynthesis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    /// Why the run stopped before the repair loop, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// User-visible text.
    pub response: String,
}

impl PipelineReport {
    fn failed(task: String, advisories: Vec<Advisory>, failure: String) -> Self {
        Self {
            response: failure.clone(),
            task,
            session: None,
            advisories,
            install_log: None,
            input: None,
            artifact_path: None,
            failure: Some(failure),
        }
    }

    pub fn final_status(&self) -> Option<FinalStatus> {
        self.session.as_ref().and_then(|s| s.final_status)
    }

    pub fn succeeded(&self) -> bool {
        self.final_status() == Some(FinalStatus::Succeeded)
    }
}

/// Build an artifact from a generation response.
pub fn artifact_from_response(response: &str) -> Result<(CodeArtifact, Vec<Advisory>), CodemendError> {
    let fields = parse(response, &ResponseSchema::GENERATION);
    let advisories = fields.advisories(&ResponseSchema::GENERATION);
    let code = fields.text("code");
    if code.trim().is_empty() {
        return Err(CodemendError::EmptyCode);
    }
    let language = resolve_language(fields.text("language"), fields.fence_tag("code"));
    let artifact = CodeArtifact::new(&language, code)
        .with_dependencies(fields.list("dependencies").to_vec())
        .with_rationale(fields.text("explanation"));
    Ok((artifact, advisories))
}

/// Language from the marker, else the code fence tag, else the default.
fn resolve_language(declared: &str, fence_tag: Option<&str>) -> String {
    let declared = declared.lines().next().unwrap_or_default().trim();
    if !declared.is_empty() {
        if Language::parse(declared).is_some() {
            return normalize_language(declared);
        }
        let first_word = declared
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .trim_end_matches(|c: char| matches!(c, ',' | '.' | ';' | ':'));
        if Language::parse(first_word).is_some() {
            return normalize_language(first_word);
        }
        return normalize_language(declared);
    }
    match fence_tag.filter(|t| !t.trim().is_empty()) {
        Some(tag) => normalize_language(tag),
        None => DEFAULT_LANGUAGE.to_string(),
    }
}

/// Generation, preparation and repair for code tasks.
pub struct CodePipeline {
    config: PipelineConfig,
    generator: Arc<dyn CodeGenerator>,
    registry: ExecutorRegistry,
    resolver: DependencyResolver,
}

impl CodePipeline {
    pub fn new(config: PipelineConfig, generator: Arc<dyn CodeGenerator>) -> Self {
        let python = config.python_override();
        let mut resolver = DependencyResolver::new();
        if let Some(python) = &python {
            resolver = resolver.with_python(python.clone());
        }
        Self {
            registry: ExecutorRegistry::with_defaults(python),
            resolver,
            config,
            generator,
        }
    }

    /// Replace the executor registry.
    pub fn with_registry(mut self, registry: ExecutorRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub async fn run(&self, message: &str) -> PipelineReport {
        self.run_with_cancel(message, CancellationToken::new()).await
    }

    /// Generate code for `message` and run it through the repair loop.
    pub async fn run_with_cancel(&self, message: &str, cancel: CancellationToken) -> PipelineReport {
        let task = extract_task(message);
        info!(task = %task, "code task received");

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return PipelineReport::failed(task, Vec::new(), "Code generation was cancelled.".to_string());
            }
            response = self.generator.generate(&task) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "code generation failed");
                return PipelineReport::failed(task, Vec::new(), format!("Code generation failed: {err}"));
            }
        };

        match artifact_from_response(&response) {
            Ok((artifact, advisories)) => self.run_artifact(task, artifact, advisories, cancel).await,
            Err(err) => {
                let fields = parse(&response, &ResponseSchema::GENERATION);
                PipelineReport::failed(
                    task,
                    fields.advisories(&ResponseSchema::GENERATION),
                    format!("Code generation failed: {err}"),
                )
            }
        }
    }

    /// Prepare and repair an existing artifact, skipping generation.
    pub async fn run_artifact(
        &self,
        task: String,
        artifact: CodeArtifact,
        mut advisories: Vec<Advisory>,
        cancel: CancellationToken,
    ) -> PipelineReport {
        let session_id = uuid::Uuid::new_v4().to_string();
        let mut artifact = artifact;
        let mut install_log = None;
        let mut input = None;
        let mut stdin = None;

        advisories.extend(safety::screen(&artifact.source, &artifact.language));

        let probe = self.registry.probe(&artifact.language).await;
        if !probe.ready {
            advisories.push(Advisory::new(AdvisoryKind::ToolchainUnavailable, probe.message.clone()));
        }

        if let (true, Some(language)) = (probe.ready, artifact.language_kind()) {
            if !artifact.dependencies.is_empty() && PackageEcosystem::for_language(language).is_some() {
                let (log, deps_advisories) = self.prepare_dependencies(language, &artifact.dependencies, &cancel).await;
                install_log = log;
                advisories.extend(deps_advisories);
            }

            if self.config.analyze_input && needs_input(&artifact.source, &artifact.language) {
                match synthesize(self.generator.as_ref(), &artifact.source, &artifact.language).await {
                    Ok(synthesis) => {
                        match synthesis.plan() {
                            Some(InputPlan::ReplaceCode(code)) => artifact = artifact.revised(code),
                            Some(InputPlan::Stdin(data)) => stdin = Some(data),
                            None => {}
                        }
                        input = Some(synthesis);
                    }
                    Err(err) => advisories.push(manual_input_advisory(&err)),
                }
            }
        }

        for advisory in &advisories {
            obs::emit_advisory(&session_id, advisory);
        }

        let repair = RepairLoop::new(&self.registry, self.generator.as_ref(), self.config.repair_policy());
        let ctx = RepairContext::new(task.clone(), artifact)
            .with_session_id(&session_id)
            .with_stdin(stdin)
            .with_advisories(advisories.clone())
            .with_cancel(cancel);
        let session = repair.run(ctx).await;

        let artifact_path = match &self.config.artifacts_dir {
            Some(dir) => match write_session_artifact(&session, dir) {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = %err, dir = %dir.display(), "could not write session artifact");
                    None
                }
            },
            None => None,
        };
        METRICS.flush();

        PipelineReport {
            response: render_final_response(&session),
            task,
            session: Some(session),
            advisories,
            install_log,
            input,
            artifact_path,
            failure: None,
        }
    }

    /// Look up, optionally install, and re-check declared dependencies.
    async fn prepare_dependencies(
        &self,
        language: Language,
        dependencies: &[String],
        cancel: &CancellationToken,
    ) -> (Option<InstallLog>, Vec<Advisory>) {
        let mut advisories = Vec::new();
        let missing = self.resolver.missing(language, dependencies).await;
        if missing.is_empty() {
            return (None, advisories);
        }
        if !self.config.install_dependencies {
            advisories.push(Advisory::new(
                AdvisoryKind::DependencyMissing,
                format!("missing dependencies: {}", missing.join(", ")),
            ));
            return (None, advisories);
        }

        let log = self.resolver.install(language, &missing, cancel).await;
        if !log.success {
            advisories.push(Advisory::new(AdvisoryKind::InstallFailure, tail(&log.output, 20)));
        }
        let still_missing = self.resolver.missing(language, &missing).await;
        if !still_missing.is_empty() {
            advisories.push(Advisory::new(
                AdvisoryKind::DependencyMissing,
                format!("missing dependencies: {}", still_missing.join(", ")),
            ));
        }
        (Some(log), advisories)
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_task_strips_prefixes() {
        assert_eq!(extract_task("請幫我寫代碼：計算 1 到 10 的和"), "計算 1 到 10 的和");
        assert_eq!(extract_task("Please write code to sum a list"), "sum a list");
        assert_eq!(extract_task("Generate code: parse a CSV"), "parse a CSV");
        assert_eq!(extract_task("  sort these numbers  "), "sort these numbers");
        assert_eq!(extract_task("write code"), "write code");
    }

    #[test]
    fn test_extract_task_only_strips_leading_english_phrases() {
        assert_eq!(
            extract_task("sort names, then write code that is fast"),
            "sort names, then write code that is fast"
        );
        assert_eq!(extract_task("  Write code to reverse a string "), "reverse a string");
        assert_eq!(extract_task("先說明，然後生成代碼：排序"), "排序");
    }

    #[test]
    fn test_language_resolution() {
        assert_eq!(resolve_language("Python 3", None), "python");
        assert_eq!(resolve_language("C++", Some("cpp")), "cpp");
        assert_eq!(resolve_language("", Some("js")), "javascript");
        assert_eq!(resolve_language("", None), "python");
        assert_eq!(resolve_language("Fortran", None), "fortran");
    }

    #[test]
    fn test_artifact_from_response() {
        let response = "LANGUAGE: Python\nDEPENDENCIES:\n- numpy>=1.24\nCODE:\n```python\nimport numpy as np\nresult = np.arange(3).sum()\n```\n";
        let (artifact, advisories) = artifact_from_response(response).unwrap();
        assert_eq!(artifact.language, "python");
        assert_eq!(artifact.dependencies, vec!["numpy>=1.24".to_string()]);
        assert!(artifact.source.starts_with("import numpy"));
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].kind, AdvisoryKind::ParseDegraded);

        assert!(matches!(
            artifact_from_response("LANGUAGE: python\nCODE:\n```\n```\n"),
            Err(CodemendError::EmptyCode)
        ));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("a", 5), "a");
    }
}
