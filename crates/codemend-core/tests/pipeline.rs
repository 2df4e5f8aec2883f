//! End-to-end pipeline runs with a scripted collaborator and a recording executor.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use codemend_core::domain::AdvisoryKind;
use codemend_core::executor::{ExecutionRequest, ExecutorRegistry, LanguageExecutor};
use codemend_core::generation::scripted::{fix_response, generation_response};
use codemend_core::{
    read_session_artifact, CodePipeline, ExecutionOutcome, ExecutionStatus, FinalStatus,
    PipelineConfig, ScriptedGenerator,
};
use tokio_util::sync::CancellationToken;
use toolchain_env::{Language, ProbeReport};

/// Records what it was asked to run; faults on `raise`.
#[derive(Default)]
struct RecordingExecutor {
    seen: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingExecutor {
    fn seen(&self) -> Vec<(String, Option<String>)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageExecutor for RecordingExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    async fn probe(&self) -> ProbeReport {
        ProbeReport {
            language: "python".to_string(),
            ready: true,
            message: "Python is available".to_string(),
            version: Some("Python 3.12.1".to_string()),
            executables: Vec::new(),
        }
    }

    async fn execute(&self, request: &ExecutionRequest, _toolchain: &ProbeReport) -> ExecutionOutcome {
        self.seen
            .lock()
            .unwrap()
            .push((request.code.clone(), request.stdin.clone()));
        if request.code.contains("raise") {
            return ExecutionOutcome {
                stderr: "ValueError: boom\n".to_string(),
                fault_class: Some("ValueError".to_string()),
                fault_line: Some(1),
                fault_message: Some("boom".to_string()),
                ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::RuntimeFault)
            };
        }
        ExecutionOutcome {
            stdout: "done\n".to_string(),
            result_value: Some("55".to_string()),
            ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::Success)
        }
    }
}

fn pipeline_with(
    config: PipelineConfig,
    generator: Arc<ScriptedGenerator>,
) -> (CodePipeline, Arc<RecordingExecutor>) {
    let executor = Arc::new(RecordingExecutor::default());
    let mut registry = ExecutorRegistry::empty();
    registry.register(executor.clone());
    let pipeline = CodePipeline::new(config, generator).with_registry(registry);
    (pipeline, executor)
}

fn quiet_config() -> PipelineConfig {
    PipelineConfig {
        install_dependencies: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn generated_code_runs_and_reports_result() {
    let generator = Arc::new(
        ScriptedGenerator::new().with_generation(generation_response("python", &[], "result = sum(range(11))")),
    );
    let (pipeline, executor) = pipeline_with(quiet_config(), generator.clone());

    let report = pipeline.run("write code to sum one through ten").await;

    assert_eq!(report.task, "sum one through ten");
    assert!(report.succeeded(), "{}", report.response);
    assert!(report.failure.is_none());
    assert!(report.response.contains("```python\nresult = sum(range(11))"));
    assert!(report.response.contains("Execution result:"));
    assert!(report.response.contains("Result variable:\n55"));
    assert_eq!(executor.seen().len(), 1);
    assert_eq!(generator.fix_calls(), 0);
}

#[tokio::test]
async fn runtime_fault_is_repaired() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_generation(generation_response("python", &[], "raise ValueError('boom')"))
            .with_fix(fix_response("raises unconditionally", "result = 55")),
    );
    let (pipeline, executor) = pipeline_with(quiet_config(), generator.clone());

    let report = pipeline.run("compute fifty-five").await;

    assert_eq!(report.final_status(), Some(FinalStatus::Succeeded));
    let session = report.session.as_ref().unwrap();
    assert_eq!(session.total_fix_count, 1);
    assert_eq!(session.execution_count(), 2);
    assert!(report.response.contains("Execution result (after 1 fix):"));
    assert_eq!(executor.seen()[1].0.trim_end(), "result = 55");
}

#[tokio::test]
async fn generation_failure_has_no_session() {
    let generator = Arc::new(ScriptedGenerator::new());
    let (pipeline, executor) = pipeline_with(quiet_config(), generator);

    let report = pipeline.run("anything").await;

    assert!(report.session.is_none());
    assert!(report.final_status().is_none());
    assert!(report.failure.as_deref().unwrap().starts_with("Code generation failed"));
    assert_eq!(report.response, report.failure.clone().unwrap());
    assert!(executor.seen().is_empty());
}

#[tokio::test]
async fn response_without_code_fails_with_advisories() {
    let generator = Arc::new(ScriptedGenerator::new().with_generation("LANGUAGE: python\nI cannot help with that."));
    let (pipeline, executor) = pipeline_with(quiet_config(), generator);

    let report = pipeline.run("anything").await;

    assert!(report.session.is_none());
    assert!(report.failure.is_some());
    assert!(report
        .advisories
        .iter()
        .any(|a| a.kind == AdvisoryKind::ParseDegraded));
    assert!(executor.seen().is_empty());
}

#[tokio::test]
async fn synthesized_test_data_is_piped_to_stdin() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_generation(generation_response("python", &[], "name = input()\nprint(name)"))
            .with_synthesis("INPUT_ANALYSIS:\nreads one name\nTEST_DATA:\nada\nEXECUTION_METHOD:\nstdin\n"),
    );
    let (pipeline, executor) = pipeline_with(quiet_config(), generator.clone());

    let report = pipeline.run("greet a user").await;

    assert!(report.succeeded());
    assert_eq!(generator.synthesis_calls(), 1);
    assert_eq!(report.input.as_ref().unwrap().test_data, "ada");
    assert_eq!(executor.seen()[0].1.as_deref(), Some("ada\n"));
}

#[tokio::test]
async fn failed_synthesis_becomes_manual_input_advisory() {
    let generator = Arc::new(
        ScriptedGenerator::new()
            .with_generation(generation_response("python", &[], "name = input()\nprint(name)"))
            .with_synthesis_error("model unavailable"),
    );
    let (pipeline, executor) = pipeline_with(quiet_config(), generator);

    let report = pipeline.run("greet a user").await;

    let advisory = report
        .advisories
        .iter()
        .find(|a| a.kind == AdvisoryKind::InputSynthesisFailed)
        .expect("manual input advisory");
    assert!(advisory.message.contains("manual input required"));
    assert!(report.input.is_none());
    assert_eq!(executor.seen()[0].1, None);
}

#[tokio::test]
async fn input_analysis_can_be_disabled() {
    let generator = Arc::new(
        ScriptedGenerator::new().with_generation(generation_response("python", &[], "name = input()")),
    );
    let config = PipelineConfig {
        analyze_input: false,
        ..quiet_config()
    };
    let (pipeline, _executor) = pipeline_with(config, generator.clone());

    pipeline.run("read a name").await;
    assert_eq!(generator.synthesis_calls(), 0);
}

#[tokio::test]
async fn risky_calls_and_missing_dependencies_are_advisories() {
    let generator = Arc::new(ScriptedGenerator::new().with_generation(generation_response(
        "python",
        &["codemend_no_such_package_zzz"],
        "import os\nos.system('true')\nresult = 1",
    )));
    let (pipeline, executor) = pipeline_with(quiet_config(), generator);

    let report = pipeline.run("shell out").await;

    let kinds: Vec<_> = report.advisories.iter().map(|a| a.kind).collect();
    assert!(kinds.contains(&AdvisoryKind::SafetyConcern));
    assert!(kinds.contains(&AdvisoryKind::DependencyMissing));
    assert!(report.install_log.is_none());
    assert_eq!(executor.seen().len(), 1, "advisories never block execution");
    assert!(report.response.contains("Note: [safety concern]"));
}

#[tokio::test]
async fn unsupported_language_is_reported_not_executed() {
    let generator =
        Arc::new(ScriptedGenerator::new().with_generation(generation_response("cobol", &[], "DISPLAY 'HI'.")));
    let (pipeline, executor) = pipeline_with(quiet_config(), generator);

    let report = pipeline.run("say hi").await;

    assert_eq!(report.final_status(), Some(FinalStatus::NotExecuted));
    assert!(report.response.contains("The code was not executed."));
    assert!(report
        .advisories
        .iter()
        .any(|a| a.kind == AdvisoryKind::ToolchainUnavailable));
    assert!(executor.seen().is_empty());
}

#[tokio::test]
async fn session_artifact_is_written_when_configured() {
    let dir = tempfile::tempdir().unwrap();
    let generator = Arc::new(ScriptedGenerator::new().with_generation(generation_response("python", &[], "result = 55")));
    let config = PipelineConfig {
        artifacts_dir: Some(dir.path().to_path_buf()),
        ..quiet_config()
    };
    let (pipeline, _executor) = pipeline_with(config, generator);

    let report = pipeline.run("fifty-five").await;

    let path = report.artifact_path.clone().expect("artifact path");
    assert!(path.starts_with(dir.path()));
    let session = report.session.unwrap();
    let loaded = read_session_artifact(&session.session_id, dir.path()).unwrap();
    assert_eq!(loaded, session);
}

#[tokio::test]
async fn cancelled_before_generation() {
    let generator = Arc::new(ScriptedGenerator::new().with_generation(generation_response("python", &[], "result = 1")));
    let (pipeline, executor) = pipeline_with(quiet_config(), generator);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = pipeline.run_with_cancel("anything", cancel).await;

    assert!(report.session.is_none());
    assert!(report.failure.as_deref().unwrap().contains("cancelled"));
    assert!(executor.seen().is_empty());
}
