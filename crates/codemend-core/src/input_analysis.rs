//! Detect programs that read interactive input and obtain test data for them.

use serde::{Deserialize, Serialize};
use toolchain_env::Language;
use tracing::debug;

use crate::domain::{Advisory, AdvisoryKind};
use crate::error::{CodemendError, Result};
use crate::generation::CodeGenerator;
use crate::parser::{parse, ResponseSchema};
use crate::pattern::static_regex;

static_regex! {
    fn python_input() = r"\binput\s*\(|\bsys\.stdin\b|\bfileinput\.";
}
static_regex! {
    fn javascript_input() = r"\breadline\b|\bprocess\.stdin\b|\bprompt\s*\(|/dev/stdin";
}
static_regex! {
    fn java_input() = r"Scanner\s*\(\s*System\.in\s*\)|\bSystem\.in\b|\bSystem\.console\s*\(";
}
static_regex! {
    fn csharp_input() = r"Console\.(?:ReadLine|ReadKey|Read|In)\b";
}
static_regex! {
    fn cpp_input() = r"\bcin\s*>>|\bgetline\s*\(\s*(?:std::)?cin\b|\bscanf\s*\(|\bgetchar\s*\(|\bfgets\s*\([^)]*\bstdin\b|\bgets\s*\(";
}
static_regex! {
    fn php_input() = r"(?i)\bf(?:gets|scanf|read)\s*\(\s*STDIN\b|\breadline\s*\(|php://stdin";
}
static_regex! {
    fn ruby_input() = r"(?m)(?:^|[^.\w])gets\b|\bSTDIN\b|\$stdin\b|\bARGF\b";
}
static_regex! {
    fn r_input() = r#"\breadline\s*\(|\breadLines\s*\(\s*(?:con\s*=\s*)?(?:file\s*\(\s*)?["']stdin|\bscan\s*\(\s*(?:file\s*=\s*)?["']stdin|\bscan\s*\(\s*\)"#;
}
static_regex! {
    fn shell_input() = r"(?m)(?:^|[;&|]\s*|\bdo\s+|\bthen\s+)\s*read\b";
}

fn patterns_for(language: Language) -> Option<&'static regex::Regex> {
    match language {
        Language::Python => python_input(),
        Language::JavaScript => javascript_input(),
        Language::Java => java_input(),
        Language::CSharp => csharp_input(),
        Language::Cpp => cpp_input(),
        Language::Php => php_input(),
        Language::Ruby => ruby_input(),
        Language::R => r_input(),
        Language::Shell => shell_input(),
    }
}

/// Whether `code` reads interactive input. Unknown languages never do.
pub fn needs_input(code: &str, language: &str) -> bool {
    Language::parse(language)
        .and_then(patterns_for)
        .is_some_and(|re| re.is_match(code))
}

/// The collaborator's plan for supplying input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSynthesis {
    pub input_analysis: String,
    pub test_data: String,
    pub execution_method: String,
    pub modified_code: String,
}

/// How the pipeline applies a synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPlan {
    /// Replace the artifact's source before the first attempt.
    ReplaceCode(String),
    /// Feed this text on standard input for every attempt.
    Stdin(String),
}

impl InputSynthesis {
    /// Modified code wins over test data; `None` when both are empty.
    pub fn plan(&self) -> Option<InputPlan> {
        if !self.modified_code.trim().is_empty() {
            return Some(InputPlan::ReplaceCode(self.modified_code.clone()));
        }
        if !self.test_data.trim().is_empty() {
            let mut data = self.test_data.trim_matches('\n').to_string();
            data.push('\n');
            return Some(InputPlan::Stdin(data));
        }
        None
    }
}

/// Ask the collaborator for test input. A failed call or a response without
/// usable data is an error.
pub async fn synthesize(
    generator: &dyn CodeGenerator,
    code: &str,
    language: &str,
) -> Result<InputSynthesis> {
    let response = generator.synthesize_input(code, language).await?;
    let fields = parse(&response, &ResponseSchema::INPUT_SYNTHESIS);
    debug!(missing = ?fields.missing, "input synthesis parsed");
    let synthesis = InputSynthesis {
        input_analysis: fields.text("input_analysis").to_string(),
        test_data: fields.text("test_data").to_string(),
        execution_method: fields.text("execution_method").to_string(),
        modified_code: fields.text("modified_code").to_string(),
    };
    if synthesis.plan().is_none() {
        return Err(CodemendError::Generation(
            "input synthesis returned neither test data nor modified code".to_string(),
        ));
    }
    Ok(synthesis)
}

/// Advisory recorded when input could not be synthesized.
pub fn manual_input_advisory(reason: &dyn std::fmt::Display) -> Advisory {
    Advisory::new(
        AdvisoryKind::InputSynthesisFailed,
        format!("manual input required: {reason}"),
    )
}
