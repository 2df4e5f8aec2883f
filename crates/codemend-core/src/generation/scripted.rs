//! Deterministic collaborator for tests and offline runs.
//!
//! Responses are queued per call kind and handed out in order. An exhausted
//! queue answers with a generation error. Every fix request is recorded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{CodeGenerator, FixRequest};
use crate::error::{CodemendError, Result};

type Script = Mutex<VecDeque<std::result::Result<String, String>>>;

#[derive(Default)]
pub struct ScriptedGenerator {
    generations: Script,
    fixes: Script,
    syntheses: Script,
    generate_calls: AtomicU32,
    fix_calls: AtomicU32,
    synthesis_calls: AtomicU32,
    fix_requests: Mutex<Vec<FixRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn next(script: &Script, kind: &str) -> Result<String> {
    match lock(script).pop_front() {
        Some(Ok(text)) => Ok(text),
        Some(Err(message)) => Err(CodemendError::Generation(message)),
        None => Err(CodemendError::Generation(format!("no scripted {kind} response left"))),
    }
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw generation response.
    pub fn with_generation(self, response: impl Into<String>) -> Self {
        lock(&self.generations).push_back(Ok(response.into()));
        self
    }

    /// Queue a raw fix response.
    pub fn with_fix(self, response: impl Into<String>) -> Self {
        lock(&self.fixes).push_back(Ok(response.into()));
        self
    }

    /// Queue a fix call that fails.
    pub fn with_fix_error(self, message: impl Into<String>) -> Self {
        lock(&self.fixes).push_back(Err(message.into()));
        self
    }

    /// Queue a raw input-synthesis response.
    pub fn with_synthesis(self, response: impl Into<String>) -> Self {
        lock(&self.syntheses).push_back(Ok(response.into()));
        self
    }

    pub fn with_synthesis_error(self, message: impl Into<String>) -> Self {
        lock(&self.syntheses).push_back(Err(message.into()));
        self
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn fix_calls(&self) -> u32 {
        self.fix_calls.load(Ordering::SeqCst)
    }

    pub fn synthesis_calls(&self) -> u32 {
        self.synthesis_calls.load(Ordering::SeqCst)
    }

    /// Fix requests received so far, in order.
    pub fn fix_requests(&self) -> Vec<FixRequest> {
        lock(&self.fix_requests).clone()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, _task: &str) -> Result<String> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.generations, "generation")
    }

    async fn fix(&self, request: &FixRequest) -> Result<String> {
        self.fix_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.fix_requests).push(request.clone());
        next(&self.fixes, "fix")
    }

    async fn synthesize_input(&self, _code: &str, _language: &str) -> Result<String> {
        self.synthesis_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.syntheses, "input synthesis")
    }
}

/// A generation response in the canonical marker layout.
pub fn generation_response(language: &str, dependencies: &[&str], code: &str) -> String {
    let deps = if dependencies.is_empty() {
        "none".to_string()
    } else {
        dependencies.join("\n")
    };
    format!(
        "LANGUAGE: {language}\nDEPENDENCIES:\n{deps}\nCODE:\n```{language}\n{code}\n```\nEXPLANATION:\nGenerated for the task.\n"
    )
}

/// A fix response in the canonical marker layout.
pub fn fix_response(analysis: &str, code: &str) -> String {
    format!(
        "ERROR_ANALYSIS:\n{analysis}\nFIX_APPROACH:\nAdjusted the failing statement.\nFIXED_CODE:\n```\n{code}\n```\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, ResponseSchema};

    #[tokio::test]
    async fn test_queues_are_consumed_in_order() {
        let generator = ScriptedGenerator::new()
            .with_fix(fix_response("first", "a = 1"))
            .with_fix_error("upstream down");
        let request = FixRequest {
            task: "t".to_string(),
            language: "python".to_string(),
            code: "a = 1/0".to_string(),
            fault_text: String::new(),
            attempt_index: 0,
        };

        assert!(generator.fix(&request).await.unwrap().contains("a = 1"));
        assert!(generator.fix(&request).await.is_err());
        assert!(generator.fix(&request).await.is_err());
        assert_eq!(generator.fix_calls(), 3);
        assert_eq!(generator.fix_requests().len(), 3);
        assert!(generator.generate("x").await.is_err());
    }

    #[test]
    fn test_helpers_parse_cleanly() {
        let fields = parse(
            &generation_response("python", &["requests>=2"], "print(1)"),
            &ResponseSchema::GENERATION,
        );
        assert!(!fields.is_degraded(), "{:?}", fields.missing);
        assert_eq!(fields.text("code"), "print(1)");
        assert_eq!(fields.list("dependencies"), ["requests>=2".to_string()]);

        let fields = parse(&fix_response("bad divisor", "x = 1"), &ResponseSchema::FIX);
        assert_eq!(fields.text("fixed_code"), "x = 1");
    }
}
