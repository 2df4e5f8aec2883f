//! Session rendering and audit artifacts.

use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use similar::TextDiff;

use crate::domain::{ExecutionOutcome, ExecutionStatus, FixAttempt, FixDisposition};
use crate::error::{CodemendError, Result};
use crate::repair::{FinalStatus, RepairSession, SessionEntry};

/// Captured streams longer than this are cut in the full-history rendering.
const STREAM_PREVIEW_CHARS: usize = 2_000;

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Success => "success",
        ExecutionStatus::RuntimeFault => "runtime fault",
        ExecutionStatus::SyntaxFault => "syntax fault",
        ExecutionStatus::ToolchainUnavailable => "toolchain unavailable",
    }
}

fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(STREAM_PREVIEW_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}\n... (truncated)")
    } else {
        head
    }
}

/// Fenced block whose fence is longer than any backtick run in `body`.
fn fence(out: &mut String, tag: &str, body: &str) {
    let longest = body
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let ticks = "`".repeat(longest.max(2) + 1);
    let _ = writeln!(out, "{ticks}{tag}\n{}\n{ticks}", body.trim_end_matches('\n'));
}

fn render_outcome(out: &mut String, outcome: &ExecutionOutcome) {
    let _ = writeln!(
        out,
        "## Attempt {} (version {})\n\n- status: {}\n- duration: {} ms",
        outcome.attempt_index,
        outcome.artifact_version,
        status_label(outcome.status),
        outcome.duration_ms
    );
    if let Some(code) = outcome.exit_code {
        let _ = writeln!(out, "- exit code: {code}");
    }
    if let Some(summary) = outcome.fault_summary() {
        let _ = writeln!(out, "- fault: {summary}");
    }
    if let Some(value) = &outcome.result_value {
        let _ = writeln!(out, "- result: `{value}`");
    }
    out.push('\n');
    if let Some(excerpt) = &outcome.excerpt {
        fence(out, "text", excerpt);
        out.push('\n');
    }
    for (label, stream) in [("stdout", &outcome.stdout), ("stderr", &outcome.stderr)] {
        if !stream.trim().is_empty() {
            let _ = writeln!(out, "### {label}\n");
            fence(out, "text", &preview(stream));
            out.push('\n');
        }
    }
}

fn render_fix(out: &mut String, fix: &FixAttempt) {
    let disposition = match fix.disposition {
        FixDisposition::Modified => "modified",
        FixDisposition::Unchanged => "unchanged",
        FixDisposition::GenerationFailed => "generation failed",
    };
    let _ = writeln!(out, "## Fix after attempt {} ({disposition})\n", fix.attempt_index);
    if let Some(failure) = &fix.failure {
        let _ = writeln!(out, "Fix request failed: {failure}\n");
    }
    if !fix.error_analysis.is_empty() {
        let _ = writeln!(out, "**Error analysis:** {}\n", fix.error_analysis);
    }
    if !fix.fix_approach.is_empty() {
        let _ = writeln!(out, "**Fix approach:** {}\n", fix.fix_approach);
    }
    if let Some(fixed) = fix.fixed_code.as_deref().filter(|_| fix.is_modified()) {
        let diff = TextDiff::from_lines(fix.original_code.as_str(), fixed);
        let unified = diff
            .unified_diff()
            .context_radius(2)
            .header(
                &format!("attempt {}", fix.attempt_index),
                &format!("attempt {}", fix.attempt_index + 1),
            )
            .to_string();
        fence(out, "diff", &unified);
        out.push('\n');
    }
}

/// Markdown rendering of the whole session.
pub fn render_session_md(session: &RepairSession) -> String {
    let mut out = String::new();
    let status = session.final_status.map_or("running", |s| s.label());
    let _ = writeln!(out, "# Repair Session `{}`\n", session.session_id);
    let _ = writeln!(
        out,
        "- task: {}\n- language: {}\n- status: {status}\n- executions: {}\n- fixes: {} (max {})\n",
        session.task,
        session.language(),
        session.execution_count(),
        session.total_fix_count,
        session.max_attempts
    );

    if !session.advisories.is_empty() {
        out.push_str("## Advisories\n\n");
        for advisory in &session.advisories {
            let _ = writeln!(out, "- {advisory}");
        }
        out.push('\n');
    }

    for entry in &session.entries {
        match entry {
            SessionEntry::Execution(outcome) => render_outcome(&mut out, outcome),
            SessionEntry::Fix(fix) => render_fix(&mut out, fix),
        }
    }

    out.push_str("## Final code\n\n");
    fence(&mut out, session.language(), &session.final_code);
    out
}

/// Short user-facing text: the final code and what it produced.
pub fn render_final_response(session: &RepairSession) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Generated code:\n");
    fence(&mut out, session.language(), &session.final_code);
    out.push('\n');

    let Some(last) = session.last_outcome() else {
        out.push_str("The code was not executed.\n");
        return out;
    };

    match session.final_status {
        Some(FinalStatus::NotExecuted) => {
            let _ = writeln!(
                out,
                "The code was not executed. {}",
                last.fault_message.as_deref().unwrap_or_default()
            );
            return out;
        }
        Some(FinalStatus::Succeeded) if session.total_fix_count > 0 => {
            let _ = writeln!(
                out,
                "Execution result (after {} fix{}):\n",
                session.total_fix_count,
                if session.total_fix_count == 1 { "" } else { "es" }
            );
        }
        Some(FinalStatus::Succeeded) => out.push_str("Execution result:\n\n"),
        Some(status) => {
            let _ = writeln!(
                out,
                "Execution failed ({status}): {}\n",
                last.fault_summary().unwrap_or_default()
            );
        }
        None => {}
    }

    if let Some(value) = &last.result_value {
        let _ = writeln!(out, "Result variable:\n{value}\n");
    }
    if !last.stdout.trim().is_empty() {
        let _ = writeln!(out, "Standard output:\n{}\n", last.stdout.trim_end());
    }
    if !last.stderr.trim().is_empty() {
        let _ = writeln!(out, "Standard error:\n{}\n", last.stderr.trim_end());
    }
    for advisory in &session.advisories {
        let _ = writeln!(out, "Note: {advisory}");
    }
    out
}

fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn session_dir(session_id: &str, dir: &Path) -> Result<PathBuf> {
    let mut components = Path::new(session_id).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(dir.join(session_id)),
        _ => Err(CodemendError::Config(format!("invalid session id '{session_id}'"))),
    }
}

/// Persist `<dir>/<session_id>/session.json` and `<dir>/<session_id>/session.digest`.
pub fn write_session_artifact(session: &RepairSession, dir: &Path) -> Result<PathBuf> {
    let session_dir = session_dir(&session.session_id, dir)?;
    std::fs::create_dir_all(&session_dir)?;

    let artifact_path = session_dir.join("session.json");
    let digest_path = session_dir.join("session.digest");
    let json = serde_json::to_vec_pretty(session)?;

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest_hex(&json).as_bytes())?;

    Ok(artifact_path)
}

/// Read `<dir>/<session_id>/session.json`, verifying its digest.
pub fn read_session_artifact(session_id: &str, dir: &Path) -> Result<RepairSession> {
    let session_dir = session_dir(session_id, dir)?;
    let json = std::fs::read(session_dir.join("session.json"))?;
    let digest = std::fs::read_to_string(session_dir.join("session.digest"))?;
    let actual = digest_hex(&json);
    if digest.trim() != actual {
        return Err(CodemendError::DigestMismatch {
            expected: digest.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Advisory, AdvisoryKind, CodeArtifact};

    fn fixed_session() -> RepairSession {
        let mut session = RepairSession::new(
            "sess-1",
            "divide ten",
            CodeArtifact::new("python", "a = 10\nb = 0\nresult = a / b\n"),
            3,
        );
        session.advisories.push(Advisory::new(AdvisoryKind::DependencyMissing, "numpy"));
        session.record_execution(ExecutionOutcome {
            fault_class: Some("ZeroDivisionError".to_string()),
            fault_line: Some(3),
            fault_message: Some("division by zero".to_string()),
            excerpt: Some("> 3 | result = a / b".to_string()),
            ..ExecutionOutcome::new(0, ExecutionStatus::RuntimeFault)
        });
        session.record_fix(FixAttempt {
            attempt_index: 0,
            error_analysis: "b is zero".to_string(),
            fix_approach: "use 2".to_string(),
            original_code: "a = 10\nb = 0\nresult = a / b\n".to_string(),
            fixed_code: Some("a = 10\nb = 2\nresult = a / b\n".to_string()),
            disposition: FixDisposition::Modified,
            failure: None,
        });
        let revised = session.chain.latest().revised("a = 10\nb = 2\nresult = a / b\n");
        session.chain.push(revised);
        session.record_execution(ExecutionOutcome {
            artifact_version: 1,
            result_value: Some("5.0".to_string()),
            ..ExecutionOutcome::new(1, ExecutionStatus::Success)
        });
        session.final_code = "a = 10\nb = 2\nresult = a / b\n".to_string();
        session.finish(FinalStatus::Succeeded);
        session
    }

    #[test]
    fn test_session_md_includes_fault_and_diff() {
        let md = render_session_md(&fixed_session());
        assert!(md.contains("# Repair Session `sess-1`"));
        assert!(md.contains("- status: succeeded"));
        assert!(md.contains("ZeroDivisionError at line 3: division by zero"));
        assert!(md.contains("-b = 0"));
        assert!(md.contains("+b = 2"));
        assert!(md.contains("[dependency missing] numpy"));
    }

    #[test]
    fn test_final_response_sections() {
        let text = render_final_response(&fixed_session());
        assert!(text.contains("```python\na = 10\nb = 2"));
        assert!(text.contains("Execution result (after 1 fix):"));
        assert!(text.contains("Result variable:\n5.0"));
        assert!(!text.contains("Standard error:"));
    }

    #[test]
    fn test_fence_outgrows_backticks_in_body() {
        let mut out = String::new();
        fence(&mut out, "", "printed ```python\nx = 1\n```");
        assert!(out.starts_with("````\nprinted ```python"));
        assert!(out.ends_with("```\n````\n"));

        let mut plain = String::new();
        fence(&mut plain, "python", "a = 1\n");
        assert_eq!(plain, "```python\na = 1\n```\n");
    }

    #[test]
    fn test_artifact_roundtrip_and_tamper_detection() {
        let dir = tempfile::tempdir().unwrap();
        let session = fixed_session();
        let path = write_session_artifact(&session, dir.path()).unwrap();
        assert!(path.ends_with("sess-1/session.json"));

        let loaded = read_session_artifact("sess-1", dir.path()).unwrap();
        assert_eq!(loaded, session);

        let mut json = std::fs::read_to_string(&path).unwrap();
        json = json.replace("divide ten", "divide nine");
        std::fs::write(&path, json).unwrap();
        let err = read_session_artifact("sess-1", dir.path()).unwrap_err();
        assert!(matches!(err, CodemendError::DigestMismatch { .. }));
    }

    #[test]
    fn test_rejects_path_like_session_ids() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_session_artifact("../etc", dir.path()),
            Err(CodemendError::Config(_))
        ));
    }
}
