//! Static screen for risky calls in generated code.
//!
//! Findings are advisories only; execution is never blocked.

use toolchain_env::Language;

use crate::domain::{Advisory, AdvisoryKind};

const PYTHON: &[&str] = &[
    "eval(",
    "exec(",
    "os.system(",
    "os.popen(",
    "subprocess",
    "__import__",
    "importlib",
    "globals(",
    "locals(",
    "shutil.rmtree(",
];
const JAVASCRIPT: &[&str] = &["eval(", "new Function(", "child_process", "fs.rmSync(", "fs.unlinkSync("];
const JAVA: &[&str] = &["Runtime.getRuntime().exec(", "ProcessBuilder", "Class.forName("];
const CSHARP: &[&str] = &["Process.Start(", "Assembly.Load", "Directory.Delete("];
const CPP: &[&str] = &["system(", "popen(", "execv", "execl", "remove("];
const PHP: &[&str] = &["eval(", "shell_exec(", "system(", "passthru(", "proc_open(", "popen(", "unlink("];
const RUBY: &[&str] = &["eval(", "system(", "exec(", "%x", "`", "IO.popen", "FileUtils.rm_rf"];
const R: &[&str] = &["system(", "system2(", "eval(parse(", "unlink("];
const SHELL: &[&str] = &["rm -rf", "curl ", "wget ", "eval ", "sudo ", "mkfs", "dd if="];

fn risky_calls(language: Language) -> &'static [&'static str] {
    match language {
        Language::Python => PYTHON,
        Language::JavaScript => JAVASCRIPT,
        Language::Java => JAVA,
        Language::CSharp => CSHARP,
        Language::Cpp => CPP,
        Language::Php => PHP,
        Language::Ruby => RUBY,
        Language::R => R,
        Language::Shell => SHELL,
    }
}

/// Risky calls found in `code`, in table order.
pub fn risky_calls_in(code: &str, language: &str) -> Vec<&'static str> {
    let Some(language) = Language::parse(language) else {
        return Vec::new();
    };
    risky_calls(language)
        .iter()
        .copied()
        .filter(|call| code.contains(*call))
        .collect()
}

/// One `SafetyConcern` advisory naming every risky call, if any.
pub fn screen(code: &str, language: &str) -> Option<Advisory> {
    let found = risky_calls_in(code, language);
    if found.is_empty() {
        return None;
    }
    Some(Advisory::new(
        AdvisoryKind::SafetyConcern,
        format!(
            "code uses potentially unsafe calls: {}",
            found
                .iter()
                .map(|c| format!("`{}`", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ))
}
