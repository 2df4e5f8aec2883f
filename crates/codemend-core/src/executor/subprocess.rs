//! Out-of-process execution for compiled and interpreted languages.
//!
//! Each attempt gets its own temporary directory named after the session and
//! attempt. An optional compile step runs first; a failing compile stops the
//! attempt with a `CompileError`. The run step shares what is left of the
//! attempt's time budget. The directory is removed when the attempt ends.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use toolchain_env::{run_captured, CommandSpec, Language, ProbeReport};
use tracing::{debug, warn};

use super::{interrupted, setup_failure, ExecutionRequest, LanguageExecutor};
use crate::domain::{excerpt_around, ExecutionOutcome, ExecutionStatus, COMPILE_FAULT_CLASS};
use crate::error::Result;
use crate::pattern::static_regex;

const EXCERPT_RADIUS: u32 = 2;

/// Files, compile step and run step for one attempt.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Main source file name, relative to the attempt directory.
    pub source_file: String,
    /// Files to write before running, including the source.
    pub files: Vec<(String, String)>,
    pub compile: Option<CommandSpec>,
    pub run: CommandSpec,
}

impl ExecutionPlan {
    fn interpreted(source_file: &str, code: &str, run: CommandSpec) -> Self {
        Self {
            source_file: source_file.to_string(),
            files: vec![(source_file.to_string(), code.to_string())],
            compile: None,
            run,
        }
    }

    fn compiled(source_file: &str, code: &str, compile: CommandSpec, run: CommandSpec) -> Self {
        Self {
            compile: Some(compile),
            ..Self::interpreted(source_file, code, run)
        }
    }

    fn in_dir(mut self, dir: &Path) -> Self {
        self.compile = self.compile.map(|c| c.with_work_dir(dir));
        self.run = self.run.with_work_dir(dir);
        self
    }
}

/// Build the plan for `language` inside `dir`.
pub fn plan_for(language: Language, code: &str, toolchain: &ProbeReport, dir: &Path) -> ExecutionPlan {
    let exe = |idx: usize, fallback: &str| -> String {
        toolchain
            .executables
            .get(idx)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| fallback.to_string())
    };
    let binary = |name: &str| -> String {
        let file = if cfg!(windows) {
            format!("{name}.exe")
        } else {
            name.to_string()
        };
        dir.join(file).to_string_lossy().into_owned()
    };

    let plan = match language {
        Language::Python => {
            ExecutionPlan::interpreted("main.py", code, CommandSpec::new(exe(0, "python3")).arg("main.py"))
        }
        Language::JavaScript => {
            ExecutionPlan::interpreted("main.js", code, CommandSpec::new(exe(0, "node")).arg("main.js"))
        }
        Language::Java => {
            let class = java_class_name(code);
            let source = format!("{class}.java");
            ExecutionPlan::compiled(
                &source,
                code,
                CommandSpec::new(exe(1, "javac")).arg(&source),
                CommandSpec::new(exe(0, "java")).with_args(["-cp", "."]).arg(class),
            )
        }
        Language::CSharp => {
            let project = csharp_project(toolchain.version.as_deref());
            let mut plan = ExecutionPlan::compiled(
                "Program.cs",
                code,
                CommandSpec::new(exe(0, "dotnet")).with_args([
                    "build",
                    "-nologo",
                    "-v",
                    "q",
                    "-clp:NoSummary",
                    "-o",
                    "out",
                ]),
                CommandSpec::new(exe(0, "dotnet")).arg(dir.join("out").join("Program.dll").to_string_lossy()),
            );
            plan.files.push(("Program.csproj".to_string(), project));
            for spec in plan.compile.iter_mut().chain(std::iter::once(&mut plan.run)) {
                spec.env.push(("DOTNET_CLI_TELEMETRY_OPTOUT".to_string(), "1".to_string()));
                spec.env.push(("DOTNET_NOLOGO".to_string(), "1".to_string()));
            }
            plan
        }
        Language::Cpp => {
            let compiler = exe(0, "g++");
            let is_msvc = Path::new(&compiler)
                .file_stem()
                .is_some_and(|s| s.eq_ignore_ascii_case("cl"));
            let compile = if is_msvc {
                CommandSpec::new(compiler).with_args(["/nologo", "/EHsc", "main.cpp", "/Fe:main.exe"])
            } else {
                CommandSpec::new(compiler).with_args(["-std=c++17", "-O0", "-o", "main", "main.cpp"])
            };
            ExecutionPlan::compiled("main.cpp", code, compile, CommandSpec::new(binary("main")))
        }
        Language::Php => ExecutionPlan::interpreted(
            "main.php",
            code,
            CommandSpec::new(exe(0, "php")).with_args(["-d", "display_errors=stderr", "main.php"]),
        ),
        Language::Ruby => {
            ExecutionPlan::interpreted("main.rb", code, CommandSpec::new(exe(0, "ruby")).arg("main.rb"))
        }
        Language::R => {
            let r = exe(0, "Rscript");
            let is_rscript = Path::new(&r)
                .file_stem()
                .is_some_and(|s| s.to_string_lossy().eq_ignore_ascii_case("rscript"));
            let run = if is_rscript {
                CommandSpec::new(r).arg("main.R")
            } else {
                CommandSpec::new(r).with_args(["--no-save", "--quiet", "-f", "main.R"])
            };
            ExecutionPlan::interpreted("main.R", code, run)
        }
        Language::Shell => {
            ExecutionPlan::interpreted("main.sh", code, CommandSpec::new(exe(0, "sh")).arg("main.sh"))
        }
    };
    plan.in_dir(dir)
}

static_regex! {
    fn java_public_class() = r"public\s+(?:final\s+|abstract\s+)*class\s+([A-Za-z_]\w*)";
}

/// The file name a Java source must use: its public class, else `Main`.
pub fn java_class_name(code: &str) -> String {
    java_public_class()
        .and_then(|re| re.captures(code))
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "Main".to_string())
}

/// Minimal SDK-style project targeting the installed SDK's major version.
fn csharp_project(sdk_version: Option<&str>) -> String {
    let major = sdk_version
        .and_then(|v| v.split('.').next())
        .and_then(|m| m.trim().parse::<u32>().ok())
        .unwrap_or(8);
    format!(
        "<Project Sdk=\"Microsoft.NET.Sdk\">\n  <PropertyGroup>\n    <OutputType>Exe</OutputType>\n    \
         <TargetFramework>net{major}.0</TargetFramework>\n    <ImplicitUsings>enable</ImplicitUsings>\n    \
         <Nullable>disable</Nullable>\n  </PropertyGroup>\n</Project>\n"
    )
}

/// Fault details recovered from a process's error output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultInfo {
    pub class: Option<String>,
    pub line: Option<u32>,
    pub message: Option<String>,
    /// The fault was raised while parsing the source.
    pub syntax: bool,
}

static_regex! {
    fn python_exception() = r"(?m)^(\w+(?:Error|Exception|Exit|Interrupt)):?\s*(.*)$";
}
static_regex! {
    fn js_exception() = r"(?m)^(\w*(?:Error|Exception))(?::\s*(.*))?$";
}
static_regex! {
    fn java_exception() = r#"Exception in thread "[^"]*" ([\w.$]+)(?::\s*(.*))?"#;
}
static_regex! {
    fn dotnet_exception() = r"Unhandled exception\.\s+([\w.]+)(?::\s*(.*))?";
}
static_regex! {
    fn cpp_exception() = r"terminate called after throwing an instance of '([^']+)'";
}
static_regex! {
    fn cpp_what() = r"what\(\):\s*(.*)";
}
static_regex! {
    fn php_uncaught() = r"Uncaught ([\w\\]+)(?::\s*(.*?))? in ";
}
static_regex! {
    fn php_error() = r"(?m)(?:PHP )?(Parse error|Fatal error|Warning):\s+(.*?)(?: in \S+)?(?: on line (\d+))?$";
}
static_regex! {
    fn ruby_exception() = r"(?m):\d+:in [^:]*:\s*(.*) \((\w+)\)$";
}
static_regex! {
    fn r_error() = r"(?m)^Error(?: in [^:]*?)?\s*:\s*(.*)$";
}
static_regex! {
    fn shell_error() = r"(?m)main\.sh:\s*(?:line\s+)?\d+:\s*(.*)$";
}
static_regex! {
    fn on_line() = r"on line (\d+)";
}

/// Recover class, line and message from error output.
///
/// `source_file` is the file name the program ran from; line numbers are
/// taken from the first `file:line` reference to it (the last one for
/// Python, whose tracebacks list the innermost frame last).
pub fn classify_stderr(
    language: Language,
    stderr: &str,
    source_file: &str,
    exit_code: Option<i32>,
) -> FaultInfo {
    let mut info = FaultInfo::default();
    let first = |re: Option<&'static Regex>| re.and_then(|re| re.captures(stderr));

    match language {
        Language::Python => {
            if let Some(caps) = python_exception().and_then(|re| re.captures_iter(stderr).last()) {
                info.class = Some(caps[1].to_string());
                info.message = caps.get(2).map(|m| m.as_str().trim().to_string());
            }
            info.syntax = matches!(
                info.class.as_deref(),
                Some("SyntaxError" | "IndentationError" | "TabError")
            );
        }
        Language::JavaScript => {
            if let Some(caps) = first(js_exception()) {
                info.class = Some(caps[1].to_string());
                info.message = caps.get(2).map(|m| m.as_str().trim().to_string());
            }
            info.syntax = info.class.as_deref() == Some("SyntaxError");
        }
        Language::Java => {
            if let Some(caps) = first(java_exception()) {
                info.class = caps[1].rsplit('.').next().map(str::to_string);
                info.message = caps.get(2).map(|m| m.as_str().trim().to_string());
            }
        }
        Language::CSharp => {
            if let Some(caps) = first(dotnet_exception()) {
                info.class = caps[1].rsplit('.').next().map(str::to_string);
                info.message = caps.get(2).map(|m| m.as_str().trim().to_string());
            }
        }
        Language::Cpp => {
            if let Some(caps) = first(cpp_exception()) {
                info.class = Some(caps[1].to_string());
                info.message = first(cpp_what()).map(|c| c[1].trim().to_string());
            } else if exit_code.is_none() {
                info.class = Some("Signal".to_string());
                info.message = Some("process was terminated by a signal".to_string());
            }
        }
        Language::Php => {
            if let Some(caps) = first(php_uncaught()) {
                info.class = caps[1].rsplit('\\').next().map(str::to_string);
                info.message = caps.get(2).map(|m| m.as_str().trim().to_string());
            } else if let Some(caps) = first(php_error()) {
                info.syntax = &caps[1] == "Parse error";
                info.class = Some(caps[1].replace(' ', ""));
                info.message = Some(caps[2].trim().to_string());
            }
            info.line = first(on_line()).and_then(|c| c[1].parse().ok());
        }
        Language::Ruby => {
            if stderr.contains("syntax error") {
                info.syntax = true;
                info.class = Some("SyntaxError".to_string());
            } else if let Some(caps) = first(ruby_exception()) {
                info.class = Some(caps[2].to_string());
                info.message = Some(caps[1].trim().to_string());
            }
        }
        Language::R => {
            if let Some(caps) = first(r_error()) {
                info.class = Some("RError".to_string());
                info.message = Some(caps[1].trim().to_string());
            }
        }
        Language::Shell => {
            if stderr.to_lowercase().contains("syntax error") {
                info.syntax = true;
                info.class = Some("SyntaxError".to_string());
            } else {
                info.class = Some("ShellError".to_string());
            }
            info.message = first(shell_error()).map(|c| c[1].trim().to_string());
        }
    }

    if info.line.is_none() {
        info.line = source_line(stderr, source_file, language == Language::Python);
    }
    if info.class.is_none() {
        info.class = Some(match exit_code {
            Some(code) => format!("ExitStatus{code}"),
            None => "Signal".to_string(),
        });
    }
    if info.message.as_deref().map_or(true, str::is_empty) {
        info.message = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string);
    }
    info
}

/// Line number of a `file:line`, `file(line,col)` or `file", line N` reference.
fn source_line(stderr: &str, source_file: &str, last: bool) -> Option<u32> {
    let pattern = format!(
        r#"{}"?(?::|\(|,)\s*(?:line\s+)?(\d+)"#,
        regex::escape(source_file)
    );
    let re = Regex::new(&pattern).ok()?;
    let mut lines = re.captures_iter(stderr).filter_map(|c| c[1].parse::<u32>().ok());
    if last {
        lines.last()
    } else {
        lines.next()
    }
}

/// Runs code for one language in a fresh temporary directory per attempt.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    language: Language,
}

impl SubprocessExecutor {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    async fn run(&self, request: &ExecutionRequest, toolchain: &ProbeReport) -> Result<ExecutionOutcome> {
        let started = Instant::now();
        let dir = tempfile::Builder::new()
            .prefix(&request.temp_prefix())
            .tempdir()?;
        let plan = plan_for(self.language, &request.code, toolchain, dir.path());
        for (name, contents) in &plan.files {
            tokio::fs::write(dir.path().join(name), contents).await?;
        }

        if let Some(compile) = &plan.compile {
            debug!(command = %compile.display(), "compiling");
            let output = run_captured(compile, Some(request.timeout), &request.cancel).await?;
            if let Some(outcome) = interrupted(request, &output) {
                return Ok(outcome);
            }
            if !output.success() {
                let diagnostics = output.combined_output();
                let line = source_line(&diagnostics, &plan.source_file, false);
                return Ok(ExecutionOutcome {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    fault_class: Some(COMPILE_FAULT_CLASS.to_string()),
                    fault_line: line,
                    fault_message: Some(diagnostics),
                    excerpt: line.and_then(|l| excerpt_around(&request.code, l, EXCERPT_RADIUS)),
                    exit_code: output.exit_code,
                    duration_ms: started.elapsed().as_millis() as u64,
                    ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::RuntimeFault)
                });
            }
        }

        let remaining = request
            .timeout
            .checked_sub(started.elapsed())
            .unwrap_or(Duration::ZERO)
            .max(Duration::from_millis(1));
        let run = plan.run.clone().with_stdin(request.stdin.clone());
        let output = run_captured(&run, Some(remaining), &request.cancel).await?;
        if let Some(mut outcome) = interrupted(request, &output) {
            outcome.duration_ms = started.elapsed().as_millis() as u64;
            return Ok(outcome);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        if output.success() {
            return Ok(ExecutionOutcome {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: output.exit_code,
                duration_ms,
                ..ExecutionOutcome::new(request.attempt_index, ExecutionStatus::Success)
            });
        }

        let fault = classify_stderr(self.language, &output.stderr, &plan.source_file, output.exit_code);
        let status = if fault.syntax {
            ExecutionStatus::SyntaxFault
        } else {
            ExecutionStatus::RuntimeFault
        };
        Ok(ExecutionOutcome {
            stdout: output.stdout,
            stderr: output.stderr,
            excerpt: fault
                .line
                .and_then(|l| excerpt_around(&request.code, l, EXCERPT_RADIUS)),
            fault_class: fault.class,
            fault_line: fault.line,
            fault_message: fault.message,
            exit_code: output.exit_code,
            duration_ms,
            ..ExecutionOutcome::new(request.attempt_index, status)
        })
    }
}

#[async_trait]
impl LanguageExecutor for SubprocessExecutor {
    fn language(&self) -> Language {
        self.language
    }

    async fn execute(&self, request: &ExecutionRequest, toolchain: &ProbeReport) -> ExecutionOutcome {
        match self.run(request, toolchain).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(language = %self.language, error = %err, "execution setup failed");
                setup_failure(request, &err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn toolchain(executables: &[&str], version: Option<&str>) -> ProbeReport {
        ProbeReport {
            language: String::new(),
            ready: true,
            message: String::new(),
            version: version.map(str::to_string),
            executables: executables.iter().map(|e| PathBuf::from(*e)).collect(),
        }
    }

    #[test]
    fn test_java_plan_uses_public_class_name() {
        let code = "public final class Greeter {\n  public static void main(String[] a) {}\n}\n";
        let dir = Path::new("/tmp/x");
        let plan = plan_for(
            Language::Java,
            code,
            &toolchain(&["/usr/bin/java", "/usr/bin/javac"], None),
            dir,
        );
        assert_eq!(plan.source_file, "Greeter.java");
        let compile = plan.compile.unwrap();
        assert_eq!(compile.program, "/usr/bin/javac");
        assert_eq!(compile.args, vec!["Greeter.java"]);
        assert_eq!(plan.run.args, vec!["-cp", ".", "Greeter"]);
        assert_eq!(plan.run.work_dir.as_deref(), Some(dir));
        assert_eq!(java_class_name("class Foo {}"), "Main");
    }

    #[test]
    fn test_csharp_project_targets_sdk_major() {
        let project = csharp_project(Some("6.0.420"));
        assert!(project.contains("<TargetFramework>net6.0</TargetFramework>"));
        assert!(csharp_project(None).contains("net8.0"));
    }

    #[test]
    fn test_interpreted_plans_have_no_compile_step() {
        for language in [Language::JavaScript, Language::Php, Language::Ruby, Language::R, Language::Shell] {
            let plan = plan_for(language, "", &toolchain(&[], None), Path::new("/tmp"));
            assert!(plan.compile.is_none(), "{language}");
            assert_eq!(plan.files.len(), 1);
        }
    }

    #[test]
    fn test_classify_python_traceback() {
        let stderr = "Traceback (most recent call last):\n  File \"main.py\", line 1, in <module>\n  File \"main.py\", line 3, in f\nZeroDivisionError: division by zero\n";
        let info = classify_stderr(Language::Python, stderr, "main.py", Some(1));
        assert_eq!(info.class.as_deref(), Some("ZeroDivisionError"));
        assert_eq!(info.message.as_deref(), Some("division by zero"));
        assert!(!info.syntax);
    }

    #[test]
    fn test_classify_node_error() {
        let stderr = "/tmp/codemend-s-0-abc/main.js:2\n  throw new TypeError('bad');\n  ^\n\nTypeError: bad\n    at Object.<anonymous> (/tmp/codemend-s-0-abc/main.js:2:9)\n";
        let info = classify_stderr(Language::JavaScript, stderr, "main.js", Some(1));
        assert_eq!(info.class.as_deref(), Some("TypeError"));
        assert_eq!(info.message.as_deref(), Some("bad"));
        assert_eq!(info.line, Some(2));
    }

    #[test]
    fn test_classify_java_exception() {
        let stderr = "Exception in thread \"main\" java.lang.ArithmeticException: / by zero\n\tat Main.main(Main.java:4)\n";
        let info = classify_stderr(Language::Java, stderr, "Main.java", Some(1));
        assert_eq!(info.class.as_deref(), Some("ArithmeticException"));
        assert_eq!(info.message.as_deref(), Some("/ by zero"));
        assert_eq!(info.line, Some(4));
    }

    #[test]
    fn test_classify_csharp_compile_reference() {
        let diagnostics = "/tmp/p/Program.cs(5,13): error CS0103: The name 'x' does not exist";
        assert_eq!(source_line(diagnostics, "Program.cs", false), Some(5));
    }

    #[test]
    fn test_classify_php_and_ruby() {
        let php = "PHP Fatal error:  Uncaught DivisionByZeroError: Division by zero in /tmp/main.php:3\n";
        let info = classify_stderr(Language::Php, php, "main.php", Some(255));
        assert_eq!(info.class.as_deref(), Some("DivisionByZeroError"));
        assert_eq!(info.line, Some(3));

        let ruby = "main.rb:2:in `/': divided by 0 (ZeroDivisionError)\n\tfrom main.rb:2:in `<main>'\n";
        let info = classify_stderr(Language::Ruby, ruby, "main.rb", Some(1));
        assert_eq!(info.class.as_deref(), Some("ZeroDivisionError"));
        assert_eq!(info.message.as_deref(), Some("divided by 0"));
        assert_eq!(info.line, Some(2));
    }

    #[test]
    fn test_classify_shell_syntax_and_fallback_class() {
        let info = classify_stderr(
            Language::Shell,
            "main.sh: 3: Syntax error: end of file unexpected\n",
            "main.sh",
            Some(2),
        );
        assert!(info.syntax);
        assert_eq!(info.line, Some(3));

        let info = classify_stderr(Language::Cpp, "", "main.cpp", Some(3));
        assert_eq!(info.class.as_deref(), Some("ExitStatus3"));
    }
}
