//! Captured subprocess execution with timeout and cancellation.
//!
//! Every child is spawned with piped standard streams and `kill_on_drop`.
//! On Unix the child leads its own process group so that a timeout or a
//! cancellation can take down everything it forked, and the leader is always
//! reaped before returning.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EnvError, Result};

/// Upper bound on bytes kept per stream.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How long stream readers may keep draining after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(1);

/// A program invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program path or name.
    pub program: String,
    /// Arguments to the program.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub work_dir: Option<PathBuf>,
    /// Data written to the child's standard input (stdin is null otherwise).
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Why the child stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// The child exited on its own.
    Exited,
    /// The deadline passed and the child was killed.
    TimedOut,
    /// The cancellation token fired and the child was killed.
    Cancelled,
}

/// Captured result of one child process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    /// Exit code, absent when the child was killed or died from a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub termination: Termination,
}

impl ProcessOutput {
    /// Whether the child exited on its own with status 0.
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, separated by a newline when both are set.
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Run a command to completion, capturing both streams.
///
/// `timeout = None` waits indefinitely. Partial output gathered before a
/// timeout or cancellation is still returned.
pub async fn run_captured(
    spec: &CommandSpec,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<ProcessOutput> {
    if spec.program.is_empty() {
        return Err(EnvError::EmptyCommand);
    }

    let started = Instant::now();
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &spec.work_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(command = %spec.display(), "spawning child");
    let mut child = cmd.spawn().map_err(|source| EnvError::Spawn {
        program: spec.program.clone(),
        source,
    })?;

    if let (Some(input), Some(mut pipe)) = (spec.stdin.clone(), child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(err) = pipe.write_all(input.as_bytes()).await {
                debug!(error = %err, "child closed stdin before reading all input");
            }
        });
    }

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let stdout_task = child
        .stdout
        .take()
        .map(|pipe| spawn_reader(pipe, stdout_buf.clone()));
    let stderr_task = child
        .stderr
        .take()
        .map(|pipe| spawn_reader(pipe, stderr_buf.clone()));

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let (termination, status) = tokio::select! {
        status = child.wait() => (Termination::Exited, Some(status?)),
        _ = deadline => (Termination::TimedOut, None),
        _ = cancel.cancelled() => (Termination::Cancelled, None),
    };

    if termination != Termination::Exited {
        warn!(
            command = %spec.display(),
            termination = ?termination,
            "terminating child process"
        );
        terminate(&mut child).await;
    }

    let stdout = collect(stdout_task, &stdout_buf).await;
    let stderr = collect(stderr_task, &stderr_buf).await;

    Ok(ProcessOutput {
        exit_code: status.and_then(|s| s.code()),
        stdout,
        stderr,
        duration_ms: started.elapsed().as_millis() as u64,
        termination,
    })
}

/// Kill the child's process group (Unix) and the child itself, then reap it.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: the child was spawned as the leader of its own process
        // group, so the group id equals its pid and no other group is hit.
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    if let Err(err) = child.kill().await {
        debug!(error = %err, "child already gone when killed");
    }
}

fn spawn_reader<R>(mut pipe: R, sink: Arc<Mutex<Vec<u8>>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                        buf.extend_from_slice(&chunk[..n.min(room)]);
                    }
                }
            }
        }
    })
}

async fn collect(task: Option<JoinHandle<()>>, buf: &Arc<Mutex<Vec<u8>>>) -> String {
    if let Some(mut task) = task {
        if tokio::time::timeout(READER_GRACE, &mut task).await.is_err() {
            task.abort();
        }
    }
    let bytes = buf.lock().map(|b| b.clone()).unwrap_or_default();
    String::from_utf8_lossy(&bytes).into_owned()
}
