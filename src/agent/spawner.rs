//! Agent process spawner.
//!
//! Spawns the Claude Code CLI in print mode with streaming-JSON output:
//! - `kill_on_drop(true)` so the process never outlives its [`AgentProcess`].
//! - stdin is null; the prompt travels as an argument.
//! - The `CLAUDECODE` marker is stripped so the CLI does not refuse to start
//!   when the sidecar itself runs inside an agent session.
//! - Edit-mode runs are confined to the apps directory with read-only tools;
//!   create-mode runs get no tools at all.
//!
//! stdout feeds the reader task; stderr is forwarded to the log and its most
//! recent lines are kept to explain a failed exit.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{reader, AgentRun, AgentRunner, RunExit, RunSpec};
use crate::{AppError, Result};

/// Capacity of the message channel between reader and session.
pub const MESSAGE_CHANNEL_CAPACITY: usize = 64;

/// Time a process gets to exit on its own before it is killed.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Tools granted inside an edit scope.
pub const READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep"];

/// Tools a run must never use.
pub const MUTATING_TOOLS: &[&str] = &[
    "Bash",
    "Edit",
    "MultiEdit",
    "Write",
    "NotebookEdit",
    "WebFetch",
    "WebSearch",
    "Task",
];

const STDERR_TAIL_LINES: usize = 20;

// ── Runner ───────────────────────────────────────────────────────────────────

/// [`AgentRunner`] that spawns the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCliRunner {
    executable: PathBuf,
}

impl ClaudeCliRunner {
    /// Runner for the executable at `executable`.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Path of the executable this runner spawns.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Argument vector for a run, without the program name.
    #[must_use]
    pub fn build_args(spec: &RunSpec) -> Vec<String> {
        let mut args = vec![
            "-p".to_owned(),
            spec.task_prompt.clone(),
            "--output-format".to_owned(),
            "stream-json".to_owned(),
            "--verbose".to_owned(),
            "--model".to_owned(),
            spec.model.clone(),
            "--max-turns".to_owned(),
            spec.max_turns.to_string(),
            "--append-system-prompt".to_owned(),
            spec.system_prompt.clone(),
        ];

        match &spec.scope {
            Some(scope) => {
                args.push("--add-dir".to_owned());
                args.push(scope.working_dir.to_string_lossy().into_owned());
                args.push("--allowedTools".to_owned());
                args.push(scope.allowed_tools.join(","));
                args.push("--disallowedTools".to_owned());
                args.push(MUTATING_TOOLS.join(","));
            }
            None => {
                let every_tool: Vec<&str> = MUTATING_TOOLS
                    .iter()
                    .chain(READ_ONLY_TOOLS)
                    .copied()
                    .collect();
                args.push("--disallowedTools".to_owned());
                args.push(every_tool.join(","));
            }
        }

        args
    }

    /// Fully configured command for a run.
    #[must_use]
    pub fn build_command(&self, spec: &RunSpec) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(Self::build_args(spec))
            .env_remove("CLAUDECODE")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(scope) = &spec.scope {
            cmd.current_dir(&scope.working_dir);
        }

        cmd
    }
}

impl AgentRunner for ClaudeCliRunner {
    fn start(&self, spec: &RunSpec, abort: CancellationToken) -> Result<AgentRun> {
        let session_id = spec.session_id.to_string();
        let mut child = self.build_command(spec).spawn().map_err(|err| {
            AppError::Upstream(format!("Failed to start Claude Code: {err}"))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Upstream("Failed to capture Claude Code output".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Upstream("Failed to capture Claude Code errors".into()))?;

        info!(
            session_id,
            pid = child.id().unwrap_or(0),
            executable = %self.executable.display(),
            model = spec.model,
            max_turns = spec.max_turns,
            edit = spec.scope.is_some(),
            "agent process spawned"
        );

        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let reader = tokio::spawn(reader::run_reader(
            session_id.clone(),
            stdout,
            message_tx,
            abort.child_token(),
        ));

        let stderr_tail = StderrTail::default();
        let stderr_task = tokio::spawn(forward_stderr(
            session_id.clone(),
            stderr,
            stderr_tail.clone(),
            abort.child_token(),
        ));

        Ok(AgentRun::with_process(
            message_rx,
            AgentProcess {
                session_id,
                child,
                abort,
                reader,
                stderr_task,
                stderr_tail,
            },
        ))
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// A spawned agent process and its I/O tasks.
#[derive(Debug)]
pub struct AgentProcess {
    session_id: String,
    child: Child,
    abort: CancellationToken,
    reader: JoinHandle<Result<()>>,
    stderr_task: JoinHandle<()>,
    stderr_tail: StderrTail,
}

impl AgentProcess {
    /// Stop the I/O tasks and terminate the process: polite signal first,
    /// kill after [`CLOSE_GRACE`].
    pub async fn terminate(mut self) {
        self.abort.cancel();
        if request_exit(&self.child) {
            match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(session_id = self.session_id, %status, "agent process exited after signal");
                }
                Ok(Err(err)) => {
                    warn!(session_id = self.session_id, %err, "error waiting for agent process");
                }
                Err(_elapsed) => {
                    warn!(session_id = self.session_id, "agent process ignored termination, killing");
                    self.kill().await;
                }
            }
        } else {
            self.kill().await;
        }
        self.reader.abort();
        self.stderr_task.abort();
    }

    /// Wait for a process whose stdout already closed. A process that does
    /// not exit within [`CLOSE_GRACE`] is killed and reported as failed.
    pub async fn wait_exit(mut self) -> RunExit {
        let exit = match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(Ok(status)) if status.success() => RunExit::Success,
            Ok(Ok(status)) => RunExit::Failed {
                code: status.code(),
                detail: None,
            },
            Ok(Err(err)) => {
                warn!(session_id = self.session_id, %err, "error waiting for agent process");
                RunExit::Failed {
                    code: None,
                    detail: Some(err.to_string()),
                }
            }
            Err(_elapsed) => {
                warn!(session_id = self.session_id, "agent process lingering after end of stream, killing");
                self.kill().await;
                RunExit::Failed {
                    code: None,
                    detail: Some("Claude Code did not exit after finishing output".into()),
                }
            }
        };

        // Let the stderr forwarder drain what the process wrote before exiting.
        if tokio::time::timeout(CLOSE_GRACE, &mut self.stderr_task)
            .await
            .is_err()
        {
            self.stderr_task.abort();
        }
        self.abort.cancel();

        match exit {
            RunExit::Failed { code, detail: None } => RunExit::Failed {
                code,
                detail: self.stderr_tail.last(),
            },
            other => other,
        }
    }

    async fn kill(&mut self) {
        if let Err(err) = self.child.kill().await {
            warn!(session_id = self.session_id, %err, "failed to kill agent process");
        }
    }
}

/// Ask the process to exit. Returns whether a signal was delivered.
#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

// ── stderr ───────────────────────────────────────────────────────────────────

/// Ring buffer of the most recent stderr lines.
#[derive(Debug, Clone, Default)]
pub struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    /// Record a line, evicting the oldest beyond the retention limit.
    pub fn push(&self, line: String) {
        let mut lines = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == STDERR_TAIL_LINES {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Most recent non-blank line.
    #[must_use]
    pub fn last(&self) -> Option<String> {
        let lines = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        lines.back().cloned()
    }
}

async fn forward_stderr<R>(
    session_id: String,
    stderr: R,
    tail: StderrTail,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim_end().to_owned();
                    if line.trim().is_empty() {
                        continue;
                    }
                    warn!(target: "agent_stderr", session_id, "{line}");
                    tail.push(line);
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(session_id, %err, "agent stderr closed with error");
                    break;
                }
            },
        }
    }
}
