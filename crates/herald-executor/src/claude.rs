//! The Claude Code executor.
//!
//! Runs `claude -p --verbose --output-format stream-json` with the prompt
//! piped through a staged file on stdin. Stdout is parsed as NDJSON into
//! an [`ExecResult`]; stderr is drained into the log. Cancellation and
//! deadline expiry terminate the child gracefully and still surface the
//! partial result accumulated so far.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use herald_types::HeraldError;

use crate::kill::graceful_kill;
use crate::prompt::{cleanup_prompt_dir, write_prompt_file};
use crate::stream::parse_stream;

/// Progress callback: `(event_type, message)`. Event types are
/// `"started"` (message `PID <n>`) and `"progress"`.
pub type ProgressFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// One execution request.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub task_id: String,
    pub prompt: String,
    /// Working directory for the child. Empty means inherit.
    pub project_path: String,
    /// Claude Code session to resume, if any.
    pub session_id: String,
    /// Model override, if any.
    pub model: String,
    pub allowed_tools: Vec<String>,
    /// Effective wall-clock budget (already clamped by the supervisor).
    pub timeout: Duration,
    /// Plan-only mode.
    pub dry_run: bool,
    /// Request-level environment; wins over executor-level on collision.
    pub env: HashMap<String, String>,
}

/// Final accounting for one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecResult {
    pub session_id: String,
    pub output: String,
    pub cost_usd: f64,
    pub turns: i64,
    pub exit_code: i32,
    pub duration: Duration,
}

/// Execution failure, carrying whatever partial result was accumulated.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("claude exited with code {code}")]
    NonZeroExit { code: i32, partial: ExecResult },

    #[error("execution cancelled")]
    Cancelled { partial: ExecResult },

    #[error("execution deadline exceeded")]
    TimedOut { partial: ExecResult },

    #[error("{0}")]
    Failed(#[from] HeraldError),
}

impl ExecError {
    /// The partial result, when the child got far enough to produce one.
    pub fn partial(&self) -> Option<&ExecResult> {
        match self {
            ExecError::NonZeroExit { partial, .. }
            | ExecError::Cancelled { partial }
            | ExecError::TimedOut { partial } => Some(partial),
            ExecError::Failed(_) => None,
        }
    }
}

/// A task executor. Mocked in supervisor tests.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        req: ExecRequest,
        cancel: CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<ExecResult, ExecError>;
}

/// Executor backed by the Claude Code CLI.
pub struct ClaudeExecutor {
    pub claude_path: String,
    pub work_dir: PathBuf,
    /// Executor-level environment applied to every child.
    pub env: HashMap<String, String>,
}

enum ExitCause {
    Exited(std::process::ExitStatus),
    Cancelled,
    TimedOut,
}

#[async_trait]
impl Executor for ClaudeExecutor {
    async fn execute(
        &self,
        req: ExecRequest,
        cancel: CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<ExecResult, ExecError> {
        // The prompt goes through a file to dodge argv length limits.
        let prompt_path = write_prompt_file(&self.work_dir, &req.task_id, &req.prompt)?;
        let result = self.run(&req, &prompt_path, cancel, on_progress).await;
        cleanup_prompt_dir(&self.work_dir, &req.task_id);
        result
    }
}

impl ClaudeExecutor {
    fn build_args(&self, req: &ExecRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--verbose".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
        ];

        if !req.model.is_empty() {
            args.push("--model".into());
            args.push(req.model.clone());
        }
        if !req.session_id.is_empty() {
            args.push("--resume".into());
            args.push(req.session_id.clone());
        }
        for tool in &req.allowed_tools {
            args.push("--allowedTools".into());
            args.push(tool.clone());
        }
        if req.dry_run {
            args.push("--permission-mode".into());
            args.push("plan".into());
        }

        args
    }

    async fn run(
        &self,
        req: &ExecRequest,
        prompt_path: &std::path::Path,
        cancel: CancellationToken,
        on_progress: ProgressFn,
    ) -> Result<ExecResult, ExecError> {
        let prompt_file = std::fs::File::open(prompt_path)
            .map_err(|e| HeraldError::Executor(format!("opening prompt file: {e}")))?;

        let mut cmd = Command::new(&self.claude_path);
        cmd.args(self.build_args(req))
            .stdin(Stdio::from(prompt_file))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A nested Claude Code refuses to start inside another session.
            .env_remove("CLAUDECODE");

        if !req.project_path.is_empty() {
            cmd.current_dir(&req.project_path);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        for (key, value) in &req.env {
            cmd.env(key, value);
        }

        let start = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| HeraldError::Executor(format!("starting claude: {e}")))?;
        let pid = child.id().unwrap_or(0);

        info!(task_id = %req.task_id, pid, "claude code started");
        on_progress("started", &format!("PID {pid}"));

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HeraldError::Executor("child stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| HeraldError::Executor("child stderr not captured".into()))?;

        let task_id = req.task_id.clone();
        let progress = on_progress.clone();
        let parse_handle = tokio::spawn(async move {
            parse_stream(&task_id, BufReader::new(stdout), move |kind, msg| {
                progress(kind, msg);
            })
            .await
        });

        let stderr_task_id = req.task_id.clone();
        let stderr_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            let mut stderr = stderr;
            if stderr.read_to_end(&mut buf).await.is_ok() && !buf.is_empty() {
                let text = String::from_utf8_lossy(&buf);
                debug!(
                    task_id = %stderr_task_id,
                    stderr = %truncate_str(&text, 500),
                    "claude stderr"
                );
            }
        });

        let cause = tokio::select! {
            status = child.wait() => {
                ExitCause::Exited(status.map_err(|e| {
                    HeraldError::Executor(format!("waiting for claude: {e}"))
                })?)
            }
            _ = cancel.cancelled() => {
                if pid > 0 {
                    graceful_kill(pid as i32).await;
                }
                let _ = child.wait().await;
                ExitCause::Cancelled
            }
            _ = tokio::time::sleep(effective_timeout(req.timeout)) => {
                if pid > 0 {
                    graceful_kill(pid as i32).await;
                }
                let _ = child.wait().await;
                ExitCause::TimedOut
            }
        };

        // The child is gone either way, so the pipes hit EOF and both
        // drains finish with whatever was accumulated.
        let summary = parse_handle.await.unwrap_or_default();
        let _ = stderr_handle.await;

        let mut result = ExecResult {
            session_id: summary.session_id,
            output: summary.output,
            cost_usd: summary.cost_usd,
            turns: summary.turns,
            exit_code: 0,
            duration: start.elapsed(),
        };
        if summary.duration_ms > 0 {
            result.duration = Duration::from_millis(summary.duration_ms as u64);
        }

        match cause {
            ExitCause::Exited(status) => {
                if status.success() {
                    info!(
                        task_id = %req.task_id,
                        cost_usd = result.cost_usd,
                        turns = result.turns,
                        "claude code completed"
                    );
                    Ok(result)
                } else {
                    let code = status.code().unwrap_or(-1);
                    result.exit_code = code;
                    warn!(task_id = %req.task_id, exit_code = code, "claude code exited with error");
                    Err(ExecError::NonZeroExit {
                        code,
                        partial: result,
                    })
                }
            }
            ExitCause::Cancelled => Err(ExecError::Cancelled { partial: result }),
            ExitCause::TimedOut => Err(ExecError::TimedOut { partial: result }),
        }
    }
}

/// A zero timeout would fire the deadline immediately; treat it as "no
/// budget supplied" and fall back to a generous hour.
fn effective_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::from_secs(3600)
    } else {
        timeout
    }
}

fn truncate_str(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max).collect();
    format!("{truncated}...")
}
