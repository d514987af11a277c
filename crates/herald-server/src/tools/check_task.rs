//! `check_task` -- status and progress of a task, with long-polling.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use herald_task::{Status, Task, TaskSnapshot};

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_bool, arg_i64, arg_str, Deps};

const LONG_POLL_INTERVAL: Duration = Duration::from_millis(500);
const LONG_POLL_MAX_WAIT_SECS: i64 = 30;

pub struct CheckTask(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for CheckTask {
    fn name(&self) -> &str {
        "check_task"
    }

    fn description(&self) -> &str {
        "Check the current status and progress of a running task. Supports long-polling \
         with wait_seconds to reduce polling overhead."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task ID returned by start_task"
                },
                "wait_seconds": {
                    "type": "number",
                    "description": "Wait up to N seconds for a status change before responding. 0 for immediate."
                },
                "include_output": {
                    "type": "boolean",
                    "description": "Include the last N lines of Claude Code output"
                },
                "output_lines": {
                    "type": "number",
                    "description": "Number of output lines to include (default: 20)"
                }
            },
            "required": ["task_id"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<String, String> {
        let task_id = arg_str(&args, "task_id");
        if task_id.is_empty() {
            return Err("task_id is required".into());
        }

        let task = self
            .0
            .manager
            .get(&task_id)
            .map_err(|e| format!("Task not found: {e}"))?;

        let wait_seconds = arg_i64(&args, "wait_seconds").clamp(0, LONG_POLL_MAX_WAIT_SECS);

        let mut snap = task.snapshot();
        if wait_seconds > 0 && !snap.status.is_terminal() {
            snap = wait_for_change(&task, snap, Duration::from_secs(wait_seconds as u64)).await;
        }

        let include_output = arg_bool(&args, "include_output");
        let output_lines = match arg_i64(&args, "output_lines") {
            n if n > 0 => n as usize,
            _ => 20,
        };

        Ok(format_check_response(&snap, include_output, output_lines))
    }
}

/// Poll every 500 ms until the status changes, the done signal fires, or
/// the timeout expires. Progress-only changes do not end the wait.
async fn wait_for_change(task: &Arc<Task>, initial: TaskSnapshot, timeout: Duration) -> TaskSnapshot {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut done = task.done();
    let mut ticker = tokio::time::interval(LONG_POLL_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            _ = done.wait_for(|&done| done) => return task.snapshot(),
            _ = tokio::time::sleep_until(deadline) => return task.snapshot(),
            _ = ticker.tick() => {
                let snap = task.snapshot();
                if snap.status != initial.status {
                    return snap;
                }
            }
        }
    }
}

fn format_check_response(snap: &TaskSnapshot, include_output: bool, output_lines: usize) -> String {
    let mut b = String::new();

    if !snap.context.is_empty() {
        let _ = writeln!(b, "Context: {}\n", snap.context);
    }

    match snap.status {
        Status::Pending | Status::Queued => {
            let _ = writeln!(b, "Status: {}", snap.status);
        }
        Status::Running => {
            b.push_str("Status: running\n");
            let _ = writeln!(b, "Duration: {}", snap.format_duration());
            if !snap.progress.is_empty() {
                let _ = writeln!(b, "Progress: {}", snap.progress);
            }
            if snap.cost_usd > 0.0 {
                let _ = writeln!(b, "Cost so far: ~${:.2}", snap.cost_usd);
            }
        }
        Status::Completed => {
            b.push_str("Status: completed\n");
            let _ = writeln!(b, "Duration: {}", snap.format_duration());
            if snap.cost_usd > 0.0 {
                let _ = writeln!(b, "Cost: ${:.2}", snap.cost_usd);
            }
            if snap.turns > 0 {
                let _ = writeln!(b, "Turns: {}", snap.turns);
            }
            if !snap.session_id.is_empty() {
                let _ = writeln!(
                    b,
                    "Session ID: {} (use to continue this conversation)",
                    snap.session_id
                );
            }
            b.push_str("\nUse get_result for full output, get_diff for changes.");
        }
        Status::Failed => {
            b.push_str("Status: failed\n");
            let _ = writeln!(b, "Duration: {}", snap.format_duration());
            if !snap.error.is_empty() {
                let _ = writeln!(b, "Error: {}", snap.error);
            }
        }
        Status::Cancelled => {
            b.push_str("Status: cancelled\n");
            let _ = writeln!(b, "Duration: {}", snap.format_duration());
        }
        Status::Linked => {
            b.push_str("Status: linked (external Claude Code session)\n");
            let _ = writeln!(b, "Session ID: {}", snap.session_id);
            if !snap.project.is_empty() {
                let _ = writeln!(b, "Project: {}", snap.project);
            }
            if !snap.git_branch.is_empty() {
                let _ = writeln!(b, "Branch: {}", snap.git_branch);
            }
            if !snap.output.is_empty() {
                let _ = writeln!(b, "\nSummary:\n{}", snap.output);
            }
            if !snap.progress.is_empty() {
                let _ = writeln!(b, "\nCurrent task: {}", snap.progress);
            }
            if !snap.files_modified.is_empty() {
                let _ = writeln!(b, "\nFiles modified ({}):", snap.files_modified.len());
                for file in &snap.files_modified {
                    let _ = writeln!(b, "  - {file}");
                }
            }
            if snap.turns > 0 {
                let _ = writeln!(b, "Turns: {}", snap.turns);
            }
            let _ = write!(
                b,
                "\nUse start_task with session_id \"{}\" to resume this session.",
                snap.session_id
            );
        }
    }

    if include_output && !snap.output.is_empty() {
        let _ = write!(b, "\n--- Last output ---\n{}", last_n_lines(&snap.output, output_lines));
    }

    b
}

fn last_n_lines(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    if lines.len() <= n {
        return s.to_string();
    }
    lines[lines.len() - n..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, test_deps};
    use herald_task::TaskSpec;
    use std::time::Instant;

    #[tokio::test]
    async fn reports_pending_status() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });

        let tool = CheckTask(deps);
        let text = call(&tool, json!({ "task_id": task.id })).await.unwrap();
        assert_eq!(text.trim(), "Status: pending");
    }

    #[tokio::test]
    async fn missing_task_is_an_error() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = CheckTask(deps);
        let err = call(&tool, json!({ "task_id": "herald-nope0000" }))
            .await
            .unwrap_err();
        assert!(err.contains("Task not found"));
    }

    #[tokio::test]
    async fn long_poll_returns_early_on_completion() {
        let (_dirs, deps) = test_deps(Duration::from_millis(200));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });
        deps.manager.start(&task, Default::default()).unwrap();

        let tool = CheckTask(deps);
        let started = Instant::now();
        let text = call(&tool, json!({ "task_id": task.id, "wait_seconds": 25 }))
            .await
            .unwrap();

        assert!(
            started.elapsed() < Duration::from_secs(10),
            "long-poll should return on the done signal, not the full wait"
        );
        assert!(text.contains("Status: completed"), "got: {text}");
        assert!(text.contains("Session ID: ses_stub"));
        assert!(text.contains("Cost: $0.10"));
    }

    #[tokio::test]
    async fn include_output_appends_tail() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });
        task.append_output("line1\nline2\nline3\nline4");

        let tool = CheckTask(deps);
        let text = call(
            &tool,
            json!({ "task_id": task.id, "include_output": true, "output_lines": 2 }),
        )
        .await
        .unwrap();

        assert!(text.contains("--- Last output ---"));
        assert!(text.contains("line3\nline4"));
        assert!(!text.contains("line1"));
    }

    #[tokio::test]
    async fn linked_task_formatting() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let linked = herald_task::Task::new_linked("api", "ses_ext", "built the parser");
        linked.set_files_modified(vec!["src/parser.rs".into()]);
        linked.set_progress("writing tests");
        let task = deps.manager.register(linked);

        let tool = CheckTask(deps);
        let text = call(&tool, json!({ "task_id": task.id })).await.unwrap();
        assert!(text.contains("Status: linked"));
        assert!(text.contains("Session ID: ses_ext"));
        assert!(text.contains("built the parser"));
        assert!(text.contains("Current task: writing tests"));
        assert!(text.contains("Files modified (1):"));
        assert!(text.contains("src/parser.rs"));
    }

    #[test]
    fn last_n_lines_keeps_tail() {
        assert_eq!(last_n_lines("a\nb\nc", 2), "b\nc");
        assert_eq!(last_n_lines("a\nb", 5), "a\nb");
    }
}
