//! `start_task` -- create and start a Claude Code task.

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use herald_task::{Priority, StartOptions, TaskSpec};

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_bool, arg_i64, arg_str, Deps};

pub struct StartTask(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for StartTask {
    fn name(&self) -> &str {
        "start_task"
    }

    fn description(&self) -> &str {
        "Start a Claude Code task on a project. Returns immediately with a task ID. \
         The task runs asynchronously -- use check_task to monitor progress."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "The task instructions for Claude Code"
                },
                "project": {
                    "type": "string",
                    "description": "Project name from configuration. If omitted, uses the default project."
                },
                "priority": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "urgent"],
                    "description": "Task priority for listings"
                },
                "session_id": {
                    "type": "string",
                    "description": "Claude Code session ID to resume (multi-turn conversations)"
                },
                "timeout_minutes": {
                    "type": "number",
                    "description": "Maximum execution time in minutes (default: 30)"
                },
                "git_branch": {
                    "type": "string",
                    "description": "Git branch label recorded on the task"
                },
                "model": {
                    "type": "string",
                    "description": "Model override passed to Claude Code"
                },
                "dry_run": {
                    "type": "boolean",
                    "description": "If true, Claude Code plans but doesn't execute changes"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> Result<String, String> {
        let deps = &self.0;

        let prompt = arg_str(&args, "prompt");
        if prompt.is_empty() {
            return Err("prompt is required".into());
        }

        let max_prompt = deps.execution.max_prompt_size;
        if max_prompt > 0 && prompt.len() > max_prompt {
            return Err(format!(
                "prompt too large: {} bytes (max {max_prompt})",
                prompt.len()
            ));
        }

        let project = deps
            .projects
            .resolve(&arg_str(&args, "project"))
            .map_err(|e| format!("Project error: {e}"))?;

        let priority = Priority::parse(&arg_str(&args, "priority"));

        let default_minutes = deps.execution.default_timeout_minutes.max(1);
        let max_minutes = deps.execution.max_timeout_minutes.max(1);
        let requested = arg_i64(&args, "timeout_minutes");
        let mut timeout_minutes = if requested > 0 {
            requested as u64
        } else {
            default_minutes
        };
        if timeout_minutes > max_minutes {
            warn!(requested = timeout_minutes, max = max_minutes, "timeout clamped to max");
            timeout_minutes = max_minutes;
        }

        let session_id = arg_str(&args, "session_id");
        let dry_run = arg_bool(&args, "dry_run");

        let task = deps.manager.create(TaskSpec {
            project: project.name.clone(),
            prompt: prompt.clone(),
            context: String::new(),
            priority,
            timeout_minutes,
            git_branch: arg_str(&args, "git_branch"),
            dry_run,
            allowed_tools: project.allowed_tools.clone(),
            mcp_session_id: ctx.mcp_session_id.clone(),
        });

        // Durable record alongside the in-memory task.
        if let Err(e) = deps
            .store
            .create_task(&crate::tools::record_from_snapshot(&task.snapshot()))
        {
            warn!(task_id = %task.id, error = %e, "failed to persist task record");
        }

        let opts = StartOptions {
            project_path: project.path.to_string_lossy().into_owned(),
            resume_session_id: session_id.clone(),
            model: arg_str(&args, "model"),
            env: deps.execution.env.clone(),
            max_per_project: project.max_concurrent_tasks,
        };

        deps.manager
            .start(&task, opts)
            .map_err(|e| format!("Cannot start task: {e}"))?;

        let mut out = String::from("Task started\n\n");
        let _ = writeln!(out, "- ID: {}", task.id);
        let _ = writeln!(out, "- Project: {}", project.name);
        let _ = writeln!(out, "- Priority: {priority}");
        if dry_run {
            out.push_str("- Mode: dry run (plan only)\n");
        }
        if !session_id.is_empty() {
            let _ = writeln!(out, "- Resuming session: {session_id}");
        }

        match deps.store.average_task_duration(&project.name) {
            Err(e) => warn!(project = %project.name, error = %e, "failed to get average task duration"),
            Ok((avg, count)) if count == 0 || avg.is_zero() => {
                out.push_str("- Estimated duration: unknown (no task history for this project)\n");
            }
            Ok((avg, count)) => {
                let _ = writeln!(
                    out,
                    "- Estimated duration: ~{} (based on {count} previous tasks)",
                    format_estimate(avg)
                );
                let first_check = (avg / 3).max(Duration::from_secs(15));
                let _ = writeln!(out, "- Suggested first check: in ~{}", format_estimate(first_check));
            }
        }

        let _ = write!(out, "\nUse check_task with ID '{}' to monitor progress.", task.id);
        Ok(out)
    }
}

/// `45s` below a minute, `3m` above.
fn format_estimate(d: Duration) -> String {
    if d < Duration::from_secs(60) {
        format!("{}s", d.as_secs())
    } else {
        format!("{}m", d.as_secs() / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, test_deps};

    #[tokio::test]
    async fn starts_a_task_and_reports_id() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = StartTask(deps.clone());

        let text = call(&tool, json!({ "prompt": "fix the login bug" }))
            .await
            .unwrap();
        assert!(text.contains("Task started"));
        assert!(text.contains("- ID: herald-"));
        assert!(text.contains("- Project: api"));
        assert!(text.contains("no task history"));

        let tasks = deps.manager.list(&Default::default());
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn requires_prompt() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = StartTask(deps);

        let err = call(&tool, json!({})).await.unwrap_err();
        assert_eq!(err, "prompt is required");
    }

    #[tokio::test]
    async fn rejects_oversize_prompt() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = StartTask(deps);

        let big = "x".repeat(200 * 1024);
        let err = call(&tool, json!({ "prompt": big })).await.unwrap_err();
        assert!(err.contains("prompt too large"));
    }

    #[tokio::test]
    async fn unknown_project_is_an_error() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = StartTask(deps);

        let err = call(&tool, json!({ "prompt": "p", "project": "ghost" }))
            .await
            .unwrap_err();
        assert!(err.contains("Project error"));
    }

    #[tokio::test]
    async fn clamps_timeout_and_defaults_non_positive() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = StartTask(deps.clone());

        call(&tool, json!({ "prompt": "p", "timeout_minutes": 9999 }))
            .await
            .unwrap();
        let snap = &deps.manager.list(&Default::default())[0];
        assert_eq!(snap.timeout_minutes, deps.execution.max_timeout_minutes);

        call(&tool, json!({ "prompt": "p", "timeout_minutes": -5 }))
            .await
            .unwrap();
        let snap = &deps.manager.list(&Default::default())[0];
        assert_eq!(snap.timeout_minutes, deps.execution.default_timeout_minutes);
    }

    #[tokio::test]
    async fn concurrency_rejection_is_verbatim() {
        let (_dirs, deps) = test_deps(Duration::from_secs(60));
        let tool = StartTask(deps);

        for _ in 0..3 {
            call(&tool, json!({ "prompt": "long run" })).await.unwrap();
        }
        let err = call(&tool, json!({ "prompt": "one too many" }))
            .await
            .unwrap_err();
        assert!(err.contains("global concurrency limit reached (3/3)"));
    }

    #[test]
    fn estimate_formatting() {
        assert_eq!(format_estimate(Duration::from_secs(45)), "45s");
        assert_eq!(format_estimate(Duration::from_secs(180)), "3m");
    }
}
