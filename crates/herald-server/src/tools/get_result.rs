//! `get_result` -- the full result of a finished task.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use herald_task::{Status, TaskSnapshot};

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_str, Deps};

const SUMMARY_LIMIT: usize = 1000;

pub struct GetResult(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for GetResult {
    fn name(&self) -> &str {
        "get_result"
    }

    fn description(&self) -> &str {
        "Get the complete result of a finished task."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task ID returned by start_task"
                },
                "format": {
                    "type": "string",
                    "enum": ["summary", "full", "json"],
                    "description": "Output format: summary (truncated), full (complete output), json (raw snapshot)"
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
        let snap = task.snapshot();

        if matches!(snap.status, Status::Pending | Status::Queued | Status::Running) {
            return Ok(format!(
                "Task {task_id} is still {}. Use check_task to monitor progress.",
                snap.status
            ));
        }

        match arg_str(&args, "format").as_str() {
            "json" => serde_json::to_string_pretty(&snap)
                .map_err(|e| format!("JSON encoding error: {e}")),
            "full" => Ok(format_full(&snap)),
            _ => Ok(format_summary(&snap)),
        }
    }
}

fn format_summary(snap: &TaskSnapshot) -> String {
    let mut b = String::new();

    match snap.status {
        Status::Completed => b.push_str("Task completed\n\n"),
        Status::Failed => b.push_str("Task failed\n\n"),
        Status::Cancelled => b.push_str("Task cancelled\n\n"),
        Status::Linked => b.push_str("Linked session\n\n"),
        _ => {}
    }

    let _ = writeln!(b, "- ID: {}", snap.id);
    if !snap.context.is_empty() {
        let _ = writeln!(b, "- Context: {}", snap.context);
    }
    let _ = writeln!(b, "- Project: {}", snap.project);
    let _ = writeln!(b, "- Duration: {}", snap.format_duration());
    if snap.cost_usd > 0.0 {
        let _ = writeln!(b, "- Cost: ${:.2}", snap.cost_usd);
    }
    if snap.turns > 0 {
        let _ = writeln!(b, "- Turns: {}", snap.turns);
    }
    if !snap.error.is_empty() {
        let _ = writeln!(b, "- Error: {}", snap.error);
    }

    if !snap.output.is_empty() {
        let _ = writeln!(b, "\nSummary:\n{}", truncate_summary(&snap.output, SUMMARY_LIMIT));
    }

    if !snap.session_id.is_empty() {
        let _ = write!(b, "\nSession ID: {} -- use in start_task to continue.", snap.session_id);
    }

    b
}

fn format_full(snap: &TaskSnapshot) -> String {
    let mut b = String::new();

    let _ = writeln!(b, "Task {} -- {}", snap.id, snap.status);
    if !snap.context.is_empty() {
        let _ = writeln!(b, "Context: {}", snap.context);
    }
    let _ = write!(b, "Project: {} | Duration: {}", snap.project, snap.format_duration());
    if snap.cost_usd > 0.0 {
        let _ = write!(b, " | Cost: ${:.2}", snap.cost_usd);
    }
    b.push_str("\n\n");

    if !snap.error.is_empty() {
        let _ = writeln!(b, "Error: {}\n", snap.error);
    }

    if !snap.output.is_empty() {
        let _ = writeln!(b, "--- Full output ---\n{}", snap.output);
    }

    b
}

fn truncate_summary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "{}\n\n[... output truncated, use format='full' for complete output]",
        &s[..end]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, test_deps};
    use herald_task::{Task, TaskSpec};
    use std::time::Duration;

    fn finished_task(deps: &Arc<crate::tools::Deps>, output: &str) -> Arc<Task> {
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });
        task.set_session_id("ses_done");
        task.set_cost(0.42);
        task.set_turns(3);
        task.append_output(output);
        task.set_status(herald_task::Status::Running);
        task.set_status(herald_task::Status::Completed);
        task
    }

    #[tokio::test]
    async fn active_task_reports_status() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });

        let tool = GetResult(deps);
        let text = call(&tool, json!({ "task_id": task.id })).await.unwrap();
        assert!(text.contains("still pending"));
    }

    #[tokio::test]
    async fn summary_truncates_with_marker() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let long_output = "z".repeat(5000);
        let task = finished_task(&deps, &long_output);

        let tool = GetResult(deps);
        let text = call(&tool, json!({ "task_id": task.id })).await.unwrap();
        assert!(text.contains("Task completed"));
        assert!(text.contains("output truncated"));
        assert!(text.contains("Session ID: ses_done"));
        assert!(text.len() < 2000);
    }

    #[tokio::test]
    async fn full_format_emits_entire_buffer() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let long_output = "y".repeat(5000);
        let task = finished_task(&deps, &long_output);

        let tool = GetResult(deps);
        let text = call(&tool, json!({ "task_id": task.id, "format": "full" }))
            .await
            .unwrap();
        assert!(text.contains("--- Full output ---"));
        assert!(text.contains(&long_output));
    }

    #[tokio::test]
    async fn json_format_is_parseable_snapshot() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let task = finished_task(&deps, "some output");

        let tool = GetResult(deps);
        let text = call(&tool, json!({ "task_id": task.id, "format": "json" }))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["id"], task.id.as_str());
        assert_eq!(parsed["status"], "completed");
        assert_eq!(parsed["session_id"], "ses_done");
        assert_eq!(parsed["output"], "some output");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = format!("{}é", "a".repeat(999));
        let out = truncate_summary(&s, 1000);
        assert!(out.contains("output truncated"));
    }
}
