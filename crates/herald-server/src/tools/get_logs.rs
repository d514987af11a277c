//! `get_logs` -- a task's event trail, or recent activity across tasks.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_i64, arg_str, Deps};

pub struct GetLogs(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for GetLogs {
    fn name(&self) -> &str {
        "get_logs"
    }

    fn description(&self) -> &str {
        "Get logs and activity history."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Specific task ID. If omitted, shows recent activity."
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of entries to return (default: 50)"
                }
            }
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<String, String> {
        let limit = match arg_i64(&args, "limit") {
            n if n > 0 => n as usize,
            _ => 50,
        };

        let task_id = arg_str(&args, "task_id");
        if !task_id.is_empty() {
            return self.task_events(&task_id, limit);
        }
        self.recent_activity(limit)
    }
}

impl GetLogs {
    fn task_events(&self, task_id: &str, limit: usize) -> Result<String, String> {
        // The live map covers this process; the store covers tasks from
        // earlier runs.
        if self.0.manager.get(task_id).is_err() {
            self.0
                .store
                .get_task(task_id)
                .map_err(|e| format!("Task not found: {e}"))?;
        }

        let events = self
            .0
            .store
            .list_events(task_id, limit)
            .map_err(|e| format!("Cannot read events: {e}"))?;

        if events.is_empty() {
            return Ok(format!("No events recorded for task {task_id}."));
        }

        let mut b = String::new();
        let _ = writeln!(b, "Events for {task_id} ({}):\n", events.len());
        for event in &events {
            let _ = writeln!(
                b,
                "{} [{}] {}",
                event.created_at.format("%Y-%m-%d %H:%M:%S"),
                event.event_type,
                event.message
            );
        }
        Ok(b)
    }

    fn recent_activity(&self, limit: usize) -> Result<String, String> {
        // Durable records so activity survives restarts.
        let tasks = self
            .0
            .store
            .list_tasks(&herald_store::TaskFilter {
                limit,
                ..Default::default()
            })
            .map_err(|e| format!("Cannot read tasks: {e}"))?;

        if tasks.is_empty() {
            return Ok("No recent activity.".into());
        }

        let mut b = String::new();
        let _ = writeln!(b, "Recent activity ({} tasks):\n", tasks.len());
        for t in &tasks {
            let created = t
                .created_at
                .map(|c| c.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            let _ = write!(b, "{created} {} -- {} on {}", t.id, t.status, t.project);
            if !t.error.is_empty() {
                let _ = write!(b, " (error: {})", t.error);
            }
            b.push('\n');
        }
        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, test_deps};
    use chrono::Utc;
    use herald_store::TaskEventRecord;
    use herald_task::TaskSpec;
    use std::time::Duration;

    #[tokio::test]
    async fn task_events_come_from_the_store() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });

        for (event_type, message) in [
            ("task.started", "Task started on api"),
            ("task.progress", "Using tool: Edit"),
            ("task.completed", "Task completed on api"),
        ] {
            deps.store
                .add_event(&TaskEventRecord {
                    id: 0,
                    task_id: task.id.clone(),
                    event_type: event_type.into(),
                    message: message.into(),
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let tool = GetLogs(deps);
        let text = call(&tool, json!({ "task_id": task.id })).await.unwrap();
        assert!(text.contains("Events for"));
        assert!(text.contains("[task.started]"));
        assert!(text.contains("[task.completed]"));
        assert!(text.contains("Using tool: Edit"));
    }

    #[tokio::test]
    async fn unknown_task_is_an_error() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = GetLogs(deps);
        let err = call(&tool, json!({ "task_id": "herald-nope0000" }))
            .await
            .unwrap_err();
        assert!(err.contains("Task not found"));
    }

    #[tokio::test]
    async fn recent_activity_reads_durable_records() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });
        deps.store
            .create_task(&crate::tools::record_from_snapshot(&task.snapshot()))
            .unwrap();

        let tool = GetLogs(deps);
        let text = call(&tool, json!({})).await.unwrap();
        assert!(text.contains("Recent activity (1 tasks):"));
        assert!(text.contains(&task.id));
        assert!(text.contains("pending on api"));
    }

    #[tokio::test]
    async fn empty_store_has_friendly_messages() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });

        let tool = GetLogs(deps);
        let text = call(&tool, json!({ "task_id": task.id })).await.unwrap();
        assert!(text.contains("No events recorded"));
    }
}
