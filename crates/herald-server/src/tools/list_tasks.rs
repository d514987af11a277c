//! `list_tasks` -- filtered task listing with status icons.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use herald_task::{Status, TaskFilter};

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_i64, arg_str, Deps};

pub struct ListTasks(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for ListTasks {
    fn name(&self) -> &str {
        "list_tasks"
    }

    fn description(&self) -> &str {
        "List tasks with optional filters."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["all", "pending", "queued", "running", "completed", "failed", "cancelled", "linked"],
                    "description": "Filter by status"
                },
                "project": {
                    "type": "string",
                    "description": "Filter by project name"
                },
                "limit": {
                    "type": "number",
                    "description": "Maximum number of tasks to return (default: 20)"
                }
            }
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<String, String> {
        let limit = match arg_i64(&args, "limit") {
            n if n > 0 => n as usize,
            _ => 20,
        };

        let tasks = self.0.manager.list(&TaskFilter {
            status: arg_str(&args, "status"),
            project: arg_str(&args, "project"),
            since: None,
            limit,
        });

        if tasks.is_empty() {
            return Ok("No tasks found matching the given filters.".into());
        }

        let mut b = String::new();
        let _ = writeln!(b, "📋 Tasks ({} found)\n", tasks.len());

        for t in &tasks {
            let _ = writeln!(b, "{} **{}** -- {}", status_icon(t.status), t.id, t.status);
            if !t.context.is_empty() {
                let _ = writeln!(b, "  Context: {}", t.context);
            }
            let _ = writeln!(b, "  Project: {} | Priority: {}", t.project, t.priority);

            match t.status {
                Status::Running => {
                    let _ = write!(b, "  Duration: {}", t.format_duration());
                    if !t.progress.is_empty() {
                        let _ = write!(b, " | Progress: {}", t.progress);
                    }
                    b.push('\n');
                }
                Status::Completed | Status::Failed => {
                    let _ = writeln!(
                        b,
                        "  Duration: {} | Cost: ${:.2}",
                        t.format_duration(),
                        t.cost_usd
                    );
                }
                Status::Linked => {
                    if !t.output.is_empty() {
                        let mut summary = t.output.clone();
                        if summary.len() > 120 {
                            let mut end = 120;
                            while !summary.is_char_boundary(end) {
                                end -= 1;
                            }
                            summary.truncate(end);
                            summary.push_str("...");
                        }
                        let _ = writeln!(b, "  {summary:?}");
                    }
                    let _ = writeln!(b, "  Session: {} -- use start_task to resume", t.session_id);
                }
                _ => {}
            }

            if !t.error.is_empty() {
                let _ = writeln!(b, "  Error: {}", t.error);
            }

            b.push('\n');
        }

        Ok(b)
    }
}

fn status_icon(status: Status) -> &'static str {
    match status {
        Status::Pending => "⏳",
        Status::Queued => "📥",
        Status::Running => "🔄",
        Status::Completed => "✅",
        Status::Failed => "❌",
        Status::Cancelled => "🚫",
        Status::Linked => "🔗",
    }
}
