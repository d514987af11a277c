//! `cancel_task` -- stop a running or pending task.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_bool, arg_str, Deps};

pub struct CancelTask(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for CancelTask {
    fn name(&self) -> &str {
        "cancel_task"
    }

    fn description(&self) -> &str {
        "Cancel a running or pending task."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "The task ID to cancel"
                },
                "revert": {
                    "type": "boolean",
                    "description": "If true, include the git command to revert the task's changes"
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

        self.0
            .manager
            .cancel(&task_id)
            .map_err(|e| format!("Cannot cancel task: {e}"))?;

        let mut out = format!("Task {task_id} cancelled.");

        // Herald never edits project files itself, so a revert is shown
        // as the command to run rather than performed.
        if arg_bool(&args, "revert") {
            let task = self.0.manager.get(&task_id).map_err(|e| e.to_string())?;
            let snap = task.snapshot();
            if snap.git_branch.is_empty() {
                out.push_str("\nNo git branch is recorded for this task; use get_diff to inspect uncommitted changes.");
            } else {
                let _ = write!(
                    out,
                    "\nTo revert its branch: git branch -D {}",
                    snap.git_branch
                );
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, test_deps};
    use herald_task::TaskSpec;
    use std::time::Duration;

    #[tokio::test]
    async fn cancels_a_running_task() {
        let (_dirs, deps) = test_deps(Duration::from_secs(60));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });
        deps.manager.start(&task, Default::default()).unwrap();

        let tool = CancelTask(deps.clone());
        let text = call(&tool, json!({ "task_id": task.id })).await.unwrap();
        assert!(text.contains("cancelled"));
        assert_eq!(task.status(), herald_task::Status::Cancelled);
    }

    #[tokio::test]
    async fn missing_and_terminal_tasks_error() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = CancelTask(deps.clone());

        let err = call(&tool, json!({ "task_id": "herald-nope0000" }))
            .await
            .unwrap_err();
        assert!(err.contains("not found"));

        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });
        task.set_status(herald_task::Status::Completed);

        let err = call(&tool, json!({ "task_id": task.id })).await.unwrap_err();
        assert!(err.contains("already"));
    }

    #[tokio::test]
    async fn revert_flag_names_the_branch() {
        let (_dirs, deps) = test_deps(Duration::from_secs(60));
        let task = deps.manager.create(TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            git_branch: "herald/fix-auth".into(),
            ..Default::default()
        });
        deps.manager.start(&task, Default::default()).unwrap();

        let tool = CancelTask(deps);
        let text = call(&tool, json!({ "task_id": task.id, "revert": true }))
            .await
            .unwrap();
        assert!(text.contains("git branch -D herald/fix-auth"));
    }
}
