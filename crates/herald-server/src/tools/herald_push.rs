//! `herald_push` -- register or update a linked external session.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use herald_task::Task;

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_i64, arg_str, arg_str_vec, Deps};

pub struct HeraldPush(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for HeraldPush {
    fn name(&self) -> &str {
        "herald_push"
    }

    fn description(&self) -> &str {
        "Push the current Claude Code session context to Herald for remote monitoring and \
         continuation. Call this when the user wants to continue working from another device."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Current Claude Code session ID"
                },
                "summary": {
                    "type": "string",
                    "description": "Summary of what has been done in this session so far"
                },
                "project": {
                    "type": "string",
                    "description": "Project name or working directory path"
                },
                "files_modified": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Files created or modified during the session"
                },
                "current_task": {
                    "type": "string",
                    "description": "What was being worked on (in progress or next step)"
                },
                "git_branch": {
                    "type": "string",
                    "description": "Current git branch"
                },
                "turns": {
                    "type": "number",
                    "description": "Number of conversation turns so far"
                }
            },
            "required": ["session_id", "summary"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<String, String> {
        let session_id = arg_str(&args, "session_id");
        if session_id.is_empty() {
            return Err("session_id is required".into());
        }
        let summary = arg_str(&args, "summary");
        if summary.is_empty() {
            return Err("summary is required".into());
        }

        let project = arg_str(&args, "project");
        let files_modified = arg_str_vec(&args, "files_modified");
        let current_task = arg_str(&args, "current_task");
        let git_branch = arg_str(&args, "git_branch");
        let turns = arg_i64(&args, "turns");

        // One linked task per session id: a second push updates the
        // existing record in place.
        let (task, updated) = match self.0.manager.find_linked_by_session(&session_id) {
            Some(existing) => {
                existing.set_output(&summary);
                (existing, true)
            }
            None => (
                self.0.manager.register(Task::new_linked(&project, &session_id, &summary)),
                false,
            ),
        };

        if !files_modified.is_empty() {
            task.set_files_modified(files_modified.clone());
        }
        if !current_task.is_empty() {
            task.set_progress(&current_task);
        }
        if !git_branch.is_empty() {
            task.set_git_branch(&git_branch);
        }
        if turns > 0 {
            task.set_turns(turns);
        }

        // Keep the durable record in step with the in-memory task.
        let record = crate::tools::record_from_snapshot(&task.snapshot());
        let persisted = if self.0.store.get_linked_task_by_session(&session_id).is_ok() {
            self.0.store.update_task(&record)
        } else {
            self.0.store.create_task(&record)
        };
        if let Err(e) = persisted {
            tracing::warn!(task_id = %task.id, error = %e, "failed to persist linked task");
        }

        let mut b = String::new();
        if updated {
            let _ = writeln!(b, "Session updated in Herald\n");
        } else {
            let _ = writeln!(b, "Session pushed to Herald\n");
        }
        let _ = writeln!(b, "- Task: {} (linked)", task.id);
        let _ = writeln!(b, "- Session ID: {session_id}");
        if !project.is_empty() {
            let _ = writeln!(b, "- Project: {project}");
        }
        if !git_branch.is_empty() {
            let _ = writeln!(b, "- Branch: {git_branch}");
        }
        if !files_modified.is_empty() {
            let _ = writeln!(b, "- Files modified: {}", files_modified.len());
        }
        let _ = write!(
            b,
            "\nThe session can now be monitored remotely with check_task or resumed with start_task."
        );

        Ok(b)
    }
}
