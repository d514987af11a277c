//! The tool registry exposed to the remote client.
//!
//! Tool arguments arrive as a JSON object; each handler coerces the
//! fields it knows, applies defaults, and ignores unknown keys.

mod cancel_task;
mod check_task;
mod get_diff;
mod get_logs;
mod get_result;
mod herald_push;
mod list_projects;
mod list_tasks;
mod read_file;
mod start_task;

pub use read_file::safe_path;

use std::sync::Arc;

use serde_json::Value;

use herald_store::{Store, TaskRecord};
use herald_task::{Manager, TaskSnapshot};
use herald_types::ExecutionConfig;

use crate::project::ProjectManager;
use crate::rpc::{ToolDefinition, ToolRegistry};

/// Shared dependencies injected into every tool handler.
pub struct Deps {
    pub manager: Arc<Manager>,
    pub projects: Arc<ProjectManager>,
    pub store: Arc<dyn Store>,
    pub execution: ExecutionConfig,
}

/// Build the full tool registry.
pub fn registry(deps: Arc<Deps>) -> ToolRegistry {
    ToolRegistry::new(vec![
        Arc::new(list_projects::ListProjects(deps.clone())),
        Arc::new(start_task::StartTask(deps.clone())),
        Arc::new(check_task::CheckTask(deps.clone())),
        Arc::new(get_result::GetResult(deps.clone())),
        Arc::new(list_tasks::ListTasks(deps.clone())),
        Arc::new(cancel_task::CancelTask(deps.clone())),
        Arc::new(get_diff::GetDiff(deps.clone())),
        Arc::new(read_file::ReadFile(deps.clone())),
        Arc::new(herald_push::HeraldPush(deps.clone())),
        Arc::new(get_logs::GetLogs(deps)),
    ])
}

/// Project a snapshot into the durable record shape.
pub(crate) fn record_from_snapshot(snap: &TaskSnapshot) -> TaskRecord {
    TaskRecord {
        id: snap.id.clone(),
        kind: snap.kind.as_str().to_string(),
        project: snap.project.clone(),
        prompt: snap.prompt.clone(),
        context: snap.context.clone(),
        status: snap.status.as_str().to_string(),
        priority: snap.priority.as_str().to_string(),
        session_id: snap.session_id.clone(),
        pid: snap.pid as i64,
        git_branch: snap.git_branch.clone(),
        output: snap.output.clone(),
        progress: snap.progress.clone(),
        error: snap.error.clone(),
        cost_usd: snap.cost_usd,
        turns: snap.turns,
        files_modified: snap.files_modified.clone(),
        timeout_minutes: snap.timeout_minutes as i64,
        dry_run: snap.dry_run,
        created_at: Some(snap.created_at),
        started_at: snap.started_at,
        completed_at: snap.completed_at,
    }
}

// --- Typed argument coercion -----------------------------------------------

pub(crate) fn arg_str(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn arg_i64(args: &Value, key: &str) -> i64 {
    args.get(key)
        .and_then(Value::as_f64)
        .map(|f| f as i64)
        .unwrap_or_default()
}

pub(crate) fn arg_bool(args: &Value, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or_default()
}

pub(crate) fn arg_str_vec(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
