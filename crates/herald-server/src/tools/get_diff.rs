//! `get_diff` -- git diff for a task's branch or a project's working tree.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::git;
use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_str, Deps};

pub struct GetDiff(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for GetDiff {
    fn name(&self) -> &str {
        "get_diff"
    }

    fn description(&self) -> &str {
        "Show Git diff of changes. Use task_id to diff a task's branch against the current \
         branch, or project to diff uncommitted changes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task_id": {
                    "type": "string",
                    "description": "Task ID -- diffs the task branch against the current branch"
                },
                "project": {
                    "type": "string",
                    "description": "Project name -- diffs uncommitted changes against HEAD"
                }
            }
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<String, String> {
        let task_id = arg_str(&args, "task_id");
        let project_name = arg_str(&args, "project");

        if task_id.is_empty() && project_name.is_empty() {
            return Err("either task_id or project is required".into());
        }

        let (project, branch) = if !task_id.is_empty() {
            let task = self
                .0
                .manager
                .get(&task_id)
                .map_err(|e| format!("Task not found: {e}"))?;
            let snap = task.snapshot();
            let project = self
                .0
                .projects
                .resolve(&snap.project)
                .map_err(|e| format!("Project error: {e}"))?;
            if snap.git_branch.is_empty() {
                return Err(format!(
                    "Task {task_id} has no git branch recorded; use project to diff uncommitted changes"
                ));
            }
            (project, Some(snap.git_branch))
        } else {
            let project = self
                .0
                .projects
                .resolve(&project_name)
                .map_err(|e| format!("Project error: {e}"))?;
            (project, None)
        };

        if !git::is_repo(&project.path).await {
            return Err(format!(
                "Project {:?} is not a git repository",
                project.name
            ));
        }

        let diff = match &branch {
            Some(branch) => git::diff_branch(&project.path, branch)
                .await
                .map_err(|e| format!("Diff failed: {e}"))?,
            None => git::diff_uncommitted(&project.path)
                .await
                .map_err(|e| format!("Diff failed: {e}"))?,
        };

        if diff.trim().is_empty() {
            return Ok("No changes.".into());
        }

        let header = match branch {
            Some(branch) => format!("Diff of branch {branch} against current branch:\n\n"),
            None => format!("Uncommitted changes in {}:\n\n", project.name),
        };
        Ok(format!("{header}```diff\n{diff}\n```"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::{call, test_deps};
    use std::time::Duration;

    async fn git_in(dir: &std::path::Path, args: &[&str]) {
        let status = tokio::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .await
            .unwrap();
        assert!(status.success(), "git {args:?} failed");
    }

    #[tokio::test]
    async fn requires_a_selector() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = GetDiff(deps);
        let err = call(&tool, json!({})).await.unwrap_err();
        assert!(err.contains("either task_id or project"));
    }

    #[tokio::test]
    async fn non_repo_project_is_a_clear_error() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let tool = GetDiff(deps);
        let err = call(&tool, json!({ "project": "api" })).await.unwrap_err();
        assert!(err.contains("not a git repository"));
    }

    #[tokio::test]
    async fn uncommitted_diff_renders_fenced() {
        let (_dirs, deps) = test_deps(Duration::from_millis(10));
        let root = deps.projects.resolve("api").unwrap().path.clone();

        git_in(&root, &["init", "-q", "-b", "main"]).await;
        git_in(&root, &["config", "user.email", "t@t.invalid"]).await;
        git_in(&root, &["config", "user.name", "T"]).await;
        std::fs::write(root.join("a.txt"), "before\n").unwrap();
        git_in(&root, &["add", "-A"]).await;
        git_in(&root, &["commit", "-q", "-m", "init"]).await;
        std::fs::write(root.join("a.txt"), "after\n").unwrap();

        let tool = GetDiff(deps);
        let text = call(&tool, json!({ "project": "api" })).await.unwrap();
        assert!(text.contains("Uncommitted changes in api"));
        assert!(text.contains("```diff"));
        assert!(text.contains("+after"));
    }
}
