//! `list_projects` -- configured projects with git status.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::git;
use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::Deps;

pub struct ListProjects(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for ListProjects {
    fn name(&self) -> &str {
        "list_projects"
    }

    fn description(&self) -> &str {
        "List all configured projects with their Git status and description."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> Result<String, String> {
        let projects = self.0.projects.list();
        if projects.is_empty() {
            return Ok("No projects configured.".into());
        }

        let mut b = String::new();
        let _ = writeln!(b, "Projects ({})\n", projects.len());

        for project in projects {
            let default_marker = if project.default { " (default)" } else { "" };
            let _ = writeln!(b, "**{}**{default_marker}", project.name);
            if !project.description.is_empty() {
                let _ = writeln!(b, "  {}", project.description);
            }
            let _ = writeln!(b, "  Path: {}", project.path.display());

            if git::is_repo(&project.path).await {
                match git::status_summary(&project.path).await {
                    Ok(summary) => {
                        let _ = writeln!(b, "  Git: {summary}");
                    }
                    Err(e) => {
                        let _ = writeln!(b, "  Git: unavailable ({e})");
                    }
                }
            } else {
                b.push_str("  Git: not a repository\n");
            }

            b.push('\n');
        }

        Ok(b)
    }
}
