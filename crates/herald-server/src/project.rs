//! Registry of configured projects.

use std::collections::HashMap;
use std::path::PathBuf;

use herald_types::{HeraldError, ProjectConfig};

/// One configured project, resolved from the YAML config.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    pub description: String,
    pub default: bool,
    pub allowed_tools: Vec<String>,
    /// 0 = no per-project limit.
    pub max_concurrent_tasks: usize,
}

/// Resolves project names to configured projects.
pub struct ProjectManager {
    projects: Vec<Project>,
}

impl ProjectManager {
    pub fn from_config(config: &HashMap<String, ProjectConfig>) -> Self {
        let mut projects: Vec<Project> = config
            .iter()
            .map(|(name, p)| Project {
                name: name.clone(),
                path: PathBuf::from(herald_types::expand_home(&p.path)),
                description: p.description.clone(),
                default: p.default,
                allowed_tools: p.allowed_tools.clone(),
                max_concurrent_tasks: p.max_concurrent_tasks,
            })
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Self { projects }
    }

    /// Every configured project directory must exist.
    pub fn validate(&self) -> Result<(), HeraldError> {
        for project in &self.projects {
            if !project.path.is_dir() {
                return Err(HeraldError::Config(format!(
                    "project {:?}: path {} is not a directory",
                    project.name,
                    project.path.display()
                )));
            }
        }
        Ok(())
    }

    /// Resolve an explicit name, the project marked `default`, or the
    /// sole configured project.
    pub fn resolve(&self, name: &str) -> Result<&Project, HeraldError> {
        if !name.is_empty() {
            return self
                .projects
                .iter()
                .find(|p| p.name == name)
                .ok_or_else(|| HeraldError::NotFound(format!("project {name:?}")));
        }

        if let Some(default) = self.projects.iter().find(|p| p.default) {
            return Ok(default);
        }

        if self.projects.len() == 1 {
            return Ok(&self.projects[0]);
        }

        Err(HeraldError::Config(
            "no project specified and no default project configured".into(),
        ))
    }

    /// All projects, sorted by name.
    pub fn list(&self) -> &[Project] {
        &self.projects
    }
}
