//! `read_file` -- path-safe file reads from a configured project.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use herald_types::HeraldError;

use crate::rpc::{ToolContext, ToolDefinition};
use crate::tools::{arg_i64, arg_str, Deps};

const MAX_FILE_SIZE: u64 = 1024 * 1024;

pub struct ReadFile(pub Arc<Deps>);

#[async_trait]
impl ToolDefinition for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a file from a configured project (path-safe)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "project": {
                    "type": "string",
                    "description": "Project name. If omitted, uses the default project."
                },
                "path": {
                    "type": "string",
                    "description": "Relative path within the project"
                },
                "line_start": {
                    "type": "number",
                    "description": "Start reading from this line number (1-based)"
                },
                "line_end": {
                    "type": "number",
                    "description": "Stop reading at this line number (inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> Result<String, String> {
        let file_path = arg_str(&args, "path");
        if file_path.is_empty() {
            return Err("path is required".into());
        }

        let project = self
            .0
            .projects
            .resolve(&arg_str(&args, "project"))
            .map_err(|e| format!("Project error: {e}"))?;

        let resolved = safe_path(&project.path, &file_path)
            .map_err(|e| format!("Access denied: {e}"))?;

        let meta = match std::fs::metadata(&resolved) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(format!("File not found: {file_path}"));
            }
            Err(e) => return Err(format!("Cannot access file: {e}")),
        };

        if meta.is_dir() {
            return Err(format!("{file_path} is a directory, not a file"));
        }
        if meta.len() > MAX_FILE_SIZE {
            return Err(format!(
                "File too large ({} bytes, max {MAX_FILE_SIZE})",
                meta.len()
            ));
        }

        let content = std::fs::read_to_string(&resolved)
            .map_err(|e| format!("Failed to read file: {e}"))?;

        let line_start = arg_i64(&args, "line_start");
        let line_end = arg_i64(&args, "line_end");
        let content = slice_lines(&content, line_start, line_end);

        let mut b = String::new();
        let _ = writeln!(b, "📄 {file_path} ({} bytes)\n", content.len());
        b.push_str("```\n");
        b.push_str(&content);
        if !content.ends_with('\n') {
            b.push('\n');
        }
        b.push_str("```\n");
        Ok(b)
    }
}

/// 1-based inclusive line range; non-positive bounds mean "unbounded".
fn slice_lines(content: &str, line_start: i64, line_end: i64) -> String {
    if line_start <= 0 && line_end <= 0 {
        return content.to_string();
    }
    let start = if line_start > 0 { line_start as usize - 1 } else { 0 };
    let lines: Vec<&str> = content.lines().collect();
    let end = if line_end > 0 {
        (line_end as usize).min(lines.len())
    } else {
        lines.len()
    };
    if start >= end {
        return String::new();
    }
    lines[start..end].join("\n")
}

/// Validate that `requested` stays within `project_root`.
///
/// Rejects absolute paths, `..` traversal that escapes the root, and
/// symlinks whose real target lies outside the root. The check runs both
/// before and after symlink resolution; a non-existent leaf is allowed
/// through so the caller can report not-found.
pub fn safe_path(project_root: &Path, requested: &str) -> Result<PathBuf, HeraldError> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(HeraldError::Server(format!(
            "absolute paths are not allowed: {requested}"
        )));
    }

    let abs_root = project_root
        .canonicalize()
        .map_err(|e| HeraldError::Server(format!("resolving project root: {e}")))?;

    // Lexical resolution of `.` and `..` against the root, before any
    // symlink evaluation.
    let mut lexical = abs_root.clone();
    for component in requested_path.components() {
        use std::path::Component;
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !lexical.pop() {
                    return Err(HeraldError::Server(format!(
                        "path traversal detected: {requested} resolves outside project root"
                    )));
                }
            }
            Component::Normal(part) => lexical.push(part),
            Component::RootDir | Component::Prefix(_) => {
                return Err(HeraldError::Server(format!(
                    "absolute paths are not allowed: {requested}"
                )));
            }
        }
    }

    if !lexical.starts_with(&abs_root) {
        return Err(HeraldError::Server(format!(
            "path traversal detected: {requested} resolves outside project root"
        )));
    }

    // Symlink evaluation on the final path.
    match lexical.canonicalize() {
        Ok(real) => {
            if !real.starts_with(&abs_root) {
                return Err(HeraldError::Server(format!(
                    "symlink escape detected: {requested} resolves outside project root"
                )));
            }
            Ok(real)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            // Existence is reported later; the lexical check already
            // passed.
            Ok(lexical)
        }
        Err(e) => Err(HeraldError::Server(format!("resolving symlinks: {e}"))),
    }
}
