//! Prompt staging on the filesystem.
//!
//! Prompts are routed through `<work_dir>/tasks/<task_id>/prompt.md`
//! instead of argv to avoid command-line length limits. The file is
//! owner+group readable; the staging directory is removed after the run.

use std::path::{Path, PathBuf};

use herald_types::HeraldError;

/// Write the prompt file for a task and return its path.
pub fn write_prompt_file(
    work_dir: &Path,
    task_id: &str,
    prompt: &str,
) -> Result<PathBuf, HeraldError> {
    let task_dir = work_dir.join("tasks").join(task_id);
    std::fs::create_dir_all(&task_dir)
        .map_err(|e| HeraldError::Executor(format!("creating task dir: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&task_dir, std::fs::Permissions::from_mode(0o750))
            .map_err(|e| HeraldError::Executor(format!("restricting task dir: {e}")))?;
    }

    let path = task_dir.join("prompt.md");
    std::fs::write(&path, prompt)
        .map_err(|e| HeraldError::Executor(format!("writing prompt: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640))
            .map_err(|e| HeraldError::Executor(format!("restricting prompt file: {e}")))?;
    }

    Ok(path)
}

/// Remove a task's staging directory. Missing directories are fine.
pub fn cleanup_prompt_dir(work_dir: &Path, task_id: &str) {
    let task_dir = work_dir.join("tasks").join(task_id);
    if let Err(e) = std::fs::remove_dir_all(&task_dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(task_id, error = %e, "prompt cleanup failed");
        }
    }
}
