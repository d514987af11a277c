//! Thin wrappers around the `git` CLI for the diff and status tools.

use std::path::Path;

use herald_types::HeraldError;

async fn run_git(dir: &Path, args: &[&str]) -> Result<String, HeraldError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await
        .map_err(|e| HeraldError::Server(format!("running git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HeraldError::Server(format!(
            "git {} failed: {}",
            args.first().unwrap_or(&""),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Whether `dir` is inside a git work tree.
pub async fn is_repo(dir: &Path) -> bool {
    matches!(
        run_git(dir, &["rev-parse", "--is-inside-work-tree"]).await,
        Ok(out) if out.trim() == "true"
    )
}

/// The checked-out branch name (or short commit for detached HEAD).
pub async fn current_branch(dir: &Path) -> Result<String, HeraldError> {
    let branch = run_git(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await?;
    Ok(branch.trim().to_string())
}

/// `<branch> (clean)` or `<branch> (N changed)` for listings.
pub async fn status_summary(dir: &Path) -> Result<String, HeraldError> {
    let branch = current_branch(dir).await?;
    let status = run_git(dir, &["status", "--porcelain"]).await?;
    let changed = status.lines().filter(|l| !l.trim().is_empty()).count();
    if changed == 0 {
        Ok(format!("{branch} (clean)"))
    } else {
        Ok(format!("{branch} ({changed} changed)"))
    }
}

/// Uncommitted changes against HEAD.
pub async fn diff_uncommitted(dir: &Path) -> Result<String, HeraldError> {
    run_git(dir, &["diff", "HEAD"]).await
}

/// A task branch diffed against the currently checked-out branch.
pub async fn diff_branch(dir: &Path, branch: &str) -> Result<String, HeraldError> {
    let current = current_branch(dir).await?;
    run_git(dir, &["diff", &format!("{current}...{branch}")]).await
}
