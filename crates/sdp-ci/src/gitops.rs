//! Git subprocess helpers for the auto-fixer, bounded by a deadline.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{CiError, Result};

/// Deadline applied to every git invocation.
pub const GIT_TIMEOUT: Duration = Duration::from_secs(60);

async fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    debug!("git {:?}", args);
    let child = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| CiError::ExternalCommand(format!("failed to run git: {e}")))?;

    let output = tokio::time::timeout(GIT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            CiError::ExternalCommand(format!(
                "git {:?} timed out after {}s",
                args,
                GIT_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| CiError::ExternalCommand(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CiError::ExternalCommand(format!(
            "git {:?} exited {}: {stderr}",
            args, output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Stage one pathspec and commit with the given message.
pub async fn stage_and_commit(repo_dir: &Path, pathspec: &str, message: &str) -> Result<()> {
    run_git(repo_dir, &["add", pathspec]).await?;
    run_git(repo_dir, &["commit", "-m", message]).await?;
    Ok(())
}

/// Push the current branch to its upstream.
pub async fn push(repo_dir: &Path) -> Result<()> {
    run_git(repo_dir, &["push"]).await?;
    Ok(())
}
