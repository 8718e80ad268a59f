//! PR check polling: typed check states and the `gh` poller.
//!
//! The checks surface is the `gh pr checks` command with JSON output: an
//! array of `{name, state}`. States are normalised to upper case; unknown
//! values propagate unchanged so callers can treat them as non-green.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{CiError, Result};

/// Normalised state of one CI check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckState {
    Pending,
    Success,
    Failure,
    Error,
    InProgress,
    /// Anything the checks surface reported that we do not model.
    Other(String),
}

impl CheckState {
    /// Parse a raw state string, upper-casing first.
    pub fn parse(raw: &str) -> Self {
        match raw.to_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "SUCCESS" => Self::Success,
            "FAILURE" => Self::Failure,
            "ERROR" => Self::Error,
            "IN_PROGRESS" => Self::InProgress,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Error => "ERROR",
            Self::InProgress => "IN_PROGRESS",
            Self::Other(s) => s,
        }
    }

    pub fn is_green(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_failing(&self) -> bool {
        matches!(self, Self::Failure | Self::Error)
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One check run on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRun {
    pub name: String,
    pub state: CheckState,
}

/// Parse the checks-command JSON output.
pub fn parse_checks_json(raw: &str) -> Result<Vec<CheckRun>> {
    #[derive(Deserialize)]
    struct RawCheck {
        name: String,
        state: String,
    }

    let rows: Vec<RawCheck> =
        serde_json::from_str(raw).map_err(|e| CiError::ChecksParse(e.to_string()))?;
    Ok(rows
        .into_iter()
        .map(|r| CheckRun {
            name: r.name,
            state: CheckState::parse(&r.state),
        })
        .collect())
}

/// Source of check states for a pull request.
#[async_trait]
pub trait CheckPoller: Send + Sync {
    async fn get_checks(&self, pr_number: u64) -> Result<Vec<CheckRun>>;
}

/// Retry delays between transient poll failures.
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

/// Run `op` with bounded retries on transient failure.
///
/// One initial attempt plus one per delay; the last error wins.
pub async fn retry_transient<T, F, Fut>(delays: &[Duration], mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_err = None;
    for (attempt, delay) in std::iter::once(None)
        .chain(delays.iter().map(Some))
        .enumerate()
    {
        if let Some(delay) = delay {
            tokio::time::sleep(*delay).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!("poll attempt {} failed: {e}", attempt + 1);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt ran"))
}

/// Poller backed by the `gh` CLI.
pub struct GhChecks {
    repo_dir: PathBuf,
    retry_delays: Vec<Duration>,
}

impl GhChecks {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            retry_delays: RETRY_DELAYS.to_vec(),
        }
    }

    /// Override retry delays (used by tests).
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    async fn run_once(&self, pr_number: u64) -> Result<String> {
        let output = Command::new("gh")
            .args([
                "pr",
                "checks",
                &pr_number.to_string(),
                "--json",
                "name,state",
            ])
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CiError::ChecksCommand(format!("failed to run gh: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CiError::ChecksCommand(format!(
                "gh pr checks exited {}: {stderr}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl CheckPoller for GhChecks {
    async fn get_checks(&self, pr_number: u64) -> Result<Vec<CheckRun>> {
        let raw = retry_transient(&self.retry_delays, || self.run_once(pr_number)).await?;
        debug!(pr = pr_number, "fetched {} bytes of check state", raw.len());
        parse_checks_json(&raw)
    }
}
