//! Inner auto-fixer: parse the failure log, write sanitized diagnostics,
//! commit and push.
//!
//! The diagnostics file names the PR, feature, checks, and fix types, never
//! raw CI log content, which can carry tokens and secrets. Raw log bytes stay
//! in process memory only.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::process::Command;
use tracing::{info, warn};

use crate::checks::CheckRun;
use crate::error::{CiError, Result};
use crate::fixers::{run_fixer, FixerRegistry};
use crate::gitops;
use sdp_core::validate_feature_id;

/// Cap applied to log excerpts that flow into fix descriptions.
const EXCERPT_LIMIT: usize = 60;

fn truncated(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.trim().to_string()
    } else {
        text.chars().take(limit).collect::<String>().trim().to_string()
    }
}

/// Produce a short sanitized fix description for one failing check.
///
/// The check's kind (inferred from its name) picks the pattern group; the
/// first matching pattern wins. No match is an error: an unreadable log
/// must escalate, not guess.
pub fn parse_fix_description(check_name: &str, failure_log: &str) -> Result<String> {
    let lower = check_name.to_lowercase();

    if lower.contains("go-test") || lower.contains("go test") {
        let fail = Regex::new(r"--- FAIL: (\S+)").expect("go-test pattern");
        if let Some(caps) = fail.captures(failure_log) {
            return Ok(format!("go-test: skip/fix failing test {}", &caps[1]));
        }
        let assertion = Regex::new(r"\S+_test\.go:\d+: (.+)").expect("assertion pattern");
        if let Some(caps) = assertion.captures(failure_log) {
            return Ok(format!(
                "go-test: fix assertion: {}",
                truncated(&caps[1], EXCERPT_LIMIT)
            ));
        }
    } else if lower.contains("go-build") || lower.contains("go build") {
        let undefined = Regex::new(r"undefined: (\S+)").expect("undefined pattern");
        if let Some(caps) = undefined.captures(failure_log) {
            return Ok(format!("go-build: fix undefined {}", &caps[1]));
        }
        let missing = Regex::new(r#"cannot find package "([^"]+)""#).expect("package pattern");
        if let Some(caps) = missing.captures(failure_log) {
            return Ok(format!("go-build: add missing package {}", &caps[1]));
        }
    } else if lower.contains("k8s-validate") || lower.contains("k8s validate") {
        let yaml = Regex::new(r"yaml: (.+)").expect("yaml pattern");
        if let Some(caps) = yaml.captures(failure_log) {
            return Ok(format!(
                "k8s-validate: fix YAML error: {}",
                truncated(&caps[1], EXCERPT_LIMIT)
            ));
        }
    }

    Err(CiError::UnparsableFailureLog)
}

/// The sanitized fix type of a description: everything before the first
/// colon.
pub fn fix_type_of(description: &str) -> &str {
    description.split(':').next().unwrap_or(description).trim()
}

/// What one `fix` invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixReport {
    /// Sanitized fix types, deduplicated, in first-seen order.
    pub fix_types: Vec<String>,
    pub diagnostics_path: PathBuf,
    pub commit_message: String,
}

/// Source of the raw failure log for a PR.
#[async_trait]
pub trait FailureLogSource: Send + Sync {
    async fn fetch(&self, pr_number: u64) -> Result<String>;
}

/// Fetches the latest failed-run log via the `gh` CLI.
pub struct GhFailureLog {
    repo_dir: PathBuf,
}

impl GhFailureLog {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    async fn run_gh(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("gh")
            .args(args)
            .current_dir(&self.repo_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| CiError::ExternalCommand(format!("failed to run gh: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CiError::ExternalCommand(format!(
                "gh {args:?} exited {}: {stderr}",
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl FailureLogSource for GhFailureLog {
    async fn fetch(&self, _pr_number: u64) -> Result<String> {
        let id = self
            .run_gh(&["run", "list", "--limit", "1", "--json", "databaseId", "--jq", ".[0].databaseId"])
            .await?;
        let id = id.trim().to_string();
        if id.is_empty() {
            return Err(CiError::ExternalCommand("no workflow runs found".to_string()));
        }
        self.run_gh(&["run", "view", &id, "--log-failed"]).await
    }
}

/// Interface the CI loop drives to repair auto-fixable failures.
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn fix(&self, failing: &[CheckRun]) -> Result<FixReport>;
}

/// The production fixer: diagnostics file + scoped commit + push.
pub struct AutoFixer {
    project_root: PathBuf,
    pr_number: u64,
    feature_id: String,
    log_source: Box<dyn FailureLogSource>,
    registry: Option<FixerRegistry>,
}

impl AutoFixer {
    /// Build a fixer. The feature id is validated before any path use.
    pub fn new(
        project_root: impl Into<PathBuf>,
        pr_number: u64,
        feature_id: &str,
        log_source: Box<dyn FailureLogSource>,
    ) -> Result<Self> {
        validate_feature_id(feature_id)?;
        Ok(Self {
            project_root: project_root.into(),
            pr_number,
            feature_id: feature_id.to_string(),
            log_source,
            registry: None,
        })
    }

    /// Also run matching deterministic fixers from this registry.
    pub fn with_registry(mut self, registry: FixerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Render the diagnostics Markdown. Sanitized fields only.
    fn diagnostics_body(&self, check_names: &[&str], fix_types: &[String]) -> String {
        let mut body = String::from("# CI Auto-Fix\n\n");
        body.push_str(&format!("- PR: #{}\n", self.pr_number));
        body.push_str(&format!("- Feature: {}\n", self.feature_id));
        body.push_str(&format!("- Checks: {}\n", check_names.join(", ")));
        body.push_str("\n## Applied fix types\n\n");
        for fix_type in fix_types {
            body.push_str(&format!("- {fix_type}\n"));
        }
        body
    }

    fn diagnostics_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        self.project_root
            .join(".sdp/ci-fixes")
            .join(format!("fix-pr{}-{stamp}.md", self.pr_number))
    }
}

#[async_trait]
impl Fixer for AutoFixer {
    async fn fix(&self, failing: &[CheckRun]) -> Result<FixReport> {
        let log = self.log_source.fetch(self.pr_number).await?;

        let mut fix_types: Vec<String> = Vec::new();
        for check in failing {
            let description = parse_fix_description(&check.name, &log)?;
            info!(check = %check.name, "planned fix: {description}");
            let fix_type = fix_type_of(&description).to_string();
            if !fix_types.contains(&fix_type) {
                fix_types.push(fix_type);
            }
        }

        if let Some(registry) = &self.registry {
            for fixer in registry.matching_fixers(&log) {
                run_fixer(fixer, &self.project_root).await?;
            }
        }

        let path = self.diagnostics_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| sdp_core::SdpError::io(parent, e))?;
        }
        let names: Vec<&str> = failing.iter().map(|c| c.name.as_str()).collect();
        std::fs::write(&path, self.diagnostics_body(&names, &fix_types))
            .map_err(|e| sdp_core::SdpError::io(&path, e))?;

        let commit_message = format!(
            "fix(ci): auto-fix {} [{}]",
            fix_types.join(","),
            self.feature_id
        );
        gitops::stage_and_commit(&self.project_root, ".sdp/ci-fixes/", &commit_message).await?;
        if let Err(e) = gitops::push(&self.project_root).await {
            warn!("push failed: {e}");
            return Err(e);
        }

        Ok(FixReport {
            fix_types,
            diagnostics_path: path,
            commit_message,
        })
    }
}
