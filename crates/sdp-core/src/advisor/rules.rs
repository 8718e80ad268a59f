//! Ordered rule pipeline producing the next-step recommendation.
//!
//! Rules are evaluated in a fixed order; the first one that produces a
//! recommendation wins. The pipeline always returns something: a
//! low-confidence status fallback closes the chain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::advisor::state::{compare_priority, ProjectState, WorkstreamStatus};
use crate::error::{Result, SdpError};

/// Recommendation schema version.
pub const RECOMMENDATION_VERSION: u32 = 1;

/// Broad intent of a recommended command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Setup,
    Execution,
    Recovery,
    Planning,
    Information,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Execution => "execution",
            Self::Recovery => "recovery",
            Self::Planning => "planning",
            Self::Information => "information",
        }
    }
}

/// A runner-up command with its own reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alternative {
    pub command: String,
    pub reason: String,
}

/// A ranked next-step recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub version: u32,
    pub command: String,
    pub reason: String,
    /// Confidence in the primary command, 0.0–1.0.
    pub confidence: f64,
    pub category: Category,
    pub alternatives: Vec<Alternative>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Recommendation {
    fn new(
        command: impl Into<String>,
        reason: impl Into<String>,
        confidence: f64,
        category: Category,
    ) -> Self {
        Self {
            version: RECOMMENDATION_VERSION,
            command: command.into(),
            reason: reason.into(),
            confidence,
            category,
            alternatives: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn alt(mut self, command: impl Into<String>, reason: impl Into<String>) -> Self {
        self.alternatives.push(Alternative {
            command: command.into(),
            reason: reason.into(),
        });
        self
    }

    fn meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Check structural validity: non-empty command and category, confidence
    /// inside `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(SdpError::InvalidInput("empty command".to_string()));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(SdpError::InvalidInput(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Produce the next-step recommendation for a project state.
///
/// Never fails; every returned value passes [`Recommendation::validate`].
pub fn recommend(state: &ProjectState) -> Recommendation {
    let rules: [fn(&ProjectState) -> Option<Recommendation>; 8] = [
        rule_not_a_repo,
        rule_failed_workstream,
        rule_uncommitted_changes,
        rule_in_progress,
        rule_ready_unblocked,
        rule_ready_blocked,
        rule_all_completed,
        rule_empty_project,
    ];

    for rule in rules {
        if let Some(rec) = rule(state) {
            return rec;
        }
    }
    fallback(state)
}

fn rule_not_a_repo(state: &ProjectState) -> Option<Recommendation> {
    if state.git.is_repo {
        return None;
    }
    Some(
        Recommendation::new(
            "git init",
            "this directory is not a git repository; SDP needs one for provenance",
            0.9,
            Category::Setup,
        )
        .alt("sdp init", "scaffold SDP config after the repository exists")
        .meta("rule", "not-a-repo"),
    )
}

fn rule_failed_workstream(state: &ProjectState) -> Option<Recommendation> {
    let failed = state
        .workstreams
        .iter()
        .find(|w| w.status == WorkstreamStatus::Failed)?;
    Some(
        Recommendation::new(
            format!("sdp debug {}", failed.id),
            format!("workstream {} failed and blocks forward progress", failed.id),
            0.9,
            Category::Recovery,
        )
        .alt(
            format!("sdp run {} --retry", failed.id),
            "retry if the failure looked transient",
        )
        .alt("sdp status", "inspect the full workstream board first")
        .meta("rule", "failed-workstream")
        .meta("workstream", failed.id.clone()),
    )
}

fn rule_uncommitted_changes(state: &ProjectState) -> Option<Recommendation> {
    if !state.git.has_uncommitted {
        return None;
    }
    Some(
        Recommendation::new(
            "git status",
            "uncommitted changes present; decide their fate before running workstreams",
            0.8,
            Category::Information,
        )
        .alt("git diff", "review the pending changes")
        .alt("git commit -am 'wip'", "commit them if they belong to current work")
        .meta("rule", "uncommitted-changes"),
    )
}

fn rule_in_progress(state: &ProjectState) -> Option<Recommendation> {
    let running = state
        .workstreams
        .iter()
        .find(|w| w.status == WorkstreamStatus::InProgress)?;
    Some(
        Recommendation::new(
            "sdp status",
            format!("workstream {} is in progress", running.id),
            0.8,
            Category::Information,
        )
        .alt(
            format!("sdp run {} --resume", running.id),
            "resume from its last checkpoint",
        )
        .meta("rule", "in-progress")
        .meta("workstream", running.id.clone()),
    )
}

fn rule_ready_unblocked(state: &ProjectState) -> Option<Recommendation> {
    let mut candidates: Vec<_> = state
        .workstreams
        .iter()
        .filter(|w| w.status == WorkstreamStatus::Ready && state.is_unblocked(w))
        .map(|w| state.candidate(w))
        .collect();
    candidates.sort_by(compare_priority);
    let best = candidates.first()?;
    Some(
        Recommendation::new(
            format!("sdp run {}", best.id),
            format!("workstream {} is ready with no blockers", best.id),
            0.85,
            Category::Execution,
        )
        .alt("sdp status", "see the whole ready set")
        .meta("rule", "ready-unblocked")
        .meta("candidates", candidates.len().to_string()),
    )
}

fn rule_ready_blocked(state: &ProjectState) -> Option<Recommendation> {
    let blocked = state
        .workstreams
        .iter()
        .find(|w| w.status == WorkstreamStatus::Ready && !state.is_unblocked(w))?;
    let blocker = blocked.blockers.iter().find(|b| {
        let b = b.as_str();
        !state
            .workstreams
            .iter()
            .any(|w| w.id == b && w.status == WorkstreamStatus::Completed)
    })?;
    Some(
        Recommendation::new(
            format!("sdp run {blocker}"),
            format!("{} waits on {blocker}; run the blocker first", blocked.id),
            0.75,
            Category::Execution,
        )
        .alt("sdp status", "review the dependency chain")
        .meta("rule", "ready-blocked")
        .meta("blocked", blocked.id.clone()),
    )
}

fn rule_all_completed(state: &ProjectState) -> Option<Recommendation> {
    if state.workstreams.is_empty()
        || !state
            .workstreams
            .iter()
            .all(|w| w.status == WorkstreamStatus::Completed)
    {
        return None;
    }
    let feature = state.feature_id.as_deref()?;
    Some(
        Recommendation::new(
            format!("sdp review {feature}"),
            "every workstream completed; the feature is ready for review",
            0.85,
            Category::Planning,
        )
        .alt("sdp deploy", "ship it once review passes")
        .alt("sdp status", "double-check the board")
        .meta("rule", "all-completed")
        .meta("feature", feature.to_string()),
    )
}

fn rule_empty_project(state: &ProjectState) -> Option<Recommendation> {
    if !state.workstreams.is_empty() {
        return None;
    }
    let rec = if state.config.has_sdp_config {
        Recommendation::new(
            "sdp doctor",
            "config exists but no workstreams are planned; check project health",
            0.9,
            Category::Setup,
        )
        .alt("sdp plan", "plan the first feature")
        .alt("sdp status", "show current project state")
    } else {
        Recommendation::new(
            "sdp init",
            "no SDP config found; initialise the project",
            0.9,
            Category::Setup,
        )
        .alt("sdp doctor", "diagnose the current directory")
        .alt("sdp status", "show current project state")
    };
    Some(rec.meta("rule", "empty-project"))
}

fn fallback(state: &ProjectState) -> Recommendation {
    Recommendation::new(
        "sdp status",
        "no rule matched the current state; inspect it",
        0.3,
        Category::Information,
    )
    .alt("sdp doctor", "verify project health")
    .meta("rule", "fallback")
    .meta("workstreams", state.workstreams.len().to_string())
}
