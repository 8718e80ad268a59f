//! Project-state snapshot consumed by the recommendation rules.
//!
//! The shell assembles this from the workstream index, git probes, and the
//! config; the advisor itself never touches the filesystem.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a workstream as seen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkstreamStatus {
    Pending,
    Ready,
    InProgress,
    Completed,
    Failed,
}

/// One workstream row in the project state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstreamSummary {
    pub id: String,
    pub status: WorkstreamStatus,
    /// Lower runs first.
    pub priority: u32,
    /// Ids of workstreams that must complete before this one.
    pub blockers: Vec<String>,
}

/// Git facts the rules consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitState {
    pub is_repo: bool,
    pub has_uncommitted: bool,
}

/// Config facts the rules consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigState {
    pub has_sdp_config: bool,
}

/// Everything the advisor knows about a project at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProjectState {
    pub workstreams: Vec<WorkstreamSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub git: GitState,
    pub config: ConfigState,
}

impl Default for WorkstreamStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ProjectState {
    /// Whether every blocker of `ws` has completed.
    pub fn is_unblocked(&self, ws: &WorkstreamSummary) -> bool {
        ws.blockers.iter().all(|b| {
            self.workstreams
                .iter()
                .any(|w| &w.id == b && w.status == WorkstreamStatus::Completed)
        })
    }

    /// Build the comparable candidate view of a workstream.
    pub fn candidate(&self, ws: &WorkstreamSummary) -> CandidateWorkstream {
        CandidateWorkstream {
            id: ws.id.clone(),
            ready: ws.status == WorkstreamStatus::Ready,
            unblocked: self.is_unblocked(ws),
            priority: ws.priority,
        }
    }
}

/// Comparable view of a workstream for execution-order selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateWorkstream {
    pub id: String,
    pub ready: bool,
    pub unblocked: bool,
    pub priority: u32,
}

/// Total pre-order over execution candidates.
///
/// Tie-breaks in order: ready beats not-ready, unblocked beats blocked,
/// lower numeric priority wins, lexicographically smaller id wins.
/// `Ordering::Less` means "runs first".
pub fn compare_priority(a: &CandidateWorkstream, b: &CandidateWorkstream) -> Ordering {
    b.ready
        .cmp(&a.ready)
        .then(b.unblocked.cmp(&a.unblocked))
        .then(a.priority.cmp(&b.priority))
        .then(a.id.cmp(&b.id))
}
