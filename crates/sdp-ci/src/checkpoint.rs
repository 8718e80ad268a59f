//! Loop state persistence: per-feature checkpoints and append-only run
//! files.
//!
//! Both use the same temp-fsync-rename pattern as the dispatcher
//! checkpoints. Feature ids are validated before any path is built, and
//! JSON read from disk goes through a byte-limited reader.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use sdp_core::dispatch::{read_json_limited, write_json_atomic, MAX_STATE_FILE_BYTES};
use sdp_core::{validate_feature_id, SdpError};

/// Feature checkpoint schema version.
pub const CHECKPOINT_SCHEMA: u32 = 1;

/// Byte cap applied to each run-event field.
pub const RUN_EVENT_FIELD_LIMIT: usize = 1024;

/// Where the loop left off for one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureCheckpoint {
    pub schema: u32,
    pub feature_id: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub pr_url: String,
    pub phase: String,
    pub updated_at: DateTime<Utc>,
}

/// One entry in a run file's event trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEvent {
    pub at: DateTime<Utc>,
    pub phase: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Append-only record of one oneshot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFile {
    pub run_id: String,
    pub feature_id: String,
    pub orchestrator: String,
    pub branch: String,
    pub started_at: DateTime<Utc>,
    pub events: Vec<RunEvent>,
    pub last_phase: String,
    pub last_state: String,
}

/// Truncate to at most `limit` bytes on a char boundary.
fn truncate_bytes(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Persistence for loop checkpoints and run files under `.sdp/`.
pub struct LoopStateStore {
    sdp_dir: PathBuf,
}

impl LoopStateStore {
    /// Store rooted at a project directory (the one containing `.sdp/`).
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            sdp_dir: project_root.into().join(".sdp"),
        }
    }

    fn checkpoints_dir(&self) -> PathBuf {
        self.sdp_dir.join("checkpoints")
    }

    fn runs_dir(&self) -> PathBuf {
        self.sdp_dir.join("runs")
    }

    fn checkpoint_path(&self, feature_id: &str) -> Result<PathBuf> {
        validate_feature_id(feature_id)?;
        Ok(self.checkpoints_dir().join(format!("{feature_id}.json")))
    }

    /// Atomically persist a feature checkpoint.
    pub fn save_checkpoint(&self, checkpoint: &FeatureCheckpoint) -> Result<()> {
        let path = self.checkpoint_path(&checkpoint.feature_id)?;
        write_json_atomic(&path, checkpoint)?;
        Ok(())
    }

    /// Load a feature checkpoint; `None` when absent. Unreadable files are
    /// quarantined as `.corrupt`.
    pub fn load_checkpoint(&self, feature_id: &str) -> Result<Option<FeatureCheckpoint>> {
        let path = self.checkpoint_path(feature_id)?;
        if !path.exists() {
            return Ok(None);
        }
        match read_json_limited(&path, MAX_STATE_FILE_BYTES) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                let corrupt = path.with_extension("json.corrupt");
                warn!(
                    "quarantining unreadable checkpoint {} -> {}",
                    path.display(),
                    corrupt.display()
                );
                let _ = std::fs::rename(&path, &corrupt);
                Err(e.into())
            }
        }
    }

    /// Remove a feature checkpoint; missing is fine.
    pub fn delete_checkpoint(&self, feature_id: &str) -> Result<()> {
        let path = self.checkpoint_path(feature_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SdpError::io(&path, e).into()),
        }
    }

    /// Run-file paths for a feature with their sequence suffixes.
    fn run_files(&self, feature_id: &str) -> Result<Vec<(PathBuf, String)>> {
        validate_feature_id(feature_id)?;
        let prefix = format!("oneshot-{feature_id}-");
        let entries = match std::fs::read_dir(self.runs_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SdpError::io(self.runs_dir(), e).into()),
        };

        let mut found = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Some(seq) = stem.strip_prefix(&prefix) {
                    found.push((entry.path(), seq.to_string()));
                }
            }
        }
        Ok(found)
    }

    /// Latest run file for a feature.
    ///
    /// Picked by numeric suffix when both compare numerically, otherwise
    /// lexicographically.
    pub fn latest_run_path(&self, feature_id: &str) -> Result<Option<PathBuf>> {
        let mut files = self.run_files(feature_id)?;
        files.sort_by(|(_, a), (_, b)| match (a.parse::<u64>(), b.parse::<u64>()) {
            (Ok(na), Ok(nb)) => na.cmp(&nb),
            _ => a.cmp(b),
        });
        Ok(files.pop().map(|(path, _)| path))
    }

    /// Start a new run file with the next free sequence number.
    pub fn start_run(
        &self,
        feature_id: &str,
        orchestrator: &str,
        branch: &str,
    ) -> Result<RunFile> {
        let next_seq = self
            .run_files(feature_id)?
            .iter()
            .filter_map(|(_, seq)| seq.parse::<u64>().ok())
            .max()
            .map_or(1, |n| n + 1);

        let run = RunFile {
            run_id: format!("oneshot-{feature_id}-{next_seq}"),
            feature_id: feature_id.to_string(),
            orchestrator: orchestrator.to_string(),
            branch: branch.to_string(),
            started_at: Utc::now(),
            events: Vec::new(),
            last_phase: String::new(),
            last_state: String::new(),
        };
        let path = self
            .runs_dir()
            .join(format!("oneshot-{feature_id}-{next_seq}.json"));
        write_json_atomic(&path, &run)?;
        Ok(run)
    }

    /// Append an event to the latest run file for a feature.
    ///
    /// Phase, state, and notes are each truncated to 1024 bytes. Fails when
    /// no run file exists.
    pub fn append_run_event(
        &self,
        feature_id: &str,
        phase: &str,
        state: &str,
        notes: Option<&str>,
    ) -> Result<RunFile> {
        let Some(path) = self.latest_run_path(feature_id)? else {
            return Err(SdpError::InvalidInput(format!(
                "no run file exists for {feature_id}"
            ))
            .into());
        };
        let mut run: RunFile = read_json_limited(&path, MAX_STATE_FILE_BYTES)?;

        let phase = truncate_bytes(phase, RUN_EVENT_FIELD_LIMIT);
        let state = truncate_bytes(state, RUN_EVENT_FIELD_LIMIT);
        run.events.push(RunEvent {
            at: Utc::now(),
            phase: phase.clone(),
            state: state.clone(),
            notes: notes.map(|n| truncate_bytes(n, RUN_EVENT_FIELD_LIMIT)),
        });
        run.last_phase = phase;
        run.last_state = state;

        write_json_atomic(&path, &run)?;
        Ok(run)
    }

    /// Read the latest run file, if any.
    pub fn latest_run(&self, feature_id: &str) -> Result<Option<RunFile>> {
        match self.latest_run_path(feature_id)? {
            Some(path) => Ok(Some(read_json_limited(&path, MAX_STATE_FILE_BYTES)?)),
            None => Ok(None),
        }
    }
}

/// Build a checkpoint for the current loop phase.
pub fn checkpoint_now(
    feature_id: &str,
    branch: &str,
    pr_number: Option<u64>,
    pr_url: &str,
    phase: &str,
) -> FeatureCheckpoint {
    FeatureCheckpoint {
        schema: CHECKPOINT_SCHEMA,
        feature_id: feature_id.to_string(),
        branch: branch.to_string(),
        pr_number,
        pr_url: pr_url.to_string(),
        phase: phase.to_string(),
        updated_at: Utc::now(),
    }
}
