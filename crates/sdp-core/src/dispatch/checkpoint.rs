//! Atomic checkpoint persistence for the dispatcher.
//!
//! Writes go through a temp file that is fsynced and renamed over the final
//! path, so readers only ever see the previous or the new checkpoint.
//! Unreadable checkpoints are quarantined as `<path>.corrupt` instead of
//! being silently retried forever.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{info, warn};

use crate::dispatch::breaker::BreakerSnapshot;
use crate::dispatch::graph::GraphSnapshot;
use crate::error::{Result, SdpError};
use crate::validate::validate_feature_id;

/// Dispatcher checkpoint schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Crash-recovery snapshot of one dispatcher run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherCheckpoint {
    pub version: u32,
    pub feature_id: String,
    pub timestamp: DateTime<Utc>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub graph: GraphSnapshot,
    pub circuit_breaker: BreakerSnapshot,
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// Temp file → fsync → rename; on rename failure the temp file is removed.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SdpError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(value)?;

    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp).map_err(|e| SdpError::io(&tmp, e))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|e| SdpError::io(&tmp, e))?;
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(SdpError::io(path, e));
    }
    Ok(())
}

/// Read and parse JSON from `path`, reading at most `limit` bytes.
///
/// Bounds memory when the file comes from untrusted disk state.
pub fn read_json_limited<T: DeserializeOwned>(path: &Path, limit: u64) -> Result<T> {
    use std::io::Read;
    let file = std::fs::File::open(path).map_err(|e| SdpError::io(path, e))?;
    let mut buf = Vec::new();
    file.take(limit)
        .read_to_end(&mut buf)
        .map_err(|e| SdpError::io(path, e))?;
    serde_json::from_slice(&buf).map_err(|e| SdpError::Parse(format!("{}: {e}", path.display())))
}

/// Maximum accepted size for untrusted JSON state files.
pub const MAX_STATE_FILE_BYTES: u64 = 1024 * 1024;

/// Manages the dispatcher checkpoint file for one feature.
pub struct CheckpointManager {
    path: PathBuf,
}

impl CheckpointManager {
    /// Create a manager rooted at `dir` for `feature_id`.
    ///
    /// The id is validated before any path is constructed.
    pub fn new(dir: impl Into<PathBuf>, feature_id: &str) -> Result<Self> {
        validate_feature_id(feature_id)?;
        let path = dir.into().join(format!("{feature_id}-checkpoint.json"));
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically persist a checkpoint.
    pub fn save(&self, checkpoint: &DispatcherCheckpoint) -> Result<()> {
        write_json_atomic(&self.path, checkpoint)
    }

    /// Load the checkpoint if one exists.
    ///
    /// A missing file is `None`. A file that fails to parse is moved to
    /// `<path>.corrupt` and reported as an error.
    pub fn load(&self) -> Result<Option<DispatcherCheckpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }
        match read_json_limited(&self.path, MAX_STATE_FILE_BYTES) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                let corrupt = self.path.with_extension("json.corrupt");
                warn!(
                    "quarantining unreadable checkpoint {} -> {}",
                    self.path.display(),
                    corrupt.display()
                );
                let _ = std::fs::rename(&self.path, &corrupt);
                Err(e)
            }
        }
    }

    /// Remove the checkpoint and any lingering temp file.
    pub fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(SdpError::io(&self.path, e)),
        }
        let _ = std::fs::remove_file(self.path.with_extension("json.tmp"));
        Ok(())
    }
}

/// Remove orphan `.tmp` files left behind by a crash mid-write.
///
/// Returns how many were removed. Missing directory is not an error.
pub fn clean_orphan_tmp(dir: &Path) -> Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(SdpError::io(dir, e)),
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
            if std::fs::remove_file(&path).is_ok() {
                info!("removed orphan checkpoint temp {}", path.display());
                removed += 1;
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::graph::WorkstreamGraph;

    fn sample_checkpoint(feature_id: &str) -> DispatcherCheckpoint {
        let mut graph = WorkstreamGraph::new();
        graph.add_node("00-001-01", &[]).unwrap();
        graph
            .add_node("00-001-02", &["00-001-01".to_string()])
            .unwrap();
        graph.mark_complete("00-001-01");
        DispatcherCheckpoint {
            version: CHECKPOINT_VERSION,
            feature_id: feature_id.to_string(),
            timestamp: Utc::now(),
            completed: vec!["00-001-01".to_string()],
            failed: vec![],
            graph: graph.snapshot(),
            circuit_breaker: BreakerSnapshot::default(),
        }
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "F001").unwrap();
        let checkpoint = sample_checkpoint("F001");
        mgr.save(&checkpoint).unwrap();
        let loaded = mgr.load().unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "F001").unwrap();
        assert!(mgr.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "F001").unwrap();
        std::fs::write(mgr.path(), "{ not json").unwrap();
        assert!(mgr.load().is_err());
        assert!(!mgr.path().exists());
        assert!(mgr.path().with_extension("json.corrupt").exists());
    }

    #[test]
    fn test_invalid_feature_id_rejected_before_io() {
        let dir = tempfile::tempdir().unwrap();
        for bad in ["../../etc", "F1", "evil/F001", "F001\\x"] {
            assert!(CheckpointManager::new(dir.path(), bad).is_err());
        }
        // Nothing was created.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_delete_removes_file_and_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(dir.path(), "F001").unwrap();
        mgr.save(&sample_checkpoint("F001")).unwrap();
        std::fs::write(mgr.path().with_extension("json.tmp"), "partial").unwrap();
        mgr.delete().unwrap();
        assert!(!mgr.path().exists());
        assert!(!mgr.path().with_extension("json.tmp").exists());
        // Deleting again is fine.
        mgr.delete().unwrap();
    }

    #[test]
    fn test_clean_orphan_tmp() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("F001-checkpoint.json.tmp"), "x").unwrap();
        std::fs::write(dir.path().join("F002.json"), "{}").unwrap();
        assert_eq!(clean_orphan_tmp(dir.path()).unwrap(), 1);
        assert!(dir.path().join("F002.json").exists());
        assert_eq!(clean_orphan_tmp(&dir.path().join("absent")).unwrap(), 0);
    }

    #[test]
    fn test_read_json_limited_bounds_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.json");
        std::fs::write(&path, format!("\"{}\"", "x".repeat(64))).unwrap();
        // A limit smaller than the file truncates and fails to parse.
        let result: Result<String> = read_json_limited(&path, 10);
        assert!(matches!(result, Err(SdpError::Parse(_))));
        let ok: String = read_json_limited(&path, 1024).unwrap();
        assert_eq!(ok.len(), 64);
    }
}
