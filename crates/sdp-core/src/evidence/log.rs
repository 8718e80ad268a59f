//! Append-only, hash-chained JSONL evidence log.
//!
//! Each record's `prev_hash` is the SHA-256 of the previous line's bytes;
//! the first record carries the literal `"genesis"`. A writer serializes
//! concurrent appends behind a mutex so the resulting chain always verifies.
//! Multiple writers on the same file from different processes are not
//! supported and will break the chain.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SdpError};
use crate::evidence::event::Event;

/// `prev_hash` value of the first record in a log.
pub const GENESIS_HASH: &str = "genesis";

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Writer handle for one evidence log file.
///
/// Cheap to share across threads behind an `Arc`; the internal mutex
/// linearizes appends.
pub struct EvidenceLog {
    path: PathBuf,
    last_hash: Mutex<String>,
}

impl EvidenceLog {
    /// Open (or prepare to create) the log at `path`.
    ///
    /// Parent directories are created. When the file already exists, the
    /// hash of its last non-empty line seeds the chain; otherwise the chain
    /// starts at `"genesis"`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(SdpError::InvalidInput("empty log path".to_string()));
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SdpError::io(parent, e))?;
            }
        }

        let last_hash = match std::fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .last()
                .map(sha256_of_line)
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => GENESIS_HASH.to_string(),
            Err(e) => return Err(SdpError::io(&path, e)),
        };

        Ok(Self {
            path,
            last_hash: Mutex::new(last_hash),
        })
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, linking it to the current chain tip.
    ///
    /// Sets `event.prev_hash`, writes a single JSON line, and fsyncs before
    /// returning. Returns the event as written.
    pub fn append(&self, mut event: Event) -> Result<Event> {
        let mut tip = self.last_hash.lock().unwrap_or_else(|p| p.into_inner());

        event.prev_hash = tip.clone();
        let line = serde_json::to_string(&event)?;

        let mut options = OpenOptions::new();
        options.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(&self.path)
            .map_err(|e| SdpError::io(&self.path, e))?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| SdpError::io(&self.path, e))?;

        *tip = sha256_hex(line.as_bytes());
        debug!(event_id = %event.id, kind = event.kind().as_str(), "evidence appended");
        Ok(event)
    }
}

fn sha256_of_line(line: &str) -> String {
    sha256_hex(line.as_bytes())
}

/// Read every parseable event from a log file.
///
/// A missing file yields an empty vec. Empty lines are skipped, and lines
/// that fail to parse are skipped too; tolerance keeps old readers working
/// against logs written by newer versions.
pub fn read_all(path: &Path) -> Result<Vec<Event>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SdpError::io(path, e)),
    };

    let mut events = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(line) {
            Ok(event) => events.push(event),
            Err(e) => debug!("skipping unparseable evidence line: {e}"),
        }
    }
    Ok(events)
}

/// Walk the chain and check every `prev_hash` link.
///
/// Returns the number of records verified. An empty or missing file
/// verifies trivially. Fails at the first mismatch with
/// [`SdpError::ChainBroken`] carrying the 1-indexed line number.
pub fn verify(path: &Path) -> Result<usize> {
    #[derive(serde::Deserialize)]
    struct PrevHashOnly {
        #[serde(default)]
        prev_hash: String,
    }

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(SdpError::io(path, e)),
    };

    let mut expected_prev = GENESIS_HASH.to_string();
    let mut verified = 0usize;

    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: PrevHashOnly = serde_json::from_str(line)
            .map_err(|e| SdpError::Parse(format!("line {}: {e}", idx + 1)))?;

        if record.prev_hash != expected_prev {
            return Err(SdpError::ChainBroken {
                line: idx + 1,
                observed: record.prev_hash,
                expected: expected_prev,
            });
        }

        expected_prev = sha256_hex(line.as_bytes());
        verified += 1;
    }

    Ok(verified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::event::{DecisionData, EventBody};
    use std::sync::Arc;

    fn decision_event(ws_id: &str, question: &str) -> Event {
        Event::new(
            ws_id,
            EventBody::Decision(DecisionData {
                question: question.to_string(),
                choice: "a".to_string(),
                rationale: "because".to_string(),
                alternatives: vec!["b".to_string()],
                confidence: 0.5,
                tags: vec![],
                reverses: None,
            }),
        )
    }

    #[test]
    fn test_open_rejects_empty_path() {
        assert!(matches!(
            EvidenceLog::open(""),
            Err(SdpError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_first_record_has_genesis_prev_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EvidenceLog::open(&path).unwrap();
        let written = log.append(decision_event("00-001-01", "q")).unwrap();
        assert_eq!(written.prev_hash, GENESIS_HASH);
    }

    #[test]
    fn test_chain_links_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EvidenceLog::open(&path).unwrap();
        for i in 0..5 {
            log.append(decision_event("00-001-01", &format!("q{i}"))).unwrap();
        }
        assert_eq!(verify(&path).unwrap(), 5);
        assert_eq!(read_all(&path).unwrap().len(), 5);
    }

    #[test]
    fn test_reopen_seeds_from_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let log = EvidenceLog::open(&path).unwrap();
            log.append(decision_event("00-001-01", "first")).unwrap();
        }
        let log = EvidenceLog::open(&path).unwrap();
        log.append(decision_event("00-001-01", "second")).unwrap();
        assert_eq!(verify(&path).unwrap(), 2);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EvidenceLog::open(&path).unwrap();
        for i in 0..3 {
            log.append(decision_event("00-001-01", &format!("q{i}"))).unwrap();
        }

        // Flip a byte in the middle line.
        let content = std::fs::read_to_string(&path).unwrap();
        let tampered: Vec<String> = content
            .lines()
            .enumerate()
            .map(|(i, l)| {
                if i == 1 {
                    l.replace("q1", "qX")
                } else {
                    l.to_string()
                }
            })
            .collect();
        std::fs::write(&path, tampered.join("\n") + "\n").unwrap();

        match verify(&path) {
            Err(SdpError::ChainBroken { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected ChainBroken, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(verify(&dir.path().join("absent.jsonl")).unwrap(), 0);
    }

    #[test]
    fn test_read_all_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_all(&dir.path().join("absent.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn test_read_all_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = EvidenceLog::open(&path).unwrap();
        log.append(decision_event("00-001-01", "good")).unwrap();

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("\nnot json at all\n\n");
        std::fs::write(&path, content).unwrap();

        assert_eq!(read_all(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_append_to_directory_fails_with_io() {
        let dir = tempfile::tempdir().unwrap();
        let log = EvidenceLog::open(dir.path().join("subdir")).unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let result = log.append(decision_event("00-001-01", "q"));
        assert!(matches!(result, Err(SdpError::Io { .. })));
    }

    #[test]
    fn test_concurrent_appends_keep_chain_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let log = Arc::new(EvidenceLog::open(&path).unwrap());

        let mut handles = Vec::new();
        for t in 0..4 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                for i in 0..10 {
                    log.append(decision_event("00-001-01", &format!("t{t}-q{i}")))
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(verify(&path).unwrap(), 40);
        assert_eq!(read_all(&path).unwrap().len(), 40);
    }
}
