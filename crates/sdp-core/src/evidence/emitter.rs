//! Config-gated evidence emission.
//!
//! The emitter resolves the project root (nearest ancestor holding
//! `.sdp/config.yml`), honors `evidence.enabled`, and offers both a
//! synchronous and a fire-and-forget append. Callers that terminate the
//! process right after emitting must use [`Emitter::emit_sync`]; the async
//! variant is only durable within the lifetime of the process.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{find_project_root, load_config};
use crate::error::Result;
use crate::evidence::event::Event;
use crate::evidence::log::EvidenceLog;

/// Environment variables consulted for the active model id, in order.
const MODEL_ENV_CHAIN: [&str; 5] = [
    "SDP_MODEL_ID",
    "OPENCODE_MODEL",
    "ANTHROPIC_MODEL",
    "OPENAI_MODEL",
    "MODEL",
];

/// The model id of the current agent session.
///
/// First non-empty variable from the chain wins; `"unknown"` otherwise.
pub fn model_id() -> String {
    for var in MODEL_ENV_CHAIN {
        if let Ok(value) = std::env::var(var) {
            if !value.trim().is_empty() {
                return value;
            }
        }
    }
    "unknown".to_string()
}

/// Handle for appending events to the project's evidence log.
#[derive(Clone)]
pub struct Emitter {
    log: Option<Arc<EvidenceLog>>,
}

impl Emitter {
    /// Build an emitter for the project containing `start`.
    ///
    /// Emission is disabled (events silently dropped) when no project root
    /// is found or when the config turns evidence off.
    pub fn from_project(start: &Path) -> Result<Self> {
        let Some(root) = find_project_root(start) else {
            debug!("no .sdp/config.yml above {}; evidence disabled", start.display());
            return Ok(Self::disabled());
        };
        let config = load_config(&root)?;
        if !config.evidence.enabled {
            debug!("evidence disabled by config at {}", root.display());
            return Ok(Self::disabled());
        }
        let log = EvidenceLog::open(config.log_path_under(&root))?;
        Ok(Self {
            log: Some(Arc::new(log)),
        })
    }

    /// An emitter that drops everything.
    pub fn disabled() -> Self {
        Self { log: None }
    }

    /// Whether events will actually be written.
    pub fn is_enabled(&self) -> bool {
        self.log.is_some()
    }

    /// Append an event and fsync before returning.
    ///
    /// Dropped emissions (disabled config) are not an error.
    pub fn emit_sync(&self, event: Event) -> Result<()> {
        match &self.log {
            Some(log) => log.append(event).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Append an event without blocking the caller.
    ///
    /// Best effort: failures are logged and swallowed. Outside a tokio
    /// runtime the write happens inline.
    pub fn emit(&self, event: Event) {
        let Some(log) = self.log.clone() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    if let Err(e) = log.append(event) {
                        warn!("async evidence emission failed: {e}");
                    }
                });
            }
            Err(_) => {
                if let Err(e) = log.append(event) {
                    warn!("evidence emission failed: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::init_project;
    use crate::evidence::event::{AcceptanceData, EventBody};
    use crate::evidence::log::read_all;

    fn acceptance_event() -> Event {
        Event::new(
            "00-001-01",
            EventBody::Acceptance(AcceptanceData {
                command: "make test".to_string(),
                passed: true,
                output: "ok".to_string(),
                timeout_seconds: 60,
            }),
        )
    }

    #[test]
    fn test_emit_sync_writes_to_configured_log() {
        let dir = tempfile::tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let emitter = Emitter::from_project(&nested).unwrap();
        assert!(emitter.is_enabled());
        emitter.emit_sync(acceptance_event()).unwrap();

        let log_path = dir.path().join(".sdp/log/events.jsonl");
        assert_eq!(read_all(&log_path).unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_config_drops_silently() {
        let dir = tempfile::tempdir().unwrap();
        let sdp = dir.path().join(".sdp");
        std::fs::create_dir_all(&sdp).unwrap();
        std::fs::write(
            sdp.join("config.yml"),
            "version: 1\nevidence:\n  enabled: false\n",
        )
        .unwrap();

        let emitter = Emitter::from_project(dir.path()).unwrap();
        assert!(!emitter.is_enabled());
        emitter.emit_sync(acceptance_event()).unwrap();
        assert!(!dir.path().join(".sdp/log/events.jsonl").exists());
    }

    #[test]
    fn test_no_project_root_means_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let emitter = Emitter::from_project(dir.path()).unwrap();
        assert!(!emitter.is_enabled());
    }

    #[tokio::test]
    async fn test_async_emit_lands_before_runtime_drain() {
        let dir = tempfile::tempdir().unwrap();
        init_project(dir.path()).unwrap();
        let emitter = Emitter::from_project(dir.path()).unwrap();

        emitter.emit(acceptance_event());
        // Yield to the blocking pool until the write lands.
        let log_path = dir.path().join(".sdp/log/events.jsonl");
        for _ in 0..100 {
            if read_all(&log_path).map(|e| e.len()).unwrap_or(0) == 1 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("async emission never landed");
    }

    #[test]
    fn test_model_id_env_chain() {
        // Serial-unsafe env mutation is confined to this test.
        let saved: Vec<_> = MODEL_ENV_CHAIN
            .iter()
            .map(|v| (v, std::env::var(v).ok()))
            .collect();
        for var in MODEL_ENV_CHAIN {
            std::env::remove_var(var);
        }

        assert_eq!(model_id(), "unknown");
        std::env::set_var("MODEL", "fallback-model");
        assert_eq!(model_id(), "fallback-model");
        std::env::set_var("SDP_MODEL_ID", "primary-model");
        assert_eq!(model_id(), "primary-model");

        for (var, value) in saved {
            match value {
                Some(v) => std::env::set_var(var, v),
                None => std::env::remove_var(var),
            }
        }
    }
}
