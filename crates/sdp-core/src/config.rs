//! Project configuration: `.sdp/config.yml` discovery, parsing, and doctor
//! checks.
//!
//! The config file marks the project root. Every component that persists
//! state resolves paths relative to the directory containing `.sdp/`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SdpError};

/// Default location of the evidence log, relative to the project root.
pub const DEFAULT_LOG_PATH: &str = ".sdp/log/events.jsonl";

/// Relative path of the config file that marks a project root.
pub const CONFIG_REL_PATH: &str = ".sdp/config.yml";

/// Top-level SDP configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpConfig {
    pub version: u32,
    #[serde(default)]
    pub evidence: EvidenceConfig,
}

/// Evidence-layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// When false, all emissions are dropped.
    pub enabled: bool,
    /// Log file path relative to the project root.
    #[serde(default = "default_log_path")]
    pub log_path: String,
}

fn default_log_path() -> String {
    DEFAULT_LOG_PATH.to_string()
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_path: default_log_path(),
        }
    }
}

impl Default for SdpConfig {
    fn default() -> Self {
        Self {
            version: 1,
            evidence: EvidenceConfig::default(),
        }
    }
}

impl SdpConfig {
    /// Absolute path of the evidence log under `root`.
    pub fn log_path_under(&self, root: &Path) -> PathBuf {
        root.join(&self.evidence.log_path)
    }
}

/// Walk `start` and its ancestors looking for `.sdp/config.yml`.
///
/// Returns the first directory that contains it, or `None` when no ancestor
/// is an SDP project.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir.join(CONFIG_REL_PATH).is_file() {
            return Some(dir.to_path_buf());
        }
        current = dir.parent();
    }
    None
}

/// Load `.sdp/config.yml` from a project root.
pub fn load_config(root: &Path) -> Result<SdpConfig> {
    let path = root.join(CONFIG_REL_PATH);
    let raw = std::fs::read_to_string(&path).map_err(|e| SdpError::io(&path, e))?;
    serde_yaml::from_str(&raw).map_err(|e| SdpError::Parse(format!("{}: {e}", path.display())))
}

/// Write a default config and create the `.sdp` tree. Used by `sdp init`.
///
/// Refuses to overwrite an existing config.
pub fn init_project(root: &Path) -> Result<PathBuf> {
    let path = root.join(CONFIG_REL_PATH);
    if path.exists() {
        return Err(SdpError::InvalidInput(format!(
            "{} already exists",
            path.display()
        )));
    }
    for sub in ["log", "checkpoints", "runs", "ci-fixes"] {
        let dir = root.join(".sdp").join(sub);
        std::fs::create_dir_all(&dir).map_err(|e| SdpError::io(&dir, e))?;
    }
    let yaml = serde_yaml::to_string(&SdpConfig::default())
        .map_err(|e| SdpError::Parse(e.to_string()))?;
    std::fs::write(&path, yaml).map_err(|e| SdpError::io(&path, e))?;
    Ok(path)
}

/// One doctor finding about the on-disk project layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

/// Inspect a project root and report config/layout health.
pub fn doctor(root: &Path) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    let config_path = root.join(CONFIG_REL_PATH);
    match load_config(root) {
        Ok(cfg) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                ok: true,
                detail: format!("version {} at {}", cfg.version, config_path.display()),
            });
            let log = cfg.log_path_under(root);
            checks.push(DoctorCheck {
                name: "evidence-log".to_string(),
                ok: true,
                detail: if log.is_file() {
                    format!("{} present", log.display())
                } else {
                    format!("{} not yet created", log.display())
                },
            });
        }
        Err(e) => {
            warn!("doctor: config unreadable: {e}");
            checks.push(DoctorCheck {
                name: "config".to_string(),
                ok: false,
                detail: e.to_string(),
            });
        }
    }

    for sub in ["checkpoints", "runs"] {
        let dir = root.join(".sdp").join(sub);
        checks.push(DoctorCheck {
            name: sub.to_string(),
            ok: dir.is_dir(),
            detail: dir.display().to_string(),
        });
    }

    checks
}
