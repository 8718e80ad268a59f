//! Domain-level error taxonomy for SDP.

use std::path::PathBuf;

/// SDP domain errors.
#[derive(Debug, thiserror::Error)]
pub enum SdpError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("evidence chain broken at line {line}: observed prev_hash {observed}, expected {expected}")]
    ChainBroken {
        line: usize,
        observed: String,
        expected: String,
    },

    #[error("evidence emission disabled by config")]
    ConfigDisabled,

    #[error("external command failed: {0}")]
    ExternalCommand(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SdpError {
    /// Wrap an I/O error with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for SDP domain operations.
pub type Result<T> = std::result::Result<T, SdpError>;
