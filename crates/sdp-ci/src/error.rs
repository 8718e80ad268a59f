//! Error taxonomy for the CI loop and its fixers.

/// Errors raised while polling checks, fixing failures, or persisting
/// loop state.
#[derive(Debug, thiserror::Error)]
pub enum CiError {
    #[error("checks command failed: {0}")]
    ChecksCommand(String),

    #[error("checks output parse failure: {0}")]
    ChecksParse(String),

    #[error("no fixer pattern matched the failure log")]
    UnparsableFailureLog,

    #[error("fixer {name} timed out after {seconds}s")]
    FixerTimeout { name: String, seconds: u64 },

    #[error("external command failed: {0}")]
    ExternalCommand(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] sdp_core::SdpError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CI-loop operations.
pub type Result<T> = std::result::Result<T, CiError>;
