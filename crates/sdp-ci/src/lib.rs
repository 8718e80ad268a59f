//! SDP CI - the green-loop controller
//!
//! Drives a pull request to green:
//! - polls the PR checks surface with bounded retry
//! - classifies failing checks as auto-fixable or escalation material
//! - applies deterministic and inner fixers
//! - persists atomic per-feature checkpoints and append-only run files

pub mod autofix;
pub mod checkpoint;
pub mod checks;
pub mod classify;
pub mod driver;
pub mod error;
pub mod fixers;
pub mod gitops;

// Re-export key types
pub use autofix::{AutoFixer, FailureLogSource, FixReport, Fixer, GhFailureLog};
pub use checkpoint::{
    checkpoint_now, FeatureCheckpoint, LoopStateStore, RunEvent, RunFile, CHECKPOINT_SCHEMA,
    RUN_EVENT_FIELD_LIMIT,
};
pub use checks::{parse_checks_json, CheckPoller, CheckRun, CheckState, GhChecks, RETRY_DELAYS};
pub use classify::{classify, is_auto_fixable, Disposition};
pub use driver::{CiLoop, CiLoopConfig, Escalation, LoopOutcome};
pub use error::{CiError, Result};
pub use fixers::{run_fixer, split_command, Fixer as DeterministicFixer, FixerRegistry};
