//! SDP Core Library
//!
//! Evidence chain, next-step planning, and dependency-graph dispatch for the
//! structured development process runtime.

pub mod advisor;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evidence;
pub mod git;
pub mod telemetry;
pub mod validate;

pub use advisor::{
    compare_priority, recommend, AdvisorMetrics, Category, ProjectState, QualityGates,
    Recommendation, WorkstreamStatus, WorkstreamSummary,
};

pub use config::{doctor, find_project_root, init_project, load_config, SdpConfig};

pub use dispatch::{
    BreakerConfig, BreakerSnapshot, BreakerState, CheckpointManager, CircuitBreaker,
    DispatchError, DispatchReport, Dispatcher, DispatcherCheckpoint, DispatcherConfig,
    GraphError, WorkstreamCallback, WorkstreamGraph,
};

pub use error::{Result, SdpError};

pub use evidence::{
    model_id, read_all, stats, to_csv, to_json, verify, Emitter, Event, EventBody, EventKind,
    EvidenceLog, VerificationReport, GENESIS_HASH,
};

pub use git::{capture_head_sha, has_uncommitted_changes, is_git_repo};

pub use telemetry::init_tracing;

pub use validate::{validate_feature_id, validate_ws_id};

/// SDP version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
