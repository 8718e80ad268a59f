//! Next-step resolver: a deterministic rule pipeline over project state.

pub mod metrics;
pub mod rules;
pub mod state;

pub use metrics::{AdvisorMetrics, FeedbackKind, GateReport, QualityGates};
pub use rules::{recommend, Alternative, Category, Recommendation, RECOMMENDATION_VERSION};
pub use state::{
    compare_priority, CandidateWorkstream, ConfigState, GitState, ProjectState,
    WorkstreamStatus, WorkstreamSummary,
};
