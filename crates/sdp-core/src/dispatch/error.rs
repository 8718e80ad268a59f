//! Error taxonomy for the graph and dispatcher.

/// Structural errors raised while building or querying the workstream graph.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node {node} depends on unknown workstream {dep}")]
    MissingDependency { node: String, dep: String },

    #[error("edge {from} -> {to} would create a cycle")]
    CircularDependency { from: String, to: String },

    #[error("graph contains a cycle involving {0} node(s)")]
    CycleDetected(usize),
}

/// Errors surfaced by the dispatcher itself.
///
/// Individual workstream failures are not errors; they are recorded in the
/// report and execution continues.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] crate::error::SdpError),

    #[error("dispatch cancelled by shutdown signal")]
    Cancelled,

    #[error("dispatch stalled: {remaining} node(s) unreachable")]
    Stalled { remaining: usize },
}
