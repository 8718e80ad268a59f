//! Dependency-graph dispatch: the workstream DAG, circuit breaker, atomic
//! checkpoints, and the bounded-concurrency executor.

pub mod breaker;
pub mod checkpoint;
pub mod dispatcher;
pub mod error;
pub mod graph;

pub use breaker::{BreakerConfig, BreakerError, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use checkpoint::{
    clean_orphan_tmp, read_json_limited, write_json_atomic, CheckpointManager,
    DispatcherCheckpoint, CHECKPOINT_VERSION, MAX_STATE_FILE_BYTES,
};
pub use dispatcher::{
    DispatchReport, Dispatcher, DispatcherConfig, WorkstreamCallback, DEFAULT_CONCURRENCY,
    MAX_CONCURRENCY, MIN_CONCURRENCY,
};
pub use error::{DispatchError, GraphError};
pub use graph::{GraphSnapshot, WorkstreamGraph, WorkstreamNode};
