//! Bounded-concurrency DAG executor.
//!
//! Draws batches from the graph's ready set, runs each workstream callback
//! under the circuit breaker, and checkpoints after every batch. Execution
//! is fail-forward: a failing workstream is recorded and its node is still
//! marked complete so dependents can run; the breaker is what arrests a
//! runaway failure cascade.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatch::breaker::{BreakerConfig, BreakerError, CircuitBreaker};
use crate::dispatch::checkpoint::{
    CheckpointManager, DispatcherCheckpoint, CHECKPOINT_VERSION,
};
use crate::dispatch::error::DispatchError;
use crate::dispatch::graph::WorkstreamGraph;

/// Concurrency bounds for a dispatcher.
pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 5;
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Per-workstream execution callback.
pub type WorkstreamCallback =
    Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Dispatcher construction options.
#[derive(Clone)]
pub struct DispatcherConfig {
    pub feature_id: String,
    /// Parallel workstreams per batch; clamped to `[1, 5]`.
    pub concurrency: usize,
    /// Directory for crash-recovery checkpoints; `None` disables them.
    pub checkpoint_dir: Option<PathBuf>,
    pub breaker: BreakerConfig,
    /// Shutdown signal; flips to `true` to stop at the next batch boundary.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl DispatcherConfig {
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            concurrency: DEFAULT_CONCURRENCY,
            checkpoint_dir: None,
            breaker: BreakerConfig::default(),
            cancel: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Final account of a dispatch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// Successfully completed workstreams.
    pub completed: BTreeSet<String>,
    /// Failed workstreams with their error strings.
    pub failed: BTreeMap<String, String>,
    /// Every terminal workstream in completion order.
    pub order: Vec<String>,
}

impl DispatchReport {
    pub fn all_green(&self) -> bool {
        self.failed.is_empty()
    }
}

struct DispatchState {
    graph: WorkstreamGraph,
    completed: BTreeSet<String>,
    failed: BTreeMap<String, String>,
    order: Vec<String>,
}

/// DAG executor for one feature's workstreams.
pub struct Dispatcher {
    feature_id: String,
    concurrency: usize,
    state: RwLock<DispatchState>,
    breaker: Arc<CircuitBreaker>,
    checkpoints: Option<CheckpointManager>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Dispatcher {
    /// Build a dispatcher over a fully constructed graph.
    pub fn new(graph: WorkstreamGraph, config: DispatcherConfig) -> Result<Self, DispatchError> {
        let checkpoints = match &config.checkpoint_dir {
            Some(dir) => Some(CheckpointManager::new(dir, &config.feature_id)?),
            None => None,
        };
        Ok(Self {
            feature_id: config.feature_id,
            concurrency: config.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY),
            state: RwLock::new(DispatchState {
                graph,
                completed: BTreeSet::new(),
                failed: BTreeMap::new(),
                order: Vec::new(),
            }),
            breaker: Arc::new(CircuitBreaker::new(config.breaker)),
            checkpoints,
            cancel: config.cancel,
        })
    }

    /// Effective concurrency after clamping.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Successfully completed workstream ids.
    pub fn get_completed(&self) -> BTreeSet<String> {
        self.state.read().unwrap_or_else(|p| p.into_inner()).completed.clone()
    }

    /// Failed workstream ids with error strings.
    pub fn get_failed(&self) -> BTreeMap<String, String> {
        self.state.read().unwrap_or_else(|p| p.into_inner()).failed.clone()
    }

    /// Run every workstream to a terminal state.
    ///
    /// Restores from a checkpoint when one matches this feature, executes
    /// ready batches under the breaker, checkpoints after each batch, and
    /// deletes the checkpoint on a fully green run.
    pub async fn execute(&self, callback: WorkstreamCallback) -> Result<DispatchReport, DispatchError> {
        self.try_restore();

        let total = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            state.graph.len()
        };

        loop {
            if self.cancelled() {
                self.save_checkpoint();
                return Err(DispatchError::Cancelled);
            }

            let batch: Vec<String> = {
                let state = self.state.read().unwrap_or_else(|p| p.into_inner());
                if state.completed.len() + state.failed.len() >= total {
                    break;
                }
                state
                    .graph
                    .get_ready()
                    .into_iter()
                    .filter(|id| !state.completed.contains(id) && !state.failed.contains_key(id))
                    .take(self.concurrency)
                    .collect()
            };

            if batch.is_empty() {
                let state = self.state.read().unwrap_or_else(|p| p.into_inner());
                let remaining = total - state.completed.len() - state.failed.len();
                return Err(DispatchError::Stalled { remaining });
            }

            debug!(batch = ?batch, "dispatching batch");
            let mut in_flight = FuturesUnordered::new();
            for id in batch {
                let breaker = Arc::clone(&self.breaker);
                let callback = Arc::clone(&callback);
                in_flight.push(tokio::spawn(async move {
                    let result = breaker.execute(|| callback(id.clone())).await;
                    (id, result)
                }));
            }

            while let Some(joined) = in_flight.next().await {
                let (id, result) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("workstream task panicked: {e}");
                        continue;
                    }
                };
                let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
                match result {
                    Ok(()) => {
                        info!(ws_id = %id, "workstream completed");
                        state.completed.insert(id.clone());
                    }
                    Err(BreakerError::Open) => {
                        warn!(ws_id = %id, "workstream rejected: circuit breaker open");
                        state.failed.insert(id.clone(), BreakerError::Open.to_string());
                    }
                    Err(BreakerError::Task(e)) => {
                        warn!(ws_id = %id, "workstream failed: {e}");
                        state.failed.insert(id.clone(), e.to_string());
                    }
                }
                // Fail-forward: dependents run either way.
                state.graph.mark_complete(&id);
                state.order.push(id);
            }

            self.save_checkpoint();
        }

        let report = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            DispatchReport {
                completed: state.completed.clone(),
                failed: state.failed.clone(),
                order: state.order.clone(),
            }
        };

        if report.all_green() {
            if let Some(mgr) = &self.checkpoints {
                mgr.delete()?;
            }
        }
        Ok(report)
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Restore state from a checkpoint matching this feature, if any.
    fn try_restore(&self) {
        let Some(mgr) = &self.checkpoints else { return };
        let checkpoint = match mgr.load() {
            Ok(Some(cp)) => cp,
            Ok(None) => return,
            Err(e) => {
                warn!("checkpoint unreadable, starting fresh: {e}");
                return;
            }
        };
        if checkpoint.feature_id != self.feature_id {
            warn!(
                found = %checkpoint.feature_id,
                expected = %self.feature_id,
                "checkpoint belongs to another feature; skipping restore"
            );
            return;
        }

        info!(
            completed = checkpoint.completed.len(),
            failed = checkpoint.failed.len(),
            "restoring dispatcher state from checkpoint"
        );
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        state.graph.restore(&checkpoint.graph);
        state.completed = checkpoint.completed.iter().cloned().collect();
        state.failed = checkpoint
            .failed
            .iter()
            .map(|id| (id.clone(), "failed before restart".to_string()))
            .collect();
        self.breaker.restore(checkpoint.circuit_breaker);
    }

    /// Snapshot current state and write it atomically. Best effort.
    fn save_checkpoint(&self) {
        let Some(mgr) = &self.checkpoints else { return };
        let checkpoint = {
            let state = self.state.read().unwrap_or_else(|p| p.into_inner());
            DispatcherCheckpoint {
                version: CHECKPOINT_VERSION,
                feature_id: self.feature_id.clone(),
                timestamp: Utc::now(),
                completed: state.completed.iter().cloned().collect(),
                failed: state.failed.keys().cloned().collect(),
                graph: state.graph.snapshot(),
                circuit_breaker: self.breaker.metrics(),
            }
        };
        if let Err(e) = mgr.save(&checkpoint) {
            warn!("checkpoint save failed: {e}");
        }
    }
}
