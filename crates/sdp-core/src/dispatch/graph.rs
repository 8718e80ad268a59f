//! Workstream dependency graph.
//!
//! Nodes hold ids and indegree counters; edges are a `from → [to]` adjacency
//! map. Forward references are forbidden: a node's dependencies must exist
//! before the node is added. `add_edge` runs a reachability check before
//! mutating, so a constructed graph can never contain a cycle.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::dispatch::error::GraphError;

/// One workstream in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstreamNode {
    pub id: String,
    pub depends_on: Vec<String>,
    pub indegree: usize,
    pub completed: bool,
}

/// Serializable graph state for checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<WorkstreamNode>,
    /// `from → [to]` edges.
    pub edges: std::collections::BTreeMap<String, Vec<String>>,
}

/// Directed acyclic graph of workstreams.
#[derive(Debug, Clone, Default)]
pub struct WorkstreamGraph {
    nodes: HashMap<String, WorkstreamNode>,
    /// `from → [to]` (dependency → dependents).
    edges: HashMap<String, Vec<String>>,
}

impl WorkstreamGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&WorkstreamNode> {
        self.nodes.get(id)
    }

    /// Add a node with its dependencies.
    ///
    /// Fails with [`GraphError::NodeExists`] on duplicates and
    /// [`GraphError::MissingDependency`] when a dependency has not been added
    /// yet (forward references are forbidden).
    pub fn add_node(&mut self, id: &str, depends_on: &[String]) -> Result<(), GraphError> {
        if self.nodes.contains_key(id) {
            return Err(GraphError::NodeExists(id.to_string()));
        }
        for dep in depends_on {
            if !self.nodes.contains_key(dep) {
                return Err(GraphError::MissingDependency {
                    node: id.to_string(),
                    dep: dep.clone(),
                });
            }
        }

        self.nodes.insert(
            id.to_string(),
            WorkstreamNode {
                id: id.to_string(),
                depends_on: depends_on.to_vec(),
                indegree: 0,
                completed: false,
            },
        );
        self.edges.entry(id.to_string()).or_default();

        for dep in depends_on {
            self.add_edge(dep, id)?;
        }
        Ok(())
    }

    /// Add a directed edge `from → to` and bump `to`'s indegree.
    ///
    /// Rejected with [`GraphError::CircularDependency`] when `from` is
    /// already reachable from `to` (pre-flight DFS; the graph is untouched
    /// on failure).
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        if !self.nodes.contains_key(from) {
            return Err(GraphError::MissingDependency {
                node: to.to_string(),
                dep: from.to_string(),
            });
        }
        if self.reachable(to, from) {
            return Err(GraphError::CircularDependency {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.edges.entry(from.to_string()).or_default().push(to.to_string());
        if let Some(node) = self.nodes.get_mut(to) {
            node.indegree += 1;
        }
        Ok(())
    }

    /// DFS: is `target` reachable from `start` along existing edges?
    fn reachable(&self, start: &str, target: &str) -> bool {
        if start == target {
            return true;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(nexts) = self.edges.get(current) {
                stack.extend(nexts.iter().map(String::as_str));
            }
        }
        false
    }

    /// Kahn's algorithm; dependencies come before dependents.
    ///
    /// Output is deterministic; same-level nodes appear in id order.
    pub fn topological_sort(&self) -> Result<Vec<String>, GraphError> {
        let mut in_degree: HashMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for targets in self.edges.values() {
            for to in targets {
                if let Some(deg) = in_degree.get_mut(to.as_str()) {
                    *deg += 1;
                }
            }
        }

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        queue.sort_unstable();
        let mut queue: VecDeque<&str> = queue.into();

        let mut sorted = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            sorted.push(id.to_string());
            if let Some(nexts) = self.edges.get(id) {
                let mut unlocked: Vec<&str> = Vec::new();
                for next in nexts {
                    let deg = in_degree.get_mut(next.as_str()).expect("edge target exists");
                    *deg -= 1;
                    if *deg == 0 {
                        unlocked.push(next.as_str());
                    }
                }
                unlocked.sort_unstable();
                queue.extend(unlocked);
            }
        }

        if sorted.len() != self.nodes.len() {
            return Err(GraphError::CycleDetected(self.nodes.len() - sorted.len()));
        }
        Ok(sorted)
    }

    /// Non-completed nodes whose indegree is zero, in id order.
    pub fn get_ready(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .nodes
            .values()
            .filter(|n| !n.completed && n.indegree == 0)
            .map(|n| n.id.clone())
            .collect();
        ready.sort_unstable();
        ready
    }

    /// Mark a node complete and unlock its direct successors.
    ///
    /// Idempotent; unknown ids are ignored.
    pub fn mark_complete(&mut self, id: &str) {
        match self.nodes.get_mut(id) {
            Some(node) if !node.completed => node.completed = true,
            _ => return,
        }
        if let Some(nexts) = self.edges.get(id).cloned() {
            for next in nexts {
                if let Some(node) = self.nodes.get_mut(&next) {
                    node.indegree = node.indegree.saturating_sub(1);
                }
            }
        }
    }

    /// Value snapshot for checkpointing.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<WorkstreamNode> = self.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let edges = self
            .edges
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        GraphSnapshot { nodes, edges }
    }

    /// Replace graph state from a snapshot.
    pub fn restore(&mut self, snapshot: &GraphSnapshot) {
        self.nodes = snapshot
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        self.edges = snapshot
            .edges
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
}
