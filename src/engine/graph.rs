// ABOUTME: Directed acyclic task graph with deterministic topological ordering
// ABOUTME: Holds executor type and configuration per node plus dependency edges

use indexmap::IndexMap;
use petgraph::algo::tarjan_scc;
use petgraph::graph::NodeIndex;
use petgraph::{Direction, Graph};
use serde::Serialize;
use serde_json::{Map, Value};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;

use super::error::{ExecutionError, Result};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskNode {
    pub task_id: String,
    pub executor_type: String,
    pub config: Map<String, Value>,
}

/// Edges point from a prerequisite to the task that waits on it.
/// Nodes are never removed, so node indices double as insertion order.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: Graph<TaskNode, ()>,
    task_indices: IndexMap<String, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a node. Re-declaring an id replaces its executor type and
    /// config but keeps the original position.
    pub fn add_node(
        &mut self,
        task_id: impl Into<String>,
        executor_type: impl Into<String>,
        config: Map<String, Value>,
    ) {
        let task_id = task_id.into();
        let executor_type = executor_type.into();

        if let Some(&node_idx) = self.task_indices.get(&task_id) {
            debug!("Replacing configuration of task node {}", task_id);
            let node = &mut self.graph[node_idx];
            node.executor_type = executor_type;
            node.config = config;
            return;
        }

        let node_idx = self.graph.add_node(TaskNode {
            task_id: task_id.clone(),
            executor_type,
            config,
        });
        self.task_indices.insert(task_id, node_idx);
    }

    /// Record that `from` must complete before `to` starts
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<()> {
        let from_idx = self.index_of(from, from, to)?;
        let to_idx = self.index_of(to, from, to)?;

        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
        Ok(())
    }

    fn index_of(&self, task_id: &str, from: &str, to: &str) -> Result<NodeIndex> {
        self.task_indices
            .get(task_id)
            .copied()
            .ok_or_else(|| ExecutionError::UnknownNode {
                task_id: task_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            })
    }

    /// Kahn's algorithm, always taking the earliest-inserted ready node
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(idx, _)| Reverse(idx))
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(Reverse(idx)) = ready.pop() {
            let node_idx = NodeIndex::new(idx);
            order.push(self.graph[node_idx].task_id.clone());

            for dependent in self
                .graph
                .neighbors_directed(node_idx, Direction::Outgoing)
            {
                let degree = &mut in_degree[dependent.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(dependent.index()));
                }
            }
        }

        if order.len() < self.graph.node_count() {
            return Err(ExecutionError::CircularDependency {
                tasks: self.cycle_members(),
            });
        }

        Ok(order)
    }

    /// Task ids of the first strongly connected component that forms a cycle
    fn cycle_members(&self) -> Vec<String> {
        let mut cycles: Vec<Vec<NodeIndex>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&idx| self.graph.contains_edge(idx, idx))
            })
            .collect();

        for component in &mut cycles {
            component.sort();
        }
        cycles.sort();

        cycles
            .into_iter()
            .next()
            .map(|component| {
                component
                    .into_iter()
                    .map(|idx| self.graph[idx].task_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct prerequisites of a task, in insertion order
    pub fn dependencies(&self, task_id: &str) -> Vec<String> {
        self.neighbors(task_id, Direction::Incoming)
    }

    /// Tasks that directly wait on the given task, in insertion order
    pub fn dependents(&self, task_id: &str) -> Vec<String> {
        self.neighbors(task_id, Direction::Outgoing)
    }

    fn neighbors(&self, task_id: &str, direction: Direction) -> Vec<String> {
        let Some(&node_idx) = self.task_indices.get(task_id) else {
            return Vec::new();
        };

        let mut indices: Vec<NodeIndex> = self
            .graph
            .neighbors_directed(node_idx, direction)
            .collect();
        indices.sort();
        indices
            .into_iter()
            .map(|idx| self.graph[idx].task_id.clone())
            .collect()
    }

    pub fn root_tasks(&self) -> Vec<String> {
        self.filter_ids(|idx| {
            self.graph
                .neighbors_directed(idx, Direction::Incoming)
                .next()
                .is_none()
        })
    }

    pub fn leaf_tasks(&self) -> Vec<String> {
        self.filter_ids(|idx| {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .next()
                .is_none()
        })
    }

    fn filter_ids(&self, keep: impl Fn(NodeIndex) -> bool) -> Vec<String> {
        self.task_indices
            .iter()
            .filter(|&(_, &idx)| keep(idx))
            .map(|(task_id, _)| task_id.clone())
            .collect()
    }

    pub fn node(&self, task_id: &str) -> Option<&TaskNode> {
        self.task_indices
            .get(task_id)
            .map(|&node_idx| &self.graph[node_idx])
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.task_indices.values().map(|&idx| &self.graph[idx])
    }

    pub fn edges(&self) -> Vec<(String, String)> {
        self.graph
            .raw_edges()
            .iter()
            .map(|edge| {
                (
                    self.graph[edge.source()].task_id.clone(),
                    self.graph[edge.target()].task_id.clone(),
                )
            })
            .collect()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.task_indices.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.task_indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_indices.is_empty()
    }
}
