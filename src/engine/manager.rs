// ABOUTME: Thread-safe task manager with a dependency-aware priority ready queue
// ABOUTME: Owns task status, promotes waiting tasks and validates dependency declarations

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::error::{ExecutionError, Result};
use super::task::{Task, TaskStatus};
use crate::parser::{ValidationError, WorkflowConfig};

/// Which finished states release dependent tasks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Only completed prerequisites release dependents
    Strict,
    /// Failed prerequisites release dependents as well
    #[default]
    ContinueOnFailure,
}

#[derive(Debug, PartialEq, Eq)]
struct QueuedTask {
    priority: i64,
    sequence: u64,
    task_id: String,
}

// Max-heap: higher priority first, then the earlier insertion
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    tasks: IndexMap<String, Task>,
    sequences: HashMap<String, u64>,
    next_sequence: u64,
    ready: BinaryHeap<QueuedTask>,
    waiting: Vec<String>,
    completed: Vec<String>,
    settled: HashSet<String>,
}

impl ManagerState {
    fn enqueue(&mut self, task_id: &str) {
        let Some(task) = self.tasks.get(task_id) else {
            return;
        };
        let sequence = self.sequences.get(task_id).copied().unwrap_or_default();
        self.ready.push(QueuedTask {
            priority: task.priority,
            sequence,
            task_id: task_id.to_string(),
        });
    }

    fn promote(&mut self, task_id: &str) {
        if let Some(task) = self.tasks.get_mut(task_id) {
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Ready;
            }
        }
        self.enqueue(task_id);
    }
}

pub struct TaskManager {
    policy: FailurePolicy,
    state: Mutex<ManagerState>,
}

impl TaskManager {
    /// A standalone manager releases dependents only on completion
    pub fn new() -> Self {
        Self::with_failure_policy(FailurePolicy::Strict)
    }

    pub fn with_failure_policy(policy: FailurePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(ManagerState::default()),
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a task. It goes straight to the ready queue when its
    /// dependencies are already satisfied, otherwise to the waiting list.
    pub fn add_task(&self, task: Task) -> Result<()> {
        if let Err(e) = task.validate() {
            warn!("Rejected task: {}", e);
            return Err(e);
        }

        let mut state = self.lock();
        if state.tasks.contains_key(&task.id) {
            warn!("Task with ID {} already exists", task.id);
            return Err(ExecutionError::DuplicateTask { task_id: task.id });
        }

        let task_id = task.id.clone();
        let ready = task.dependencies_met(&state.settled);
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.sequences.insert(task_id.clone(), sequence);
        state.tasks.insert(task_id.clone(), task);

        if ready {
            state.promote(&task_id);
            debug!("Task {} added to ready queue", task_id);
        } else {
            state.waiting.push(task_id.clone());
            debug!("Task {} waiting on dependencies", task_id);
        }
        Ok(())
    }

    /// Move every waiting task whose dependencies are satisfied onto the
    /// ready queue. Returns how many were promoted.
    pub fn resolve_dependencies(&self) -> usize {
        let mut state = self.lock();
        Self::resolve_locked(&mut state)
    }

    fn resolve_locked(state: &mut ManagerState) -> usize {
        let waiting = std::mem::take(&mut state.waiting);
        let mut promoted = 0;

        for task_id in waiting {
            let ready = state
                .tasks
                .get(&task_id)
                .is_some_and(|task| task.dependencies_met(&state.settled));
            if ready {
                state.promote(&task_id);
                promoted += 1;
            } else {
                state.waiting.push(task_id);
            }
        }

        if promoted > 0 {
            debug!("Promoted {} tasks to the ready queue", promoted);
        }
        promoted
    }

    /// Pop the highest-priority dispatchable task. Status is left for the
    /// caller to advance.
    pub fn get_next_task(&self) -> Option<Task> {
        let mut state = self.lock();
        Self::resolve_locked(&mut state);

        while let Some(queued) = state.ready.pop() {
            match state.tasks.get(&queued.task_id) {
                Some(task) if task.status.is_dispatchable() => return Some(task.clone()),
                // Stale entry left behind by a retry or a manual status change
                _ => continue,
            }
        }
        None
    }

    pub fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let mut state = self.lock();
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let previous = task.status;
        if previous == status {
            return Ok(());
        }
        if !previous.can_transition_to(status) {
            warn!(
                "Rejected status change for task {}: {} -> {}",
                task_id, previous, status
            );
            return Err(ExecutionError::InvalidTransition {
                task_id: task_id.to_string(),
                from: previous,
                to: status,
            });
        }

        task.status = status;
        debug!(task_id = %task_id, from = %previous, to = %status, "Task status updated");

        match status {
            TaskStatus::Completed => {
                state.completed.push(task_id.to_string());
                state.settled.insert(task_id.to_string());
            }
            TaskStatus::Failed if self.policy == FailurePolicy::ContinueOnFailure => {
                state.settled.insert(task_id.to_string());
            }
            _ => {}
        }
        Ok(())
    }

    /// Reset every failed task to pending. Tasks whose prerequisites are
    /// still settled go back on the ready queue; the rest wait again.
    /// Returns the ids that were reset.
    pub fn retry_failed_tasks(&self) -> Vec<String> {
        let mut state = self.lock();
        let failed: Vec<String> = state
            .tasks
            .values()
            .filter(|task| task.status == TaskStatus::Failed)
            .map(|task| task.id.clone())
            .collect();

        for task_id in &failed {
            if let Some(task) = state.tasks.get_mut(task_id) {
                task.status = TaskStatus::Pending;
            }
            state.settled.remove(task_id);
        }

        for task_id in &failed {
            let ready = state
                .tasks
                .get(task_id)
                .is_some_and(|task| task.dependencies_met(&state.settled));
            if ready {
                state.enqueue(task_id);
            } else if !state.waiting.contains(task_id) {
                state.waiting.push(task_id.clone());
            }
            info!("Retrying task {}", task_id);
        }
        failed
    }

    /// Check a workflow configuration before any task is created: every
    /// edge must name declared tasks and the prerequisite relation must be
    /// acyclic. A cycle is reported as the path that closes it.
    pub fn validate_dependencies(
        config: &WorkflowConfig,
    ) -> std::result::Result<(), ValidationError> {
        let mut prerequisites: IndexMap<&str, Vec<String>> = IndexMap::new();

        for (from, to) in config.edges() {
            for endpoint in [&from, &to] {
                if !config.has_task(endpoint) {
                    let task = if endpoint == &to { from.clone() } else { to.clone() };
                    return Err(ValidationError::UnknownDependency {
                        task,
                        dependency: endpoint.clone(),
                    });
                }
            }
            if let Some((key, _)) = config.tasks.get_key_value(to.as_str()) {
                prerequisites.entry(key.as_str()).or_default().push(from);
            }
        }

        let mut visited = HashSet::new();
        let mut path = Vec::new();
        for task_id in config.tasks.keys() {
            if let Err(cycle) = visit(task_id, &prerequisites, &mut visited, &mut path) {
                warn!("Circular dependency detected: {:?}", cycle);
                return Err(ValidationError::CircularDependency { tasks: cycle });
            }
        }
        Ok(())
    }

    /// True when there is nothing left to run
    pub fn is_empty(&self) -> bool {
        self.lock()
            .tasks
            .values()
            .all(|task| task.status.is_finished())
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    pub fn list_tasks(&self) -> Vec<Task> {
        self.lock().tasks.values().cloned().collect()
    }

    pub fn completed_tasks(&self) -> Vec<String> {
        self.lock().completed.clone()
    }

    pub fn waiting_tasks(&self) -> Vec<String> {
        self.lock().waiting.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        *state = ManagerState::default();
        debug!("Task manager cleared");
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

fn visit(
    task_id: &str,
    prerequisites: &IndexMap<&str, Vec<String>>,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> std::result::Result<(), Vec<String>> {
    if let Some(start) = path.iter().position(|id| id == task_id) {
        let mut cycle = path[start..].to_vec();
        cycle.push(task_id.to_string());
        return Err(cycle);
    }
    if !visited.insert(task_id.to_string()) {
        return Ok(());
    }

    path.push(task_id.to_string());
    if let Some(deps) = prerequisites.get(task_id) {
        for dep in deps {
            visit(dep, prerequisites, visited, path)?;
        }
    }
    path.pop();
    Ok(())
}
