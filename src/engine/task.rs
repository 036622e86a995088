// ABOUTME: Task entity tracked by the task manager
// ABOUTME: Defines task status, forward-only transitions and loose JSON construction

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

use super::error::{ExecutionError, Result};

pub const DEFAULT_PRIORITY: i64 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Ready,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Ready => 1,
            TaskStatus::InProgress => 2,
            TaskStatus::Completed | TaskStatus::Failed => 3,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the scheduler may hand the task out
    pub fn is_dispatchable(self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Ready)
    }

    /// Status only moves forward. Finished states are terminal; the retry
    /// path resets `failed` directly inside the task manager.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_finished() {
            return false;
        }
        next.rank() > self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Ready => write!(f, "ready"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub dependencies: IndexSet<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            dependencies: IndexSet::new(),
            status: TaskStatus::Pending,
            metadata: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.insert(task_id.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, task_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(task_ids.into_iter().map(Into::into));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build a task from a loose JSON record such as `{"id": .., "name": .., "priority": ..}`
    pub fn from_value(value: &Value) -> Result<Self> {
        let record = value.as_object().ok_or_else(|| ExecutionError::InvalidTask {
            reason: "task record must be a JSON object".to_string(),
        })?;

        for field in ["id", "name"] {
            if !record.contains_key(field) {
                return Err(ExecutionError::InvalidTask {
                    reason: format!("missing required field '{}'", field),
                });
            }
        }

        let task: Task =
            serde_json::from_value(value.clone()).map_err(|e| ExecutionError::InvalidTask {
                reason: e.to_string(),
            })?;
        task.validate()?;
        Ok(task)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ExecutionError::InvalidTask {
                reason: "task id cannot be empty".to_string(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ExecutionError::InvalidTask {
                reason: format!("task {} has an empty name", self.id),
            });
        }
        Ok(())
    }

    /// True once every dependency appears in `settled`
    pub fn dependencies_met(&self, settled: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| settled.contains(dep))
    }
}
