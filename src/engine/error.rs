// ABOUTME: Error types for task graph, scheduling and workflow execution
// ABOUTME: Defines specific error types raised by the engine module

use thiserror::Error;

use super::task::TaskStatus;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Circular dependency detected: {tasks:?}")]
    CircularDependency { tasks: Vec<String> },

    #[error("Dependency {from} -> {to} references unknown task '{task_id}'")]
    UnknownNode {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Task with ID {task_id} already exists")]
    DuplicateTask { task_id: String },

    #[error("Invalid task: {reason}")]
    InvalidTask { reason: String },

    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
