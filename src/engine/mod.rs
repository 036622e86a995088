// ABOUTME: Task execution engine module for the dagflow orchestrator
// ABOUTME: Task graph, ready-queue scheduling, placeholder resolution and dispatch

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod manager;
pub mod placeholder;
pub mod result;
pub mod retry;
pub mod task;

pub use context::{ExecutionContext, SharedMemory};
pub use error::{ExecutionError, Result};
pub use executor::{ExecutionObserver, NoopObserver, RunReport, TaskOptions, WorkflowEngine};
pub use graph::{TaskGraph, TaskNode};
pub use manager::{FailurePolicy, TaskManager};
pub use placeholder::{find_placeholders, Placeholder, PlaceholderResolver, UNRESOLVED};
pub use result::{ResultStatus, RunSummary, TaskResult, WorkflowStatus};
pub use retry::{execute_with_retries, RetryPolicy};
pub use task::{Task, TaskStatus, DEFAULT_PRIORITY};
