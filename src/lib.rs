// ABOUTME: Main library module for the dagflow workflow orchestrator
// ABOUTME: Exports all core modules and provides the public API

pub mod agents;
pub mod cli;
pub mod engine;
pub mod orchestrator;
pub mod parser;
pub mod state;

// Re-export commonly used types
pub use agents::{Agent, AgentBuilder, AgentKind, AgentRegistry};
pub use cli::{App, Args, Config};
pub use engine::{
    FailurePolicy, RetryPolicy, Task, TaskGraph, TaskManager, TaskResult, TaskStatus,
    WorkflowEngine, WorkflowStatus,
};
pub use orchestrator::{ExecutionOutcome, StatusReport, WorkflowBuilder};
pub use parser::{WorkflowConfig, WorkflowParser, WorkflowValidator};
pub use state::{StateManager, WorkflowRun};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
