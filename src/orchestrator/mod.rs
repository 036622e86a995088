// ABOUTME: Orchestration facade tying configuration, engine and state together
// ABOUTME: Exports the workflow builder and its checkpointing observer

pub mod builder;
pub mod checkpoint;
pub mod error;

pub use builder::{ExecutionOutcome, StatusReport, WorkflowBuilder, WorkflowStatusInfo};
pub use checkpoint::CheckpointObserver;
pub use error::{BuilderError, Result};
