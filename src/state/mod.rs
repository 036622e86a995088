// ABOUTME: Workflow state persistence module
// ABOUTME: Durable run records with a write-through cache and per-id locking

pub mod error;
pub mod manager;
pub mod record;

pub use error::{Result, StateError};
pub use manager::{StateManager, DEFAULT_STATE_DIR};
pub use record::WorkflowRun;
