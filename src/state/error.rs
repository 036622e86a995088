// ABOUTME: Error types for workflow state persistence
// ABOUTME: Covers storage IO, record encoding and unrepairable records

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid workflow id {0:?}")]
    InvalidId(String),

    #[error("No state stored for workflow {0}")]
    NotFound(String),

    #[error("Invalid state record for workflow {workflow_id}: {reason}")]
    InvalidRecord { workflow_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StateError>;
