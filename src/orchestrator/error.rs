// ABOUTME: Error types for the workflow builder facade
// ABOUTME: Wraps parser, validation and execution failures plus lookup errors

use thiserror::Error;

use crate::engine::{ExecutionError, WorkflowStatus};
use crate::parser::{ParserError, ValidationError};

#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("Invalid workflow configuration: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Workflow {0} not found")]
    NotFound(String),

    #[error("Workflow {workflow_id} is {status}")]
    InvalidState {
        workflow_id: String,
        status: WorkflowStatus,
    },
}

pub type Result<T> = std::result::Result<T, BuilderError>;
