// ABOUTME: Parser module for YAML and JSON workflow definitions
// ABOUTME: Exports workflow configuration types, parsing and validation

pub mod error;
pub mod validation;
pub mod workflow;

pub use error::{ParserError, ValidationError};
pub use validation::{ValidationReport, WorkflowValidator};
pub use workflow::{
    normalize_yaml, ConfigFormat, DependencyEdge, TaskDefinition, WorkflowConfig, WorkflowParser,
    REQUIRED_FIELDS,
};
