// ABOUTME: Error types for agent construction and execution
// ABOUTME: Defines specific error types for the agents module

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Unsupported agent type: {0}")]
    UnknownType(String),

    #[error("Agent type '{0}' is built in and cannot be re-registered")]
    BuiltInType(String),

    #[error("Missing agent_config for {0} agent")]
    MissingConfig(String),

    #[error("Invalid configuration for {agent} agent: {message}")]
    InvalidConfig { agent: String, message: String },

    #[error("Missing required parameter '{0}'")]
    MissingParam(String),

    #[error("No backend configured for {0} agents")]
    MissingBackend(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
