// ABOUTME: Agent abstraction and the registry that builds agents by type name
// ABOUTME: Ships llm, data_retrieval, custom_task and api_connector agents

pub mod api_connector;
pub mod custom_task;
pub mod data_retrieval;
pub mod error;
pub mod llm;

pub use api_connector::{ApiConnectorAgent, ApiConnectorConfig};
pub use custom_task::{CustomTaskAgent, CustomTaskConfig};
pub use data_retrieval::{RetrievalAgent, RetrievalBackend, RetrievedDocument};
pub use error::{AgentError, Result};
pub use llm::{Completion, CompletionRequest, LlmAgent, LlmBackend, OpenAiCompatibleBackend};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::engine::TaskResult;

/// An executor for one task. Receives the resolved `params` map.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn execute(&self, params: &Map<String, Value>) -> Result<TaskResult>;
}

/// Builds an agent from a task's resolved configuration
pub trait AgentBuilder: Send + Sync {
    fn build(&self, config: &Map<String, Value>) -> Result<Box<dyn Agent>>;
}

impl<F> AgentBuilder for F
where
    F: Fn(&Map<String, Value>) -> Result<Box<dyn Agent>> + Send + Sync,
{
    fn build(&self, config: &Map<String, Value>) -> Result<Box<dyn Agent>> {
        self(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Llm,
    DataRetrieval,
    CustomTask,
    ApiConnector,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Llm,
        AgentKind::DataRetrieval,
        AgentKind::CustomTask,
        AgentKind::ApiConnector,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Llm => "llm",
            AgentKind::DataRetrieval => "data_retrieval",
            AgentKind::CustomTask => "custom_task",
            AgentKind::ApiConnector => "api_connector",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AgentError::UnknownType(s.to_string()))
    }
}

/// The `agent_config` section of a task configuration, decoded into `T`.
/// A missing section decodes from an empty map.
pub fn agent_config<T: DeserializeOwned>(agent: &str, config: &Map<String, Value>) -> Result<T> {
    let section = config
        .get("agent_config")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));

    serde_json::from_value(section).map_err(|e| AgentError::InvalidConfig {
        agent: agent.to_string(),
        message: e.to_string(),
    })
}

/// A required string parameter
pub fn required_str<'a>(params: &'a Map<String, Value>, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AgentError::MissingParam(name.to_string()))
}

pub struct AgentRegistry {
    builders: HashMap<String, Box<dyn AgentBuilder>>,
}

impl AgentRegistry {
    /// Registry holding the built-in agent kinds. The llm and
    /// data_retrieval kinds need a backend before they can be built.
    pub fn new() -> Self {
        let mut builders: HashMap<String, Box<dyn AgentBuilder>> = HashMap::new();
        builders.insert(
            AgentKind::Llm.to_string(),
            Box::new(llm::LlmAgentBuilder::default()),
        );
        builders.insert(
            AgentKind::DataRetrieval.to_string(),
            Box::new(data_retrieval::RetrievalAgentBuilder::default()),
        );
        builders.insert(
            AgentKind::CustomTask.to_string(),
            Box::new(custom_task::CustomTaskBuilder),
        );
        builders.insert(
            AgentKind::ApiConnector.to_string(),
            Box::new(api_connector::ApiConnectorBuilder),
        );

        Self { builders }
    }

    pub fn with_llm_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.builders.insert(
            AgentKind::Llm.to_string(),
            Box::new(llm::LlmAgentBuilder::new(backend)),
        );
        self
    }

    pub fn with_retrieval_backend(mut self, backend: Arc<dyn RetrievalBackend>) -> Self {
        self.builders.insert(
            AgentKind::DataRetrieval.to_string(),
            Box::new(data_retrieval::RetrievalAgentBuilder::new(backend)),
        );
        self
    }

    /// Register an additional agent kind. Built-in names are refused;
    /// registering a custom name twice replaces the earlier builder.
    pub fn register_agent_type(
        &mut self,
        name: impl Into<String>,
        builder: impl AgentBuilder + 'static,
    ) -> Result<()> {
        let name = name.into();
        if AgentKind::from_str(&name).is_ok() {
            error!("Agent type {} already exists", name);
            return Err(AgentError::BuiltInType(name));
        }

        if self.builders.insert(name.clone(), Box::new(builder)).is_some() {
            debug!("Replaced builder for agent type {}", name);
        }
        info!("Registered new agent type: {}", name);
        Ok(())
    }

    /// Build an agent for `agent_type`. Failures are logged and reported
    /// as `None` so the caller can record an error result.
    pub fn create_agent(
        &self,
        agent_type: &str,
        config: &Map<String, Value>,
    ) -> Option<Box<dyn Agent>> {
        let Some(builder) = self.builders.get(agent_type) else {
            error!("Unsupported agent type: {}", agent_type);
            return None;
        };

        match builder.build(config) {
            Ok(agent) => Some(agent),
            Err(e) => {
                error!("Error creating {} agent: {}", agent_type, e);
                None
            }
        }
    }

    pub fn supports(&self, agent_type: &str) -> bool {
        self.builders.contains_key(agent_type)
    }

    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.builders.keys().cloned().collect();
        types.sort();
        types
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
