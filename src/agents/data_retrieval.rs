// ABOUTME: Data retrieval agent querying a pluggable document search backend
// ABOUTME: Formats retrieved documents as numbered text for downstream prompts

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use super::error::{AgentError, Result};
use super::{agent_config, required_str, Agent, AgentBuilder, AgentKind};
use crate::engine::TaskResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Search boundary. Vector stores and embedding models live behind it.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedDocument>>;
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    top_k: usize,
}

#[derive(Default)]
pub(crate) struct RetrievalAgentBuilder {
    backend: Option<Arc<dyn RetrievalBackend>>,
}

impl RetrievalAgentBuilder {
    pub(crate) fn new(backend: Arc<dyn RetrievalBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }
}

impl AgentBuilder for RetrievalAgentBuilder {
    fn build(&self, config: &Map<String, Value>) -> Result<Box<dyn Agent>> {
        let backend = self
            .backend
            .clone()
            .ok_or_else(|| AgentError::MissingBackend(AgentKind::DataRetrieval.to_string()))?;
        let config: RetrievalConfig = agent_config(AgentKind::DataRetrieval.as_str(), config)?;
        Ok(Box::new(RetrievalAgent::new(backend, config.top_k)))
    }
}

pub struct RetrievalAgent {
    backend: Arc<dyn RetrievalBackend>,
    top_k: usize,
}

impl RetrievalAgent {
    pub fn new(backend: Arc<dyn RetrievalBackend>, top_k: usize) -> Self {
        Self { backend, top_k }
    }
}

fn format_documents(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("Document {}:\n{}", i + 1, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Agent for RetrievalAgent {
    async fn execute(&self, params: &Map<String, Value>) -> Result<TaskResult> {
        let query = required_str(params, "query")?;
        let top_k = params
            .get("top_k")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.top_k);

        info!("Executing search query: {}", query);
        let documents = self.backend.search(query, top_k).await?;

        Ok(TaskResult::success(format_documents(&documents))
            .with_raw(serde_json::to_value(&documents)?)
            .with_metadata("document_count", documents.len()))
    }
}
