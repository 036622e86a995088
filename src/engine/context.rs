// ABOUTME: Run-scoped execution context and the shared memory sink
// ABOUTME: Holds accumulated task results for placeholder lookup during one pass

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::result::TaskResult;

/// Results gathered during one execution pass. Discarded afterwards;
/// durable state lives in the state manager.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: String,
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    results: IndexMap<String, TaskResult>,
}

impl ExecutionContext {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: uuid::Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            results: IndexMap::new(),
        }
    }

    /// Seed results from an earlier pass, e.g. when resuming
    pub fn with_results(mut self, results: IndexMap<String, TaskResult>) -> Self {
        self.results = results;
        self
    }

    pub fn record_result(&mut self, task_id: impl Into<String>, result: TaskResult) {
        self.results.insert(task_id.into(), result);
    }

    pub fn result(&self, task_id: &str) -> Option<&TaskResult> {
        self.results.get(task_id)
    }

    pub fn results(&self) -> &IndexMap<String, TaskResult> {
        &self.results
    }

    pub fn into_results(self) -> IndexMap<String, TaskResult> {
        self.results
    }
}

/// Key/value store every task result is mirrored into. Cloning shares the
/// underlying map.
#[derive(Debug, Clone, Default)]
pub struct SharedMemory {
    entries: Arc<RwLock<IndexMap<String, Value>>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_entry(&self, key: impl Into<String>, value: Value) {
        let mut entries = self.entries.write().await;
        entries.insert(key.into(), value);
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        entries.get(key).cloned()
    }

    pub async fn entries(&self) -> IndexMap<String, Value> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
