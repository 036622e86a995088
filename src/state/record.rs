// ABOUTME: Durable workflow run record persisted by the state manager
// ABOUTME: One record per workflow id with status, config, results and timestamps

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::{RunSummary, TaskResult, WorkflowStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub results: IndexMap<String, TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(workflow_id: impl Into<String>, config: Value) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            status: WorkflowStatus::Created,
            config,
            results: IndexMap::new(),
            error: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Mark the run failed with a reason
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = WorkflowStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results)
    }

    /// Fill in whatever a damaged record is missing so it decodes again.
    /// Returns the names of the fields that were repaired.
    pub fn repair_value(workflow_id: &str, record: &mut Map<String, Value>) -> Vec<&'static str> {
        let mut repaired = Vec::new();
        let now = Value::String(Utc::now().to_rfc3339());

        let status_ok = record
            .get("status")
            .cloned()
            .is_some_and(|status| serde_json::from_value::<WorkflowStatus>(status).is_ok());
        if !status_ok {
            record.insert("status".into(), Value::String(WorkflowStatus::Failed.to_string()));
            record.insert(
                "error".into(),
                Value::String("State repaired: status was missing or invalid".into()),
            );
            repaired.push("status");
        }

        if !record.get("config").is_some_and(Value::is_object) {
            record.insert("config".into(), Value::Object(Map::new()));
            repaired.push("config");
        }

        if !record.get("workflow_id").is_some_and(Value::is_string) {
            record.insert("workflow_id".into(), Value::String(workflow_id.to_string()));
            repaired.push("workflow_id");
        }

        if !record.get("results").is_some_and(Value::is_object) {
            record.insert("results".into(), Value::Object(Map::new()));
            repaired.push("results");
        }

        for field in ["created_at", "last_updated"] {
            let valid = record
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|ts| DateTime::parse_from_rfc3339(ts).is_ok());
            if !valid {
                record.insert(field.into(), now.clone());
                repaired.push(field);
            }
        }

        repaired
    }
}
