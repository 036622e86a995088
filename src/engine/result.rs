// ABOUTME: Task result and workflow run status types
// ABOUTME: Defines per-task outcomes, field lookup for placeholders and run summaries

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
    Stopped,
}

/// Outcome of one task. `raw` carries whatever structured payload the
/// agent produced; `output` is its textual form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub raw: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub success_rate: f64,
}

impl TaskResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Success,
            output: Some(output.into()),
            raw: Value::Null,
            message: None,
            metadata: Map::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            output: None,
            raw: Value::Null,
            message: Some(message.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = raw;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    /// Look up a field by name: the standard fields first, then keys of an
    /// object `raw` payload, then metadata. Null counts as absent.
    pub fn field(&self, name: &str) -> Option<Value> {
        let value = match name {
            "status" => Some(Value::String(self.status.to_string())),
            "output" => self.output.clone().map(Value::String),
            "message" => self.message.clone().map(Value::String),
            "raw" => Some(self.raw.clone()),
            "metadata" => Some(Value::Object(self.metadata.clone())),
            _ => self
                .raw
                .as_object()
                .and_then(|raw| raw.get(name))
                .or_else(|| self.metadata.get(name))
                .cloned(),
        };
        value.filter(|v| !v.is_null())
    }
}

impl RunSummary {
    pub fn from_results(results: &IndexMap<String, TaskResult>) -> Self {
        let total = results.len();
        let successful = results.values().filter(|r| r.is_success()).count();
        let success_rate = if total > 0 {
            (successful as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Self {
            total_tasks: total,
            successful_tasks: successful,
            failed_tasks: total - successful,
            success_rate,
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Success => write!(f, "success"),
            ResultStatus::Error => write!(f, "error"),
        }
    }
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Stopped
        )
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Created => write!(f, "created"),
            WorkflowStatus::Running => write!(f, "running"),
            WorkflowStatus::Completed => write!(f, "completed"),
            WorkflowStatus::Failed => write!(f, "failed"),
            WorkflowStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_lookup() {
        let result = TaskResult::success("summary text")
            .with_raw(json!({"data": {"rows": 3}, "empty": null}))
            .with_metadata("model", "small");

        assert_eq!(result.field("output"), Some(json!("summary text")));
        assert_eq!(result.field("status"), Some(json!("success")));
        assert_eq!(result.field("data"), Some(json!({"rows": 3})));
        assert_eq!(result.field("model"), Some(json!("small")));
        assert_eq!(result.field("message"), None);
        assert_eq!(result.field("empty"), None);
        assert_eq!(result.field("missing"), None);
    }

    #[test]
    fn test_error_result_serialization() {
        let result = TaskResult::error("boom").with_metadata("attempts", 2);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["status"], json!("error"));
        assert_eq!(value["message"], json!("boom"));
        assert!(value.get("output").is_none());

        let parsed: TaskResult = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_run_summary() {
        let mut results = IndexMap::new();
        results.insert("a".to_string(), TaskResult::success("ok"));
        results.insert("b".to_string(), TaskResult::error("failed"));

        let summary = RunSummary::from_results(&results);
        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.successful_tasks, 1);
        assert_eq!(summary.failed_tasks, 1);
        assert_eq!(summary.success_rate, 50.0);
    }

    #[test]
    fn test_workflow_status_display() {
        assert_eq!(WorkflowStatus::Stopped.to_string(), "stopped");
        assert_eq!(
            serde_json::to_value(WorkflowStatus::Completed).unwrap(),
            json!("completed")
        );
        assert!(!WorkflowStatus::Running.is_terminal());
    }
}
