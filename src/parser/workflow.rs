// ABOUTME: Workflow configuration data structures and YAML/JSON parsing
// ABOUTME: Normalises input documents to JSON and merges dependency declarations

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use super::error::{ParserError, Result, ValidationError};
use crate::engine::task::DEFAULT_PRIORITY;

pub const REQUIRED_FIELDS: [&str; 2] = ["tasks", "dependencies"];

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_delay: Option<Duration>,
}

/// An edge is written either as `{from: a, to: b}` or as `[a, b]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyEdge {
    Named { from: String, to: String },
    Pair([String; 2]),
}

impl DependencyEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        DependencyEdge::Named {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn from(&self) -> &str {
        match self {
            DependencyEdge::Named { from, .. } => from,
            DependencyEdge::Pair([from, _]) => from,
        }
    }

    pub fn to(&self) -> &str {
        match self {
            DependencyEdge::Named { to, .. } => to,
            DependencyEdge::Pair([_, to]) => to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tasks: IndexMap<String, TaskDefinition>,
    pub dependencies: Vec<DependencyEdge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ParserError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

impl WorkflowConfig {
    /// Build a configuration from an already-parsed JSON document.
    /// Required top-level fields are checked before the shape is decoded.
    pub fn from_value(value: Value) -> Result<Self> {
        let document = value.as_object().ok_or_else(|| {
            ParserError::InvalidFormat("workflow configuration must be a mapping".to_string())
        })?;

        for field in REQUIRED_FIELDS {
            if !document.contains_key(field) {
                return Err(ValidationError::MissingField(field.to_string()).into());
            }
        }

        serde_json::from_value(value).map_err(|e| ParserError::InvalidFormat(e.to_string()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let document: serde_yaml::Value = serde_yaml::from_str(content)?;
        Self::from_value(normalize_yaml(document))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(content)?;
        Self::from_value(document)
    }

    pub fn parse_str(content: &str, format: ConfigFormat) -> Result<Self> {
        match format {
            ConfigFormat::Yaml => Self::from_yaml(content),
            ConfigFormat::Json => Self::from_json(content),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)?;
        Self::parse_str(&content, format)
    }

    /// Every `(from, to)` edge: the explicit list first, then per-task
    /// `dependencies`, without duplicates
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: IndexSet<(String, String)> = self
            .dependencies
            .iter()
            .map(|edge| (edge.from().to_string(), edge.to().to_string()))
            .collect();

        for (task_id, definition) in &self.tasks {
            for dependency in &definition.dependencies {
                edges.insert((dependency.clone(), task_id.clone()));
            }
        }

        edges.into_iter().collect()
    }

    /// Prerequisites of a task, drawn from every edge declaration
    pub fn task_dependencies(&self, task_id: &str) -> Vec<String> {
        self.edges()
            .into_iter()
            .filter(|(_, to)| to == task_id)
            .map(|(from, _)| from)
            .collect()
    }

    pub fn task_name<'a>(&'a self, task_id: &'a str) -> &'a str {
        self.tasks
            .get(task_id)
            .and_then(|definition| definition.name.as_deref())
            .unwrap_or(task_id)
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Convert a YAML document to JSON. Non-string keys, tagged values and
/// non-finite floats become strings.
pub fn normalize_yaml(value: serde_yaml::Value) -> Value {
    match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(b) => Value::Bool(b),
        serde_yaml::Value::Number(n) => normalize_number(&n),
        serde_yaml::Value::String(s) => Value::String(s),
        serde_yaml::Value::Sequence(items) => {
            Value::Array(items.into_iter().map(normalize_yaml).collect())
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut object = Map::new();
            for (key, value) in mapping {
                object.insert(yaml_key(&key), normalize_yaml(value));
            }
            Value::Object(object)
        }
        tagged @ serde_yaml::Value::Tagged(_) => Value::String(yaml_text(&tagged)),
    }
}

fn normalize_number(number: &serde_yaml::Number) -> Value {
    if let Some(i) = number.as_i64() {
        Value::from(i)
    } else if let Some(u) = number.as_u64() {
        Value::from(u)
    } else {
        number
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(number.to_string()))
    }
}

fn yaml_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Null => "null".to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => yaml_text(other),
    }
}

fn yaml_text(value: &serde_yaml::Value) -> String {
    serde_yaml::to_string(value)
        .map(|text| text.trim_end().to_string())
        .unwrap_or_default()
}

/// Async file front end used by the CLI
pub struct WorkflowParser;

impl WorkflowParser {
    pub async fn parse_file<P: AsRef<Path>>(path: P) -> Result<WorkflowConfig> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).await?;
        WorkflowConfig::parse_str(&content, format)
    }

    /// Load a file as a plain JSON document without checking its shape
    pub async fn load_document<P: AsRef<Path>>(path: P) -> Result<Value> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        match ConfigFormat::from_path(path)? {
            ConfigFormat::Yaml => Ok(normalize_yaml(serde_yaml::from_str(&content)?)),
            ConfigFormat::Json => Ok(serde_json::from_str(&content)?),
        }
    }
}
