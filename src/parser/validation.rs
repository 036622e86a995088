// ABOUTME: Workflow validation covering dependencies, task definitions and references
// ABOUTME: Produces a report with errors, warnings and the resulting execution order

use serde_json::Value;
use std::collections::HashSet;

use super::error::ValidationError;
use super::workflow::WorkflowConfig;
use crate::engine::{find_placeholders, TaskGraph, TaskManager};

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub execution_order: Vec<String>,
    pub is_valid: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowValidator {
    agent_types: Option<Vec<String>>,
}

impl WorkflowValidator {
    pub fn new() -> Self {
        Self { agent_types: None }
    }

    /// Also reject task types outside this list
    pub fn with_agent_types(mut self, agent_types: Vec<String>) -> Self {
        self.agent_types = Some(agent_types);
        self
    }

    pub fn validate(&self, workflow: &WorkflowConfig) -> ValidationReport {
        let mut report = ValidationReport::new();

        if let Err(error) = TaskManager::validate_dependencies(workflow) {
            report.errors.push(error);
        }

        for (task_id, definition) in &workflow.tasks {
            if let Err(error) = self.validate_task(task_id, &definition.task_type, definition) {
                report.errors.push(error);
            }
        }

        if report.errors.is_empty() {
            let graph = build_graph(workflow);
            match graph.topological_order() {
                Ok(order) => report.execution_order = order,
                Err(e) => report.errors.push(ValidationError::InvalidTaskConfig {
                    task: "*".to_string(),
                    reason: e.to_string(),
                }),
            }
            self.check_references(workflow, &graph, &mut report);
        }

        report.is_valid = report.errors.is_empty();
        report
    }

    fn validate_task(
        &self,
        task_id: &str,
        task_type: &str,
        definition: &super::workflow::TaskDefinition,
    ) -> Result<(), ValidationError> {
        if task_type.trim().is_empty() {
            return Err(ValidationError::InvalidTaskConfig {
                task: task_id.to_string(),
                reason: "task type cannot be empty".to_string(),
            });
        }

        if let Some(ref supported) = self.agent_types {
            if !supported.iter().any(|t| t == task_type) {
                return Err(ValidationError::UnsupportedTaskType {
                    task: task_id.to_string(),
                    task_type: task_type.to_string(),
                    supported_types: supported.clone(),
                });
            }
        }

        if definition.retries == Some(0) {
            return Err(ValidationError::InvalidTaskConfig {
                task: task_id.to_string(),
                reason: "retries must be greater than 0".to_string(),
            });
        }

        match definition.config.get("params") {
            None | Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(ValidationError::InvalidTaskConfig {
                task: task_id.to_string(),
                reason: "params must be a mapping".to_string(),
            }),
        }
    }

    /// Warn about placeholders that can only resolve to the unresolved marker
    fn check_references(
        &self,
        workflow: &WorkflowConfig,
        graph: &TaskGraph,
        report: &mut ValidationReport,
    ) {
        for (task_id, definition) in &workflow.tasks {
            let upstream = ancestors(graph, task_id);
            let mut texts = Vec::new();
            collect_strings(&Value::Object(definition.config.clone()), &mut texts);

            for placeholder in texts.iter().flat_map(|text| find_placeholders(text)) {
                if !workflow.has_task(&placeholder.task_id) {
                    report.warnings.push(format!(
                        "Task '{}' references unknown task '{}'",
                        task_id, placeholder.task_id
                    ));
                } else if !upstream.contains(&placeholder.task_id) {
                    report.warnings.push(format!(
                        "Task '{}' references '{}' which is not one of its dependencies",
                        task_id, placeholder.task_id
                    ));
                }
            }
        }
    }
}

fn build_graph(workflow: &WorkflowConfig) -> TaskGraph {
    let mut graph = TaskGraph::new();
    for (task_id, definition) in &workflow.tasks {
        graph.add_node(task_id.clone(), definition.task_type.clone(), definition.config.clone());
    }
    for (from, to) in workflow.edges() {
        // Unknown endpoints were already reported by dependency validation
        let _ = graph.add_edge(&from, &to);
    }
    graph
}

fn ancestors(graph: &TaskGraph, task_id: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut stack = graph.dependencies(task_id);
    while let Some(current) = stack.pop() {
        if seen.insert(current.clone()) {
            stack.extend(graph.dependencies(&current));
        }
    }
    seen
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(text) => out.push(text.clone()),
        Value::Array(items) => items.iter().for_each(|item| collect_strings(item, out)),
        Value::Object(map) => map.values().for_each(|item| collect_strings(item, out)),
        _ => {}
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            execution_order: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
