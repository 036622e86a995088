// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides workflow document builders, temp environments and scripted fake agents

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;

use dagflow::agents::{
    self, Agent, AgentBuilder, AgentRegistry, Completion, CompletionRequest, LlmBackend,
    RetrievalBackend, RetrievedDocument,
};
use dagflow::engine::{TaskResult, WorkflowStatus};
use dagflow::orchestrator::WorkflowBuilder;
use dagflow::state::StateManager;

pub struct TestTask {
    pub id: String,
    pub task_type: String,
    pub priority: Option<i64>,
    pub retries: Option<u32>,
    pub dependencies: Vec<String>,
    pub agent_config: Option<Value>,
    pub params: Map<String, Value>,
}

impl TestTask {
    pub fn new(id: &str, task_type: &str) -> Self {
        Self {
            id: id.to_string(),
            task_type: task_type.to_string(),
            priority: None,
            retries: None,
            dependencies: Vec::new(),
            agent_config: None,
            params: Map::new(),
        }
    }

    /// A custom_task running a shell snippet
    pub fn shell(id: &str, script: &str) -> Self {
        Self::new(id, "custom_task").agent_config(json!({
            "command": "sh",
            "args": ["-c", script],
        }))
    }

    pub fn param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn depends_on(mut self, task_id: &str) -> Self {
        self.dependencies.push(task_id.to_string());
        self
    }

    pub fn agent_config(mut self, config: Value) -> Self {
        self.agent_config = Some(config);
        self
    }

    fn to_value(&self) -> Value {
        let mut config = Map::new();
        if let Some(agent_config) = &self.agent_config {
            config.insert("agent_config".to_string(), agent_config.clone());
        }
        if !self.params.is_empty() {
            config.insert("params".to_string(), Value::Object(self.params.clone()));
        }

        let mut task = json!({"type": self.task_type, "config": config});
        if let Some(priority) = self.priority {
            task["priority"] = json!(priority);
        }
        if let Some(retries) = self.retries {
            task["retries"] = json!(retries);
        }
        if !self.dependencies.is_empty() {
            task["dependencies"] = json!(self.dependencies);
        }
        task
    }
}

/// Builds workflow documents as JSON values or YAML text
pub struct TestWorkflowBuilder {
    name: String,
    tasks: Vec<TestTask>,
    edges: Vec<(String, String)>,
}

impl TestWorkflowBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasks: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn task(mut self, task: TestTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.edges.push((from.to_string(), to.to_string()));
        self
    }

    pub fn to_value(&self) -> Value {
        let tasks: Map<String, Value> = self
            .tasks
            .iter()
            .map(|task| (task.id.clone(), task.to_value()))
            .collect();
        let dependencies: Vec<Value> = self
            .edges
            .iter()
            .map(|(from, to)| json!({"from": from, "to": to}))
            .collect();

        json!({
            "name": self.name,
            "tasks": tasks,
            "dependencies": dependencies,
        })
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(&self.to_value()).expect("workflow document serialises")
    }

    pub async fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, self.to_yaml()).await
    }
}

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path().join("states")
    }

    pub fn workflow_file(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}.yaml", name))
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}_output.json", name))
    }

    pub async fn create_workflow_file(&self, name: &str, builder: &TestWorkflowBuilder) -> PathBuf {
        let workflow_file = self.workflow_file(name);
        builder
            .write_to_file(&workflow_file)
            .await
            .expect("Failed to write workflow file");
        workflow_file
    }

    /// A fresh state manager over this environment's state directory
    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::new(StateManager::new(self.state_dir()).expect("Failed to open state dir"))
    }

    pub fn workflow_builder(&self, registry: AgentRegistry) -> WorkflowBuilder {
        WorkflowBuilder::new(Arc::new(registry), self.state_manager())
    }
}

/// Returns `params.text`, or the params as JSON when there is no text
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn execute(&self, params: &Map<String, Value>) -> agents::Result<TaskResult> {
        let text = match params.get("text").and_then(Value::as_str) {
            Some(text) => text.to_string(),
            None => Value::Object(params.clone()).to_string(),
        };
        Ok(TaskResult::success(text).with_raw(Value::Object(params.clone())))
    }
}

pub fn build_echo(_config: &Map<String, Value>) -> agents::Result<Box<dyn Agent>> {
    Ok(Box::new(EchoAgent))
}

pub struct FailingAgent;

#[async_trait]
impl Agent for FailingAgent {
    async fn execute(&self, _params: &Map<String, Value>) -> agents::Result<TaskResult> {
        Ok(TaskResult::error("scripted failure"))
    }
}

pub fn build_failing(_config: &Map<String, Value>) -> agents::Result<Box<dyn Agent>> {
    Ok(Box::new(FailingAgent))
}

/// Fails a set number of times across all instances, then succeeds.
/// `calls` counts every execution.
#[derive(Clone, Default)]
pub struct FlakyBuilder {
    pub failures_left: Arc<AtomicU32>,
    pub calls: Arc<AtomicU32>,
}

impl FlakyBuilder {
    pub fn failing(times: u32) -> Self {
        Self {
            failures_left: Arc::new(AtomicU32::new(times)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

struct FlakyAgent {
    failures_left: Arc<AtomicU32>,
    calls: Arc<AtomicU32>,
}

#[async_trait]
impl Agent for FlakyAgent {
    async fn execute(&self, _params: &Map<String, Value>) -> agents::Result<TaskResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(agents::AgentError::Backend(format!("flaky call {}", call)));
        }
        Ok(TaskResult::success(format!("succeeded on call {}", call)))
    }
}

impl AgentBuilder for FlakyBuilder {
    fn build(&self, _config: &Map<String, Value>) -> agents::Result<Box<dyn Agent>> {
        Ok(Box::new(FlakyAgent {
            failures_left: self.failures_left.clone(),
            calls: self.calls.clone(),
        }))
    }
}

/// Marks every running workflow stopped, then succeeds
pub struct StopRequestBuilder {
    pub state: Arc<StateManager>,
}

struct StopRequestAgent {
    state: Arc<StateManager>,
}

#[async_trait]
impl Agent for StopRequestAgent {
    async fn execute(&self, _params: &Map<String, Value>) -> agents::Result<TaskResult> {
        for workflow_id in self.state.list_workflows().await {
            self.state
                .update_state(&workflow_id, |run| {
                    if run.status == WorkflowStatus::Running {
                        run.status = WorkflowStatus::Stopped;
                    }
                })
                .await;
        }
        Ok(TaskResult::success("stop requested"))
    }
}

impl AgentBuilder for StopRequestBuilder {
    fn build(&self, _config: &Map<String, Value>) -> agents::Result<Box<dyn Agent>> {
        Ok(Box::new(StopRequestAgent {
            state: self.state.clone(),
        }))
    }
}

/// Completion backend that summarises by prefixing the prompt
pub struct FakeLlm;

#[async_trait]
impl LlmBackend for FakeLlm {
    async fn complete(&self, request: &CompletionRequest) -> agents::Result<Completion> {
        Ok(Completion {
            text: format!("summary of: {}", request.prompt),
            model: Some("fake-model".to_string()),
            usage: None,
        })
    }
}

/// Search backend returning fixed documents for any query
pub struct FakeIndex {
    pub documents: Vec<String>,
}

#[async_trait]
impl RetrievalBackend for FakeIndex {
    async fn search(&self, _query: &str, top_k: usize) -> agents::Result<Vec<RetrievedDocument>> {
        Ok(self
            .documents
            .iter()
            .take(top_k)
            .map(|content| RetrievedDocument {
                content: content.clone(),
                score: None,
                metadata: Map::new(),
            })
            .collect())
    }
}

/// Registry with echo and failing kinds plus fake llm and retrieval backends
pub fn test_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new()
        .with_llm_backend(Arc::new(FakeLlm))
        .with_retrieval_backend(Arc::new(FakeIndex {
            documents: vec!["revenue grew 12%".to_string(), "costs were flat".to_string()],
        }));
    registry
        .register_agent_type("echo", build_echo)
        .expect("echo is not built in");
    registry
        .register_agent_type("failing", build_failing)
        .expect("failing is not built in");
    registry
}

pub async fn read_json_output(file_path: &Path) -> Result<Value, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(file_path).await?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_document_shape() {
        let builder = TestWorkflowBuilder::new("doc")
            .task(TestTask::new("a", "echo").param("text", "hi").priority(3))
            .task(TestTask::shell("b", "echo b").depends_on("a").retries(2))
            .edge("a", "b");

        let value = builder.to_value();
        assert_eq!(value["tasks"]["a"]["priority"], 3);
        assert_eq!(value["tasks"]["a"]["config"]["params"]["text"], "hi");
        assert_eq!(value["tasks"]["b"]["config"]["agent_config"]["command"], "sh");
        assert_eq!(value["dependencies"][0]["to"], "b");
        assert!(builder.to_yaml().contains("custom_task"));
    }

    #[test]
    fn test_environment_setup() {
        let env = TestEnvironment::new();
        assert!(env.path().exists());
        assert!(env
            .workflow_file("test")
            .to_string_lossy()
            .contains("test.yaml"));
    }
}
