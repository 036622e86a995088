// ABOUTME: Workflow engine coordinating ordered, sequential task dispatch
// ABOUTME: Resolves placeholders, invokes agents with retries and records results

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use super::context::{ExecutionContext, SharedMemory};
use super::error::Result;
use super::graph::{TaskGraph, TaskNode};
use super::manager::{FailurePolicy, TaskManager};
use super::placeholder::PlaceholderResolver;
use super::result::{TaskResult, WorkflowStatus};
use super::retry::{execute_with_retries, RetryPolicy};
use super::task::{Task, TaskStatus, DEFAULT_PRIORITY};
use crate::agents::AgentRegistry;

/// Hooks the engine consults between tasks
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    /// Checked before each dispatch; returning true ends the pass
    async fn should_stop(&self, _context: &ExecutionContext) -> bool {
        false
    }

    /// Called after each task's result has been recorded
    async fn task_finished(&self, _context: &ExecutionContext, _task_id: &str, _result: &TaskResult) {
    }
}

pub struct NoopObserver;

impl ExecutionObserver for NoopObserver {}

/// Scheduling attributes of a task beyond its graph node
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub name: Option<String>,
    pub priority: i64,
    pub retry_policy: Option<RetryPolicy>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            name: None,
            priority: DEFAULT_PRIORITY,
            retry_policy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: WorkflowStatus,
    pub results: IndexMap<String, TaskResult>,
}

pub struct WorkflowEngine {
    graph: TaskGraph,
    options: HashMap<String, TaskOptions>,
    agents: Arc<AgentRegistry>,
    memory: SharedMemory,
    retry_policy: RetryPolicy,
    failure_policy: FailurePolicy,
}

impl WorkflowEngine {
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self {
            graph: TaskGraph::new(),
            options: HashMap::new(),
            agents,
            memory: SharedMemory::new(),
            retry_policy: RetryPolicy::single(),
            failure_policy: FailurePolicy::ContinueOnFailure,
        }
    }

    pub fn with_shared_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = memory;
        self
    }

    /// Policy for tasks that do not declare their own retry count
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn add_task(
        &mut self,
        task_id: impl Into<String>,
        executor_type: impl Into<String>,
        config: Map<String, Value>,
    ) {
        self.add_task_with(task_id, executor_type, config, TaskOptions::default());
    }

    pub fn add_task_with(
        &mut self,
        task_id: impl Into<String>,
        executor_type: impl Into<String>,
        config: Map<String, Value>,
        options: TaskOptions,
    ) {
        let task_id = task_id.into();
        self.graph.add_node(task_id.clone(), executor_type, config);
        self.options.insert(task_id, options);
    }

    pub fn add_dependency(&mut self, from: &str, to: &str) -> Result<()> {
        self.graph.add_edge(from, to)
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    fn retry_policy_for(&self, task_id: &str) -> &RetryPolicy {
        self.options
            .get(task_id)
            .and_then(|options| options.retry_policy.as_ref())
            .unwrap_or(&self.retry_policy)
    }

    /// A fresh task manager holding every graph node, in insertion order
    pub fn build_task_manager(&self) -> TaskManager {
        let manager = TaskManager::with_failure_policy(self.failure_policy);

        for node in self.graph.nodes() {
            let options = self.options.get(&node.task_id).cloned().unwrap_or_default();
            let task = Task::new(
                node.task_id.clone(),
                options.name.unwrap_or_else(|| node.task_id.clone()),
            )
            .with_priority(options.priority)
            .with_dependencies(self.graph.dependencies(&node.task_id))
            .with_metadata("executor_type", Value::String(node.executor_type.clone()));

            if let Err(e) = manager.add_task(task) {
                warn!("Skipping task {}: {}", node.task_id, e);
            }
        }
        manager
    }

    /// Run the whole graph once with a fresh context and no observer
    pub async fn execute_workflow(&self) -> Result<IndexMap<String, TaskResult>> {
        let manager = self.build_task_manager();
        let mut context = ExecutionContext::new(uuid::Uuid::new_v4().to_string());
        let report = self.run(&manager, &mut context, &NoopObserver).await?;
        Ok(report.results)
    }

    /// Dispatch every runnable task in `manager`, one at a time.
    /// A cycle in the graph aborts the pass before anything runs.
    #[instrument(skip(self, manager, context, observer), fields(workflow_id = %context.workflow_id))]
    pub async fn run(
        &self,
        manager: &TaskManager,
        context: &mut ExecutionContext,
        observer: &dyn ExecutionObserver,
    ) -> Result<RunReport> {
        let order = self.graph.topological_order()?;
        let total = order.len();
        let mut finished = context.results().len();
        info!(
            "Starting workflow {} with {} tasks ({} already finished)",
            context.workflow_id, total, finished
        );

        let start_time = Instant::now();
        loop {
            if observer.should_stop(context).await {
                info!("Workflow {} stopped", context.workflow_id);
                return Ok(RunReport {
                    status: WorkflowStatus::Stopped,
                    results: context.results().clone(),
                });
            }

            let Some(task) = manager.get_next_task() else {
                break;
            };
            manager.update_task_status(&task.id, TaskStatus::InProgress)?;

            let policy = self.retry_policy_for(&task.id).clone();
            let result = self.execute_task_with_retries(&task.id, context, &policy).await;
            let status = if result.is_success() {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            manager.update_task_status(&task.id, status)?;

            self.record_result(context, &task.id, result.clone()).await;
            observer.task_finished(context, &task.id, &result).await;

            finished += 1;
            if total > 0 {
                info!(
                    "Progress: {:.2}% ({}/{})",
                    finished as f64 / total as f64 * 100.0,
                    finished,
                    total
                );
            }
        }

        self.record_blocked_tasks(manager, context).await?;

        info!(
            "Workflow {} completed in {:?}",
            context.workflow_id,
            start_time.elapsed()
        );
        Ok(RunReport {
            status: WorkflowStatus::Completed,
            results: context.results().clone(),
        })
    }

    /// Under the strict policy, dependents of failed tasks never become
    /// ready. They are recorded as errors naming the failed prerequisite.
    async fn record_blocked_tasks(
        &self,
        manager: &TaskManager,
        context: &mut ExecutionContext,
    ) -> Result<()> {
        for task_id in manager.waiting_tasks() {
            let blocker = self
                .graph
                .dependencies(&task_id)
                .into_iter()
                .find(|dep| manager.task(dep).is_some_and(|t| t.status != TaskStatus::Completed))
                .unwrap_or_else(|| "unknown".to_string());

            let result = TaskResult::error(format!(
                "Task {} not executed: upstream task {} did not complete",
                task_id, blocker
            ))
            .with_metadata("task_id", task_id.clone())
            .with_metadata("blocked_by", blocker);

            manager.update_task_status(&task_id, TaskStatus::Failed)?;
            self.record_result(context, &task_id, result).await;
        }
        Ok(())
    }

    /// Resolve the task's placeholders once, then run attempts under
    /// `policy` against that resolved config
    pub async fn execute_task_with_retries(
        &self,
        task_id: &str,
        context: &ExecutionContext,
        policy: &RetryPolicy,
    ) -> TaskResult {
        let started = Instant::now();
        let mut result = match self.graph.node(task_id) {
            None => TaskResult::error(format!("Task {} is not part of the workflow", task_id)),
            Some(node) => {
                let config = PlaceholderResolver::new(context.results()).resolve_config(&node.config);
                execute_with_retries(task_id, policy, |_| self.attempt(task_id, node, &config)).await
            }
        };

        result.add_metadata("task_id", task_id);
        result.add_metadata("duration_ms", started.elapsed().as_millis() as u64);
        result
    }

    /// A single attempt with placeholders resolved against `context`.
    /// Never fails; problems become error results.
    pub async fn execute_task(&self, task_id: &str, context: &ExecutionContext) -> TaskResult {
        let Some(node) = self.graph.node(task_id) else {
            return TaskResult::error(format!("Task {} is not part of the workflow", task_id));
        };
        let config = PlaceholderResolver::new(context.results()).resolve_config(&node.config);
        self.attempt(task_id, node, &config).await
    }

    /// Build the agent and run it with the resolved `params`
    async fn attempt(&self, task_id: &str, node: &TaskNode, config: &Map<String, Value>) -> TaskResult {
        info!("Executing task: {} (type: {})", task_id, node.executor_type);
        let params = config
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let result = match self.agents.create_agent(&node.executor_type, config) {
            None => TaskResult::error(format!(
                "Failed to initialize {} agent for task {}",
                node.executor_type, task_id
            )),
            Some(agent) => match agent.execute(&params).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error executing task {}: {}", task_id, e);
                    TaskResult::error(format!("Error executing task {}: {}", task_id, e))
                }
            },
        };

        result
            .with_metadata("executor_type", node.executor_type.clone())
            .with_metadata("input", Value::Object(config.clone()))
    }

    async fn record_result(&self, context: &mut ExecutionContext, task_id: &str, result: TaskResult) {
        if !result.is_success() {
            let message = result.message.clone().unwrap_or_default();
            warn!("Task {} failed: {}", task_id, message);
            self.memory
                .add_entry(format!("{}_error", task_id), Value::String(message))
                .await;
        }

        match serde_json::to_value(&result) {
            Ok(value) => self.memory.add_entry(task_id, value).await,
            Err(e) => error!("Could not mirror result of {} to shared memory: {}", task_id, e),
        }
        context.record_result(task_id, result);
    }
}
