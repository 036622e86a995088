// ABOUTME: Workflow builder facade creating, executing and tracking workflow runs
// ABOUTME: Wires configuration into the engine and checkpoints progress to state

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{error, info, warn};

use super::checkpoint::CheckpointObserver;
use super::error::{BuilderError, Result};
use crate::agents::AgentRegistry;
use crate::engine::{
    ExecutionContext, FailurePolicy, RetryPolicy, RunSummary, SharedMemory, Task, TaskManager,
    TaskOptions, TaskResult, TaskStatus, WorkflowEngine, WorkflowStatus,
};
use crate::parser::{ParserError, WorkflowConfig, WorkflowParser};
use crate::state::{StateManager, WorkflowRun};

/// Result of executing or resuming a workflow. Serialises either as the
/// task result map or as `{"error": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Results(IndexMap<String, TaskResult>),
    Error { error: String },
}

impl ExecutionOutcome {
    pub fn results(&self) -> Option<&IndexMap<String, TaskResult>> {
        match self {
            ExecutionOutcome::Results(results) => Some(results),
            ExecutionOutcome::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Results(_) => None,
            ExecutionOutcome::Error { error } => Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionOutcome::Error { .. })
    }
}

impl From<Result<IndexMap<String, TaskResult>>> for ExecutionOutcome {
    fn from(result: Result<IndexMap<String, TaskResult>>) -> Self {
        match result {
            Ok(results) => ExecutionOutcome::Results(results),
            Err(e) => ExecutionOutcome::Error {
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatusInfo {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub results: IndexMap<String, TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StatusReport {
    Found(WorkflowStatusInfo),
    Error { error: String },
}

impl StatusReport {
    pub fn info(&self) -> Option<&WorkflowStatusInfo> {
        match self {
            StatusReport::Found(info) => Some(info),
            StatusReport::Error { .. } => None,
        }
    }

    pub fn status(&self) -> Option<WorkflowStatus> {
        self.info().map(|info| info.status)
    }
}

/// Engine and task manager built for one workflow id
struct PreparedRun {
    engine: WorkflowEngine,
    manager: TaskManager,
}

pub struct WorkflowBuilder {
    agents: Arc<AgentRegistry>,
    state: Arc<StateManager>,
    memory: SharedMemory,
    retry_policy: RetryPolicy,
    failure_policy: FailurePolicy,
    strict_validation: bool,
    prepared: Mutex<HashMap<String, Arc<PreparedRun>>>,
}

/// Failed tasks and everything downstream of them
fn stale_tasks(engine: &WorkflowEngine, results: &IndexMap<String, TaskResult>) -> HashSet<String> {
    let mut stale: HashSet<String> = results
        .iter()
        .filter(|(_, result)| !result.is_success())
        .map(|(task_id, _)| task_id.clone())
        .collect();

    let mut pending: Vec<String> = stale.iter().cloned().collect();
    while let Some(task_id) = pending.pop() {
        for dependent in engine.graph().dependents(&task_id) {
            if stale.insert(dependent.clone()) {
                pending.push(dependent);
            }
        }
    }
    stale
}

fn lift_parser_error(error: ParserError) -> BuilderError {
    match error {
        ParserError::ValidationError(e) => BuilderError::Validation(e),
        other => BuilderError::Parser(other),
    }
}

impl WorkflowBuilder {
    pub fn new(agents: Arc<AgentRegistry>, state: Arc<StateManager>) -> Self {
        Self {
            agents,
            state,
            memory: SharedMemory::new(),
            retry_policy: RetryPolicy::single(),
            failure_policy: FailurePolicy::ContinueOnFailure,
            strict_validation: true,
            prepared: Mutex::new(HashMap::new()),
        }
    }

    /// Policy for tasks that do not set `retries`
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// When enabled, cycles are rejected at creation instead of at execution
    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }

    pub fn with_shared_memory(mut self, memory: SharedMemory) -> Self {
        self.memory = memory;
        self
    }

    pub fn state(&self) -> &Arc<StateManager> {
        &self.state
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    fn prepared_runs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<PreparedRun>>> {
        self.prepared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a workflow and return its id, or an empty string when the
    /// configuration is rejected
    pub async fn create_workflow(&self, config: &Value) -> String {
        match self.try_create_workflow(config).await {
            Ok(workflow_id) => workflow_id,
            Err(e) => {
                error!("Error creating workflow: {}", e);
                String::new()
            }
        }
    }

    pub async fn try_create_workflow(&self, config: &Value) -> Result<String> {
        let config = WorkflowConfig::from_value(config.clone()).map_err(lift_parser_error)?;
        self.create_from_config(&config).await
    }

    /// Parse a YAML or JSON workflow file and create a workflow from it
    pub async fn create_from_file<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let document = WorkflowParser::load_document(path)
            .await
            .map_err(lift_parser_error)?;
        self.try_create_workflow(&document).await
    }

    pub async fn create_from_config(&self, config: &WorkflowConfig) -> Result<String> {
        if self.strict_validation {
            TaskManager::validate_dependencies(config)?;
        }

        let workflow_id = uuid::Uuid::new_v4().to_string();
        let prepared = self.prepare(config)?;
        self.prepared_runs()
            .insert(workflow_id.clone(), Arc::new(prepared));

        let mut run = WorkflowRun::new(workflow_id.clone(), config.to_value());
        if !self.state.save_state(&workflow_id, &mut run).await {
            warn!("Workflow {} created but not persisted", workflow_id);
        }

        info!(
            "Created workflow {} with {} tasks",
            workflow_id,
            config.tasks.len()
        );
        Ok(workflow_id)
    }

    /// Build the engine graph and a fresh task manager for a configuration
    fn prepare(&self, config: &WorkflowConfig) -> Result<PreparedRun> {
        let mut engine = WorkflowEngine::new(self.agents.clone())
            .with_shared_memory(self.memory.clone())
            .with_retry_policy(self.retry_policy.clone())
            .with_failure_policy(self.failure_policy);

        for (task_id, definition) in &config.tasks {
            let retry_policy = definition.retries.map(|retries| {
                RetryPolicy::fixed_delay(retries, definition.retry_delay.unwrap_or(Duration::ZERO))
            });
            let options = TaskOptions {
                name: definition.name.clone(),
                priority: definition.priority,
                retry_policy,
            };
            engine.add_task_with(
                task_id.clone(),
                definition.task_type.clone(),
                definition.config.clone(),
                options,
            );
        }

        for (from, to) in config.edges() {
            engine.add_dependency(&from, &to)?;
        }

        let manager = engine.build_task_manager();
        Ok(PreparedRun { engine, manager })
    }

    /// The prepared run for `workflow_id`, rebuilt from the persisted
    /// configuration when this process never prepared it
    fn prepared_run(&self, workflow_id: &str, run: &WorkflowRun) -> Result<Arc<PreparedRun>> {
        if let Some(prepared) = self.prepared_runs().get(workflow_id) {
            return Ok(prepared.clone());
        }
        self.rebuild(workflow_id, run)
    }

    fn rebuild(&self, workflow_id: &str, run: &WorkflowRun) -> Result<Arc<PreparedRun>> {
        let config = WorkflowConfig::from_value(run.config.clone()).map_err(lift_parser_error)?;
        let prepared = Arc::new(self.prepare(&config)?);
        self.prepared_runs()
            .insert(workflow_id.to_string(), prepared.clone());
        Ok(prepared)
    }

    pub async fn execute_workflow(&self, workflow_id: &str) -> ExecutionOutcome {
        self.try_execute_workflow(workflow_id).await.into()
    }

    /// Run a freshly created workflow to completion
    pub async fn try_execute_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<IndexMap<String, TaskResult>> {
        let run = self
            .state
            .load_state(workflow_id)
            .await
            .ok_or_else(|| BuilderError::NotFound(workflow_id.to_string()))?;

        if run.status != WorkflowStatus::Created {
            return Err(BuilderError::InvalidState {
                workflow_id: workflow_id.to_string(),
                status: run.status,
            });
        }

        let prepared = match self.prepared_run(workflow_id, &run) {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail_run(workflow_id, e).await),
        };

        self.state
            .update_state(workflow_id, |run| {
                run.status = WorkflowStatus::Running;
                run.results.clear();
                run.error = None;
            })
            .await;

        let context = ExecutionContext::new(workflow_id);
        self.drive(workflow_id, &prepared, context).await
    }

    /// Continue a workflow that stopped, failed or was interrupted. Tasks
    /// with a persisted success are skipped and their results stay
    /// available to placeholders. Failed tasks run again, along with
    /// everything downstream of them.
    pub async fn resume_workflow(&self, workflow_id: &str) -> ExecutionOutcome {
        self.try_resume_workflow(workflow_id).await.into()
    }

    pub async fn try_resume_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<IndexMap<String, TaskResult>> {
        let run = self
            .state
            .load_state(workflow_id)
            .await
            .ok_or_else(|| BuilderError::NotFound(workflow_id.to_string()))?;

        if run.status == WorkflowStatus::Completed {
            return Err(BuilderError::InvalidState {
                workflow_id: workflow_id.to_string(),
                status: run.status,
            });
        }

        let prepared = match self.rebuild(workflow_id, &run) {
            Ok(prepared) => prepared,
            Err(e) => return Err(self.fail_run(workflow_id, e).await),
        };

        let stale = stale_tasks(&prepared.engine, &run.results);
        let mut finished = IndexMap::new();
        for (task_id, result) in &run.results {
            if prepared.manager.task(task_id).is_none() {
                continue;
            }
            let status = if !result.is_success() {
                TaskStatus::Failed
            } else if stale.contains(task_id) {
                // Upstream runs again, so this one must see the new inputs
                continue;
            } else {
                finished.insert(task_id.clone(), result.clone());
                TaskStatus::Completed
            };
            if let Err(e) = prepared.manager.update_task_status(task_id, status) {
                warn!("Cannot restore status of task {}: {}", task_id, e);
            }
        }
        let retried = prepared.manager.retry_failed_tasks();
        info!(
            "Resuming workflow {}: {} tasks already done, {} to retry",
            workflow_id,
            finished.len(),
            retried.len()
        );

        let seeded = finished.clone();
        self.state
            .update_state(workflow_id, move |run| {
                run.status = WorkflowStatus::Running;
                run.results = seeded;
                run.error = None;
            })
            .await;

        let context = ExecutionContext::new(workflow_id).with_results(finished);
        self.drive(workflow_id, &prepared, context).await
    }

    /// Dispatch the prepared run and write the final checkpoint. A stop
    /// requested during the pass is kept as the final status.
    async fn drive(
        &self,
        workflow_id: &str,
        prepared: &PreparedRun,
        mut context: ExecutionContext,
    ) -> Result<IndexMap<String, TaskResult>> {
        let observer = CheckpointObserver::new(self.state.clone(), workflow_id);

        match prepared
            .engine
            .run(&prepared.manager, &mut context, &observer)
            .await
        {
            Ok(report) => {
                let results = report.results.clone();
                let final_status = self
                    .state
                    .update_state(workflow_id, move |run| {
                        run.results = report.results;
                        if run.status != WorkflowStatus::Stopped {
                            run.status = report.status;
                        }
                        run.status
                    })
                    .await;
                info!(
                    "Workflow {} finished with status {}",
                    workflow_id,
                    final_status.unwrap_or(report.status)
                );
                Ok(results)
            }
            Err(e) => Err(self.fail_run(workflow_id, e.into()).await),
        }
    }

    async fn fail_run(&self, workflow_id: &str, error: BuilderError) -> BuilderError {
        let message = error.to_string();
        error!("Workflow {} failed: {}", workflow_id, message);
        self.memory
            .add_entry("workflow_execution_error", Value::String(message.clone()))
            .await;
        self.state
            .update_state(workflow_id, move |run| run.fail(message))
            .await;
        error
    }

    /// Mark a running workflow stopped. The engine notices before its next
    /// dispatch.
    pub async fn stop_workflow(&self, workflow_id: &str) -> bool {
        let Some(run) = self.state.load_state(workflow_id).await else {
            warn!("Cannot stop workflow {}: not found", workflow_id);
            self.memory
                .add_entry(
                    "workflow_stop_error",
                    Value::String(format!("Workflow {} not found", workflow_id)),
                )
                .await;
            return false;
        };
        if run.status != WorkflowStatus::Running {
            return false;
        }

        let stopped = self
            .state
            .update_state(workflow_id, |run| {
                if run.status == WorkflowStatus::Running {
                    run.status = WorkflowStatus::Stopped;
                    true
                } else {
                    false
                }
            })
            .await
            .unwrap_or(false);
        if stopped {
            info!("Stop requested for workflow {}", workflow_id);
        }
        stopped
    }

    pub async fn delete_workflow(&self, workflow_id: &str) -> bool {
        if self.state.load_state(workflow_id).await.is_none() {
            return false;
        }
        self.prepared_runs().remove(workflow_id);
        self.state.delete_state(workflow_id).await
    }

    pub async fn get_workflow_status(&self, workflow_id: &str) -> StatusReport {
        match self.state.load_state(workflow_id).await {
            Some(run) => StatusReport::Found(WorkflowStatusInfo {
                summary: run.summary(),
                workflow_id: run.workflow_id,
                status: run.status,
                created_at: run.created_at,
                last_updated: run.last_updated,
                results: run.results,
                error: run.error,
            }),
            None => {
                let error = format!("Workflow {} not found", workflow_id);
                self.memory
                    .add_entry("workflow_status_error", Value::String(error.clone()))
                    .await;
                StatusReport::Error { error }
            }
        }
    }

    /// Release per-run resources: shared memory and the run's task manager
    pub async fn finalize_workflow(&self, workflow_id: &str) {
        self.memory.clear().await;
        if let Some(prepared) = self.prepared_runs().remove(workflow_id) {
            prepared.manager.clear();
        }
        info!("Workflow {} finalized", workflow_id);
    }

    /// Snapshot of the scheduler's view of a prepared workflow
    pub fn workflow_tasks(&self, workflow_id: &str) -> Option<Vec<Task>> {
        self.prepared_runs()
            .get(workflow_id)
            .map(|prepared| prepared.manager.list_tasks())
    }

    pub async fn list_workflows(&self) -> Vec<String> {
        self.state.list_workflows().await
    }

    pub async fn repair_workflow(&self, workflow_id: &str) -> bool {
        self.state.validate_and_repair_state(workflow_id).await
    }
}
