// ABOUTME: Command implementations for the dagflow CLI
// ABOUTME: Handles run, validate, status, stop, delete, resume, list, repair and init

use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::config::Config;
use crate::agents::{AgentRegistry, OpenAiCompatibleBackend};
use crate::engine::{RetryPolicy, RunSummary, TaskResult, WorkflowStatus};
use crate::orchestrator::{StatusReport, WorkflowBuilder};
use crate::parser::{WorkflowConfig, WorkflowParser, WorkflowValidator};
use crate::state::StateManager;

/// Agent registry with the backends named in the configuration
pub fn agent_registry(config: &Config) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    if let Some(llm) = &config.llm {
        let api_key = std::env::var(&llm.api_key_env).ok();
        let backend = OpenAiCompatibleBackend::new(llm.base_url.clone(), api_key, llm.model.clone())?;
        registry = registry.with_llm_backend(Arc::new(backend));
        info!("LLM backend: {} ({})", llm.base_url, llm.model);
    }
    Ok(registry)
}

/// Workflow builder over the configured state directory
pub fn workflow_builder(config: &Config, retries: Option<u32>) -> Result<WorkflowBuilder> {
    let state = StateManager::new(&config.state_dir)?;
    let attempts = retries.unwrap_or(config.default_retries).max(1);
    let retry_policy =
        RetryPolicy::fixed_delay(attempts, Duration::from_millis(config.retry_delay_ms));

    Ok(
        WorkflowBuilder::new(Arc::new(agent_registry(config)?), Arc::new(state))
            .with_retry_policy(retry_policy)
            .with_failure_policy(config.failure_policy)
            .with_strict_validation(config.strict_validation),
    )
}

/// Execute a workflow command
pub async fn run_workflow(
    workflow_path: PathBuf,
    retries: Option<u32>,
    output: Option<PathBuf>,
    dry_run: bool,
    config: &Config,
) -> Result<()> {
    info!("Starting workflow execution: {}", workflow_path.display());

    let mut document = WorkflowParser::load_document(&workflow_path)
        .await
        .map_err(|e| anyhow!("Failed to parse workflow: {}", e))?;
    config.apply_agent_defaults(&mut document);

    if dry_run {
        let workflow = WorkflowConfig::from_value(document)
            .map_err(|e| anyhow!("Workflow validation failed: {}", e))?;
        let order = check_workflow(&workflow, config)?;
        println!("✓ Dry run: workflow is valid");
        println!("  Execution order: {}", order.join(" -> "));
        return Ok(());
    }

    let builder = workflow_builder(config, retries)?;
    let workflow_id = builder
        .try_create_workflow(&document)
        .await
        .map_err(|e| anyhow!("Failed to create workflow: {}", e))?;
    println!("Workflow id: {}", workflow_id);

    let results = builder
        .try_execute_workflow(&workflow_id)
        .await
        .map_err(|e| anyhow!("Workflow execution failed: {}", e))?;
    let status = builder
        .get_workflow_status(&workflow_id)
        .await
        .status()
        .unwrap_or(WorkflowStatus::Failed);

    report_results(&workflow_id, status, &results, output.as_deref())?;
    builder.finalize_workflow(&workflow_id).await;
    finish(status, &results)
}

/// Resume a workflow from its persisted state
pub async fn resume_workflow(
    workflow_id: String,
    output: Option<PathBuf>,
    config: &Config,
) -> Result<()> {
    let builder = workflow_builder(config, None)?;
    let results = builder
        .try_resume_workflow(&workflow_id)
        .await
        .map_err(|e| anyhow!("Cannot resume workflow: {}", e))?;
    let status = builder
        .get_workflow_status(&workflow_id)
        .await
        .status()
        .unwrap_or(WorkflowStatus::Failed);

    report_results(&workflow_id, status, &results, output.as_deref())?;
    builder.finalize_workflow(&workflow_id).await;
    finish(status, &results)
}

fn report_results(
    workflow_id: &str,
    status: WorkflowStatus,
    results: &IndexMap<String, TaskResult>,
    output: Option<&Path>,
) -> Result<()> {
    if let Some(output_path) = output {
        let json_content = serde_json::to_string_pretty(results)
            .map_err(|e| anyhow!("Failed to serialize results to JSON: {}", e))?;
        std::fs::write(output_path, json_content).map_err(|e| {
            anyhow!(
                "Failed to write output file '{}': {}",
                output_path.display(),
                e
            )
        })?;
        info!("Results written to: {}", output_path.display());
    }

    println!("Workflow '{}' finished with status: {}", workflow_id, status);
    for (task_id, result) in results {
        println!("  Task '{}': {}", task_id, result.status);
        if let Some(ref text) = result.output {
            println!("    Output: {}", text.trim());
        }
        if let Some(ref message) = result.message {
            println!("    Error: {}", message);
        }
    }

    let summary = RunSummary::from_results(results);
    println!(
        "  {}/{} tasks succeeded ({:.1}%)",
        summary.successful_tasks, summary.total_tasks, summary.success_rate
    );
    Ok(())
}

// Non-zero exit unless every task succeeded and the run completed
fn finish(status: WorkflowStatus, results: &IndexMap<String, TaskResult>) -> Result<()> {
    if status != WorkflowStatus::Completed {
        return Err(anyhow!("Workflow finished with status: {}", status));
    }
    let failed: Vec<&String> = results
        .iter()
        .filter(|(_, result)| !result.is_success())
        .map(|(task_id, _)| task_id)
        .collect();
    if !failed.is_empty() {
        return Err(anyhow!("Tasks failed: {:?}", failed));
    }
    Ok(())
}

fn check_workflow(workflow: &WorkflowConfig, config: &Config) -> Result<Vec<String>> {
    let registry = agent_registry(config)?;
    let report = WorkflowValidator::new()
        .with_agent_types(registry.agent_types())
        .validate(workflow);

    for warning in &report.warnings {
        println!("  Warning: {}", warning);
    }
    if report.has_errors() {
        let errors: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
        return Err(anyhow!("Workflow validation failed: {}", errors.join("; ")));
    }
    Ok(report.execution_order)
}

/// Validate a workflow file
pub async fn validate_workflow(workflow_path: PathBuf, config: &Config) -> Result<()> {
    info!("Validating workflow: {}", workflow_path.display());

    let workflow = WorkflowParser::parse_file(&workflow_path)
        .await
        .map_err(|e| anyhow!("Workflow validation failed: {}", e))?;
    let order = check_workflow(&workflow, config)?;

    let label = workflow
        .name
        .clone()
        .unwrap_or_else(|| workflow_path.display().to_string());
    println!("✓ Workflow '{}' is valid", label);
    println!("  Tasks: {}", workflow.tasks.len());
    println!("  Dependencies: {}", workflow.edges().len());
    println!("  Execution order: {}", order.join(" -> "));

    info!("Workflow validation completed successfully");
    Ok(())
}

pub async fn show_status(workflow_id: String, config: &Config) -> Result<()> {
    let builder = workflow_builder(config, None)?;
    match builder.get_workflow_status(&workflow_id).await {
        StatusReport::Found(info) => {
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
        StatusReport::Error { error } => Err(anyhow!(error)),
    }
}

pub async fn stop_workflow(workflow_id: String, config: &Config) -> Result<()> {
    let builder = workflow_builder(config, None)?;
    if builder.stop_workflow(&workflow_id).await {
        println!("Stop requested for workflow {}", workflow_id);
        Ok(())
    } else {
        Err(anyhow!("Workflow {} is not running", workflow_id))
    }
}

pub async fn delete_workflow(workflow_id: String, config: &Config) -> Result<()> {
    let builder = workflow_builder(config, None)?;
    if builder.delete_workflow(&workflow_id).await {
        println!("Deleted workflow {}", workflow_id);
        Ok(())
    } else {
        Err(anyhow!("Workflow {} not found", workflow_id))
    }
}

pub async fn list_workflows(config: &Config) -> Result<()> {
    let builder = workflow_builder(config, None)?;
    for workflow_id in builder.list_workflows().await {
        match builder.get_workflow_status(&workflow_id).await.info() {
            Some(info) => println!("{}  {}  {}", workflow_id, info.status, info.last_updated),
            None => println!("{}  unreadable", workflow_id),
        }
    }
    Ok(())
}

pub async fn repair_workflow(workflow_id: String, config: &Config) -> Result<()> {
    let builder = workflow_builder(config, None)?;
    if builder.repair_workflow(&workflow_id).await {
        println!("State for workflow {} is valid", workflow_id);
        Ok(())
    } else {
        Err(anyhow!("State for workflow {} could not be repaired", workflow_id))
    }
}

/// Initialize a new workflow file
pub async fn init_workflow(name: String, output_dir: PathBuf) -> Result<()> {
    info!(
        "Initializing workflow '{}' in {}",
        name,
        output_dir.display()
    );

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir)?;
    }

    let workflow_file = output_dir.join(format!("{}.yaml", name));
    if workflow_file.exists() {
        return Err(anyhow!(
            "Workflow file already exists: {}",
            workflow_file.display()
        ));
    }

    std::fs::write(&workflow_file, starter_template(&name))?;
    println!("Created workflow file: {}", workflow_file.display());
    Ok(())
}

fn starter_template(name: &str) -> String {
    format!(
        r#"name: {name}
description: Starter workflow with two chained tasks

tasks:
  gather:
    type: custom_task
    priority: 2
    config:
      agent_config:
        command: echo
        args: ["hello from {name}"]

  report:
    type: custom_task
    retries: 2
    config:
      agent_config:
        command: cat
      params:
        summary: "gathered: {{{{gather.output}}}}"

dependencies:
  - from: gather
    to: report
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starter_template_is_valid() {
        let workflow = WorkflowConfig::from_yaml(&starter_template("demo")).unwrap();
        assert_eq!(workflow.name.as_deref(), Some("demo"));
        assert_eq!(workflow.edges(), vec![("gather".to_string(), "report".to_string())]);

        let report = WorkflowValidator::new().validate(&workflow);
        assert!(report.is_valid);
        assert!(report.warnings.is_empty());
        assert_eq!(report.execution_order, vec!["gather", "report"]);
    }

    #[test]
    fn test_finish_requires_all_success() {
        let mut results = IndexMap::new();
        results.insert("a".to_string(), TaskResult::success("ok"));
        assert!(finish(WorkflowStatus::Completed, &results).is_ok());
        assert!(finish(WorkflowStatus::Stopped, &results).is_err());

        results.insert("b".to_string(), TaskResult::error("boom"));
        assert!(finish(WorkflowStatus::Completed, &results).is_err());
    }
}
