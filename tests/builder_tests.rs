// ABOUTME: End-to-end tests of the workflow builder facade
// ABOUTME: Creates, executes, stops, resumes and deletes workflows against temp state dirs

use serde_json::json;
use std::sync::Arc;

use dagflow::engine::{FailurePolicy, WorkflowStatus, UNRESOLVED};
use dagflow::orchestrator::{BuilderError, ExecutionOutcome, StatusReport, WorkflowBuilder};

mod common;
use common::{test_registry, FlakyBuilder, StopRequestBuilder, TestEnvironment, TestTask, TestWorkflowBuilder};

fn ingest_analyze() -> TestWorkflowBuilder {
    TestWorkflowBuilder::new("research")
        .task(TestTask::new("ingest", "data_retrieval").param("query", "quarterly revenue"))
        .task(TestTask::new("analyze", "llm").param("prompt", "Analyze: {{ingest.output}}"))
        .edge("ingest", "analyze")
}

#[tokio::test]
async fn test_ingest_then_analyze() {
    let env = TestEnvironment::new();
    let builder = env.workflow_builder(test_registry());

    let workflow_id = builder.create_workflow(&ingest_analyze().to_value()).await;
    assert!(!workflow_id.is_empty());

    let outcome = builder.execute_workflow(&workflow_id).await;
    let results = outcome.results().expect("workflow executes");
    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["ingest", "analyze"]);

    let ingest_output = results["ingest"].output.clone().unwrap();
    let prompt = results["analyze"].metadata["input"]["params"]["prompt"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(prompt.contains(&ingest_output));
    assert!(!prompt.contains(UNRESOLVED));

    let reopened = env.state_manager();
    let stored = reopened.load_state(&workflow_id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
    assert_eq!(stored.results.len(), 2);
}

#[tokio::test]
async fn test_cycle_writes_failed_checkpoint() {
    let env = TestEnvironment::new();
    let builder = env
        .workflow_builder(test_registry())
        .with_strict_validation(false);

    let document = TestWorkflowBuilder::new("loop")
        .task(TestTask::new("a", "echo"))
        .task(TestTask::new("b", "echo"))
        .edge("a", "b")
        .edge("b", "a")
        .to_value();

    let workflow_id = builder.create_workflow(&document).await;
    assert!(!workflow_id.is_empty());

    let outcome = builder.execute_workflow(&workflow_id).await;
    let error = outcome.error().expect("cycle fails the run");
    assert!(error.contains("Circular dependency"));
    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({ "error": error })
    );

    let status = builder.get_workflow_status(&workflow_id).await;
    let info = status.info().unwrap();
    assert_eq!(info.status, WorkflowStatus::Failed);
    assert!(info.error.as_deref().unwrap().contains("Circular dependency"));
    assert!(info.results.is_empty());
}

#[tokio::test]
async fn test_strict_validation_rejects_cycle_at_creation() {
    let env = TestEnvironment::new();
    let builder = env.workflow_builder(test_registry());

    let document = TestWorkflowBuilder::new("loop")
        .task(TestTask::new("a", "echo").depends_on("b"))
        .task(TestTask::new("b", "echo").depends_on("a"))
        .to_value();

    assert_eq!(builder.create_workflow(&document).await, "");
    assert!(matches!(
        builder.try_create_workflow(&document).await,
        Err(BuilderError::Validation(_))
    ));
    assert!(builder.list_workflows().await.is_empty());
}

#[tokio::test]
async fn test_missing_dependencies_field_is_rejected() {
    let env = TestEnvironment::new();
    let builder = env.workflow_builder(test_registry());

    let id = builder
        .create_workflow(&json!({"tasks": {"a": {"type": "echo"}}}))
        .await;
    assert_eq!(id, "");
}

#[tokio::test]
async fn test_stop_takes_effect_at_next_boundary() {
    let env = TestEnvironment::new();
    let state = env.state_manager();
    let mut registry = test_registry();
    registry
        .register_agent_type(
            "stopper",
            StopRequestBuilder {
                state: state.clone(),
            },
        )
        .unwrap();
    let builder = WorkflowBuilder::new(Arc::new(registry), state.clone());

    let document = TestWorkflowBuilder::new("halting")
        .task(TestTask::new("first", "stopper"))
        .task(TestTask::new("second", "echo").param("text", "never"))
        .task(TestTask::new("third", "echo").param("text", "never"))
        .edge("first", "second")
        .edge("second", "third")
        .to_value();

    let workflow_id = builder.create_workflow(&document).await;
    let outcome = builder.execute_workflow(&workflow_id).await;
    let results = outcome.results().unwrap();
    assert_eq!(results.keys().collect::<Vec<_>>(), vec!["first"]);

    let stored = state.load_state(&workflow_id).await.unwrap();
    assert_eq!(stored.status, WorkflowStatus::Stopped);
    assert!(stored.results.contains_key("first"));

    // A stopped run picks up where it left off
    let resumed = builder.resume_workflow(&workflow_id).await;
    let results = resumed.results().unwrap();
    assert_eq!(
        results.keys().collect::<Vec<_>>(),
        vec!["first", "second", "third"]
    );
    assert_eq!(
        state.load_state(&workflow_id).await.unwrap().status,
        WorkflowStatus::Completed
    );
}

#[tokio::test]
async fn test_resume_after_restart_reruns_only_failures() {
    let env = TestEnvironment::new();
    let flaky = FlakyBuilder::failing(1);
    let document = TestWorkflowBuilder::new("recover")
        .task(TestTask::new("load", "echo").param("text", "rows=42"))
        .task(TestTask::new("transform", "flaky"))
        .task(
            TestTask::new("summarize", "echo")
                .param("text", "{{load.output}} / {{transform.output}}"),
        )
        .edge("load", "transform")
        .edge("transform", "summarize")
        .to_value();

    let workflow_id = {
        let mut registry = test_registry();
        registry.register_agent_type("flaky", flaky.clone()).unwrap();
        let builder = env.workflow_builder(registry);
        let workflow_id = builder.create_workflow(&document).await;
        let results = builder.execute_workflow(&workflow_id).await;
        let results = results.results().unwrap();
        assert!(!results["transform"].is_success());
        assert!(results["summarize"]
            .output
            .as_deref()
            .unwrap()
            .contains(UNRESOLVED));
        workflow_id
    };
    assert_eq!(flaky.calls(), 1);

    // The process died before the final checkpoint
    env.state_manager()
        .update_state(&workflow_id, |run| run.status = WorkflowStatus::Running)
        .await
        .unwrap();

    // A new process: fresh builder, cold state cache
    let mut registry = test_registry();
    registry.register_agent_type("flaky", flaky.clone()).unwrap();
    let builder = env.workflow_builder(registry);

    let outcome = builder.resume_workflow(&workflow_id).await;
    let results = outcome.results().unwrap();
    assert!(results["load"].is_success());
    assert!(results["transform"].is_success());
    assert_eq!(flaky.calls(), 2);
    assert_eq!(
        results["summarize"].output.as_deref(),
        Some("rows=42 / succeeded on call 2")
    );

    let completed = builder.resume_workflow(&workflow_id).await;
    assert!(completed.error().unwrap().contains("completed"));
}

#[tokio::test]
async fn test_task_retries_from_config() {
    let env = TestEnvironment::new();
    let flaky = FlakyBuilder::failing(2);
    let mut registry = test_registry();
    registry.register_agent_type("flaky", flaky.clone()).unwrap();
    let builder = env.workflow_builder(registry);

    let document = TestWorkflowBuilder::new("retrying")
        .task(TestTask::new("unstable", "flaky").retries(3))
        .to_value();
    let workflow_id = builder.create_workflow(&document).await;

    let outcome = builder.execute_workflow(&workflow_id).await;
    let result = &outcome.results().unwrap()["unstable"];
    assert!(result.is_success());
    assert_eq!(result.metadata["attempts"], 3);
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test]
async fn test_strict_failure_policy_blocks_dependents() {
    let env = TestEnvironment::new();
    let builder = env
        .workflow_builder(test_registry())
        .with_failure_policy(FailurePolicy::Strict);

    let document = TestWorkflowBuilder::new("strict")
        .task(TestTask::new("broken", "failing"))
        .task(TestTask::new("after", "echo").param("text", "unreachable"))
        .edge("broken", "after")
        .to_value();
    let workflow_id = builder.create_workflow(&document).await;

    let outcome = builder.execute_workflow(&workflow_id).await;
    let results = outcome.results().unwrap();
    assert!(results["after"]
        .message
        .as_deref()
        .unwrap()
        .contains("broken"));
}

#[tokio::test]
async fn test_status_delete_and_finalize() {
    let env = TestEnvironment::new();
    let builder = env.workflow_builder(test_registry());

    let document = TestWorkflowBuilder::new("lifecycle")
        .task(TestTask::new("ok", "echo").param("text", "fine"))
        .task(TestTask::new("bad", "failing"))
        .to_value();
    let workflow_id = builder.create_workflow(&document).await;
    builder.execute_workflow(&workflow_id).await;

    match builder.get_workflow_status(&workflow_id).await {
        StatusReport::Found(info) => {
            assert_eq!(info.status, WorkflowStatus::Completed);
            assert_eq!(info.summary.total_tasks, 2);
            assert_eq!(info.summary.failed_tasks, 1);
            let value = serde_json::to_value(&info).unwrap();
            assert_eq!(value["workflow_id"], workflow_id.as_str());
            assert_eq!(value["status"], "completed");
        }
        StatusReport::Error { error } => panic!("unexpected error: {}", error),
    }

    let again = builder.execute_workflow(&workflow_id).await;
    assert!(again.is_error());

    assert!(builder.memory().len().await > 0);
    builder.finalize_workflow(&workflow_id).await;
    assert_eq!(builder.memory().len().await, 0);
    assert!(builder.workflow_tasks(&workflow_id).is_none());

    assert!(builder.delete_workflow(&workflow_id).await);
    assert!(!env.state_dir().join(format!("{}.json", workflow_id)).exists());
    assert!(matches!(
        builder.get_workflow_status(&workflow_id).await,
        StatusReport::Error { .. }
    ));
    assert!(!builder.delete_workflow(&workflow_id).await);
}

#[tokio::test]
async fn test_outcome_serialises_as_result_map() {
    let env = TestEnvironment::new();
    let builder = env.workflow_builder(test_registry());
    let document = TestWorkflowBuilder::new("single")
        .task(TestTask::new("only", "echo").param("text", "hello"))
        .to_value();
    let workflow_id = builder.create_workflow(&document).await;

    let outcome: ExecutionOutcome = builder.execute_workflow(&workflow_id).await;
    let value = serde_json::to_value(&outcome).unwrap();
    assert_eq!(value["only"]["status"], "success");
    assert_eq!(value["only"]["output"], "hello");
}
