// ABOUTME: Integration tests for the dagflow command line application
// ABOUTME: Runs the built binary against temp directories and inspects its output

use std::path::Path;
use std::process::{Command, Output};

mod common;
use common::{read_json_output, TestEnvironment, TestTask, TestWorkflowBuilder};

fn dagflow(env: &TestEnvironment, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dagflow"))
        .args(args)
        .current_dir(env.path())
        .env("HOME", env.path())
        .env("DAGFLOW_STATE_DIR", env.state_dir())
        .env_remove("DAGFLOW_RETRIES")
        .output()
        .expect("Failed to execute command")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn workflow_id(output: &Output) -> String {
    stdout(output)
        .lines()
        .find_map(|line| line.strip_prefix("Workflow id: "))
        .expect("run prints the workflow id")
        .trim()
        .to_string()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

fn greeting_workflow() -> TestWorkflowBuilder {
    TestWorkflowBuilder::new("greeting")
        .task(TestTask::shell("hello", "echo hello"))
        .task(TestTask::shell("shout", "tr a-z A-Z").param("text", "{{hello.output}}"))
        .edge("hello", "shout")
}

#[test]
fn test_cli_help_command() {
    let env = TestEnvironment::new();
    let output = dagflow(&env, &["--help"]);

    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("dagflow") || text.contains("workflow"));
    assert!(text.contains("resume"));
}

#[test]
fn test_cli_version_command() {
    let env = TestEnvironment::new();
    let output = dagflow(&env, &["--version"]);

    assert!(output.status.success());
    assert!(stdout(&output).contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_init_then_validate() {
    let env = TestEnvironment::new();
    let output = dagflow(&env, &["init", "starter"]);
    assert!(output.status.success());
    assert!(env.path().join("starter.yaml").exists());

    let output = dagflow(&env, &["validate", "starter.yaml"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("is valid"));
    assert!(text.contains("gather -> report"));

    // A second init refuses to overwrite
    let output = dagflow(&env, &["init", "starter"]);
    assert!(!output.status.success());
}

#[tokio::test]
async fn test_cli_run_writes_output_and_state() {
    let env = TestEnvironment::new();
    let workflow_file = env.create_workflow_file("greeting", &greeting_workflow()).await;
    let output_file = env.output_file("greeting");

    let output = dagflow(
        &env,
        &[
            "run",
            path_arg(&workflow_file),
            "--output",
            path_arg(&output_file),
        ],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let id = workflow_id(&output);
    assert!(stdout(&output).contains("finished with status: completed"));

    let results = read_json_output(&output_file).await.unwrap();
    assert_eq!(results["hello"]["status"], "success");
    assert_eq!(results["hello"]["output"], "hello");
    assert_eq!(results["shout"]["status"], "success");
    assert!(results["shout"]["output"]
        .as_str()
        .unwrap()
        .contains("HELLO"));

    assert!(env.state_dir().join(format!("{}.json", id)).exists());

    let status = dagflow(&env, &["status", &id]);
    assert!(status.status.success());
    let info: serde_json::Value = serde_json::from_slice(&status.stdout).unwrap();
    assert_eq!(info["status"], "completed");
    assert_eq!(info["summary"]["total_tasks"], 2);

    let list = dagflow(&env, &["list"]);
    assert!(stdout(&list).contains(&id));

    let delete = dagflow(&env, &["delete", &id]);
    assert!(delete.status.success());
    assert!(!env.state_dir().join(format!("{}.json", id)).exists());
    assert!(!dagflow(&env, &["status", &id]).status.success());
}

#[tokio::test]
async fn test_cli_failing_task_exits_non_zero() {
    let env = TestEnvironment::new();
    let builder = TestWorkflowBuilder::new("broken")
        .task(TestTask::shell("fine", "echo ok"))
        .task(TestTask::shell("broken", "exit 3"));
    let workflow_file = env.create_workflow_file("broken", &builder).await;

    let output = dagflow(&env, &["run", path_arg(&workflow_file)]);
    assert!(!output.status.success());
    let text = stdout(&output);
    assert!(text.contains("Task 'fine': success"));
    assert!(text.contains("Task 'broken': error"));
}

#[tokio::test]
async fn test_cli_validate_rejects_cycle() {
    let env = TestEnvironment::new();
    let builder = TestWorkflowBuilder::new("loop")
        .task(TestTask::shell("a", "true"))
        .task(TestTask::shell("b", "true"))
        .edge("a", "b")
        .edge("b", "a");
    let workflow_file = env.create_workflow_file("loop", &builder).await;

    let output = dagflow(&env, &["validate", path_arg(&workflow_file)]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Circular dependency"));
}

#[tokio::test]
async fn test_cli_dry_run_does_not_persist() {
    let env = TestEnvironment::new();
    let workflow_file = env.create_workflow_file("greeting", &greeting_workflow()).await;

    let output = dagflow(&env, &["run", path_arg(&workflow_file), "--dry-run"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("hello -> shout"));

    let list = dagflow(&env, &["list"]);
    assert!(list.status.success());
    assert!(stdout(&list).trim().is_empty());
}

#[test]
fn test_cli_rejects_ids_outside_state_dir() {
    let env = TestEnvironment::new();
    let outside = env.path().join("precious.json");
    std::fs::write(&outside, "{}").unwrap();

    for command in ["delete", "status", "repair"] {
        let output = dagflow(&env, &[command, "../precious"]);
        assert!(!output.status.success(), "{} accepted an escaping id", command);
    }
    assert!(outside.exists());
}
