// ABOUTME: Execution observer that checkpoints task results into durable state
// ABOUTME: Also reports a persisted stop request back to the engine

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::{ExecutionContext, ExecutionObserver, TaskResult, WorkflowStatus};
use crate::state::StateManager;

pub struct CheckpointObserver {
    state: Arc<StateManager>,
    workflow_id: String,
}

impl CheckpointObserver {
    pub fn new(state: Arc<StateManager>, workflow_id: impl Into<String>) -> Self {
        Self {
            state,
            workflow_id: workflow_id.into(),
        }
    }
}

#[async_trait]
impl ExecutionObserver for CheckpointObserver {
    async fn should_stop(&self, _context: &ExecutionContext) -> bool {
        let status = self
            .state
            .load_state(&self.workflow_id)
            .await
            .map(|run| run.status);
        status == Some(WorkflowStatus::Stopped)
    }

    // Only the results map is touched, so a concurrent stop is never overwritten
    async fn task_finished(&self, _context: &ExecutionContext, task_id: &str, result: &TaskResult) {
        let updated = self
            .state
            .update_state(&self.workflow_id, |run| {
                run.results.insert(task_id.to_string(), result.clone());
            })
            .await;

        match updated {
            Some(()) => debug!("Checkpointed task {} of {}", task_id, self.workflow_id),
            None => warn!(
                "No state record for workflow {}; result of {} not checkpointed",
                self.workflow_id, task_id
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowRun;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_checkpoint_and_stop_signal() {
        let dir = TempDir::new().unwrap();
        let state = Arc::new(StateManager::new(dir.path()).unwrap());
        let mut run = WorkflowRun::new("wf", json!({}));
        run.status = WorkflowStatus::Running;
        state.save_state("wf", &mut run).await;

        let observer = CheckpointObserver::new(state.clone(), "wf");
        let context = ExecutionContext::new("wf");
        assert!(!observer.should_stop(&context).await);

        observer
            .task_finished(&context, "a", &TaskResult::success("done"))
            .await;
        state
            .update_state("wf", |run| run.status = WorkflowStatus::Stopped)
            .await;
        observer
            .task_finished(&context, "b", &TaskResult::success("late"))
            .await;

        assert!(observer.should_stop(&context).await);
        let stored = state.load_state("wf").await.unwrap();
        assert_eq!(stored.status, WorkflowStatus::Stopped);
        assert_eq!(stored.results.len(), 2);
    }
}
