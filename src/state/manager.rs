// ABOUTME: Durable workflow state with an in-memory write-through cache
// ABOUTME: Serialises mutations per workflow id and writes records atomically

use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, warn};

use super::error::{Result, StateError};
use super::record::WorkflowRun;

/// Default storage directory for run records
pub const DEFAULT_STATE_DIR: &str = "workflow_states";

pub struct StateManager {
    root: PathBuf,
    cache: RwLock<HashMap<String, WorkflowRun>>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StateManager {
    /// Open a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        debug!("State storage at {}", root.display());

        Ok(Self {
            root,
            cache: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", workflow_id))
    }

    /// Ids name a single file inside the storage root: ASCII letters,
    /// digits, `-`, `_` and `.`, not starting with a dot
    pub fn is_valid_id(workflow_id: &str) -> bool {
        !workflow_id.is_empty()
            && !workflow_id.starts_with('.')
            && workflow_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }

    fn accepts(&self, workflow_id: &str) -> bool {
        if Self::is_valid_id(workflow_id) {
            return true;
        }
        warn!("Rejected invalid workflow id {:?}", workflow_id);
        false
    }

    fn checked_path(&self, workflow_id: &str) -> Result<PathBuf> {
        if !Self::is_valid_id(workflow_id) {
            return Err(StateError::InvalidId(workflow_id.to_string()));
        }
        Ok(self.record_path(workflow_id))
    }

    fn lock_for(&self, workflow_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Stamp `last_updated`, refresh the cache and write the record
    /// through to storage. The cache keeps the new state even when the
    /// durable write fails.
    pub async fn save_state(&self, workflow_id: &str, run: &mut WorkflowRun) -> bool {
        if !self.accepts(workflow_id) {
            return false;
        }
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock().await;
        self.persist(workflow_id, run).await
    }

    async fn persist(&self, workflow_id: &str, run: &mut WorkflowRun) -> bool {
        run.last_updated = chrono::Utc::now();
        self.cache
            .write()
            .await
            .insert(workflow_id.to_string(), run.clone());

        match self.write_record(workflow_id, run).await {
            Ok(()) => {
                debug!("Saved state for workflow {} ({})", workflow_id, run.status);
                true
            }
            Err(e) => {
                error!("Error saving state for workflow {}: {}", workflow_id, e);
                false
            }
        }
    }

    async fn write_record(&self, workflow_id: &str, run: &WorkflowRun) -> Result<()> {
        let content = serde_json::to_string_pretty(run)?;
        let target = self.checked_path(workflow_id)?;
        let temp = self.root.join(format!("{}.json.tmp", workflow_id));

        tokio::fs::write(&temp, content).await?;
        tokio::fs::rename(&temp, &target).await?;
        Ok(())
    }

    /// Cached record if present, otherwise read through from storage
    pub async fn load_state(&self, workflow_id: &str) -> Option<WorkflowRun> {
        if !self.accepts(workflow_id) {
            return None;
        }
        if let Some(run) = self.cache.read().await.get(workflow_id) {
            return Some(run.clone());
        }

        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock().await;
        self.load_locked(workflow_id).await
    }

    async fn load_locked(&self, workflow_id: &str) -> Option<WorkflowRun> {
        if let Some(run) = self.cache.read().await.get(workflow_id) {
            return Some(run.clone());
        }

        match self.read_record(workflow_id).await {
            Ok(run) => {
                self.cache
                    .write()
                    .await
                    .insert(workflow_id.to_string(), run.clone());
                Some(run)
            }
            Err(StateError::NotFound(_)) => None,
            Err(e) => {
                error!("Error loading state for workflow {}: {}", workflow_id, e);
                None
            }
        }
    }

    async fn read_record(&self, workflow_id: &str) -> Result<WorkflowRun> {
        let value = self.read_raw(workflow_id).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn read_raw(&self, workflow_id: &str) -> Result<Value> {
        let path = self.checked_path(workflow_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(workflow_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Drop the cached and durable record. A missing record is not an error.
    pub async fn delete_state(&self, workflow_id: &str) -> bool {
        if !self.accepts(workflow_id) {
            return false;
        }
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock().await;

        self.cache.write().await.remove(workflow_id);
        match tokio::fs::remove_file(self.record_path(workflow_id)).await {
            Ok(()) => {
                info!("Deleted state for workflow {}", workflow_id);
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                error!("Error deleting state for workflow {}: {}", workflow_id, e);
                false
            }
        }
    }

    /// Read-modify-write under the workflow's lock. Returns `None` when
    /// there is no record to update.
    pub async fn update_state<F, R>(&self, workflow_id: &str, f: F) -> Option<R>
    where
        F: FnOnce(&mut WorkflowRun) -> R,
    {
        if !self.accepts(workflow_id) {
            return None;
        }
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock().await;

        let mut run = self.load_locked(workflow_id).await?;
        let output = f(&mut run);
        if !self.persist(workflow_id, &mut run).await {
            warn!("Update of workflow {} kept in cache only", workflow_id);
        }
        Some(output)
    }

    /// Ids known to the cache or present in storage, sorted
    pub async fn list_workflows(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.read().await.keys().cloned().collect();

        match std::fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        ids.push(stem.to_string());
                    }
                }
            }
            Err(e) => warn!("Cannot list state directory {}: {}", self.root.display(), e),
        }

        ids.sort();
        ids.dedup();
        ids
    }

    /// Rewrite a damaged durable record so it decodes again. Returns
    /// `true` when the stored record is valid afterwards.
    pub async fn validate_and_repair_state(&self, workflow_id: &str) -> bool {
        if !self.accepts(workflow_id) {
            return false;
        }
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock().await;

        let raw = match self.read_raw(workflow_id).await {
            Ok(raw) => raw,
            Err(StateError::NotFound(_)) => match self.cache.read().await.get(workflow_id) {
                Some(run) => match serde_json::to_value(run) {
                    Ok(raw) => raw,
                    Err(e) => {
                        error!("Cannot encode cached state for {}: {}", workflow_id, e);
                        return false;
                    }
                },
                None => {
                    warn!("No state to repair for workflow {}", workflow_id);
                    return false;
                }
            },
            Err(e) => {
                error!("State for workflow {} is unreadable: {}", workflow_id, e);
                return false;
            }
        };

        let Value::Object(mut record) = raw else {
            error!("State for workflow {} is not a JSON object", workflow_id);
            return false;
        };

        let repaired = WorkflowRun::repair_value(workflow_id, &mut record);
        let mut run: WorkflowRun = match serde_json::from_value(Value::Object(record)) {
            Ok(run) => run,
            Err(e) => {
                error!("State for workflow {} cannot be repaired: {}", workflow_id, e);
                return false;
            }
        };

        if repaired.is_empty() {
            debug!("State for workflow {} is valid", workflow_id);
            self.cache
                .write()
                .await
                .insert(workflow_id.to_string(), run);
            return true;
        }

        warn!(
            "Repaired fields {:?} in state for workflow {}",
            repaired, workflow_id
        );
        self.persist(workflow_id, &mut run).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{TaskResult, WorkflowStatus};
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, StateManager) {
        let dir = TempDir::new().unwrap();
        let manager = StateManager::new(dir.path().join("states")).unwrap();
        (dir, manager)
    }

    #[tokio::test]
    async fn test_save_and_load_from_cold_cache() {
        let (dir, manager) = store();
        let mut run = WorkflowRun::new("wf-1", json!({"tasks": {}}));
        run.results
            .insert("a".to_string(), TaskResult::success("hello"));
        assert!(manager.save_state("wf-1", &mut run).await);
        assert!(manager.record_path("wf-1").exists());
        assert!(!dir.path().join("states/wf-1.json.tmp").exists());

        let cold = StateManager::new(dir.path().join("states")).unwrap();
        let loaded = cold.load_state("wf-1").await.unwrap();
        assert_eq!(loaded, run);
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let (_dir, manager) = store();
        assert!(manager.load_state("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_none() {
        let (_dir, manager) = store();
        std::fs::write(manager.record_path("bad"), "{not json").unwrap();
        assert!(manager.load_state("bad").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_state() {
        let (_dir, manager) = store();
        let mut run = WorkflowRun::new("wf-2", json!({}));
        manager.save_state("wf-2", &mut run).await;

        assert!(manager.delete_state("wf-2").await);
        assert!(manager.load_state("wf-2").await.is_none());
        assert!(manager.delete_state("wf-2").await);
    }

    #[tokio::test]
    async fn test_update_state() {
        let (_dir, manager) = store();
        let mut run = WorkflowRun::new("wf-3", json!({}));
        manager.save_state("wf-3", &mut run).await;

        let previous = manager
            .update_state("wf-3", |run| {
                let previous = run.status;
                run.status = WorkflowStatus::Running;
                previous
            })
            .await;
        assert_eq!(previous, Some(WorkflowStatus::Created));
        assert_eq!(
            manager.load_state("wf-3").await.unwrap().status,
            WorkflowStatus::Running
        );
        assert!(manager.update_state("missing", |_| ()).await.is_none());
    }

    #[tokio::test]
    async fn test_list_workflows() {
        let (_dir, manager) = store();
        for id in ["b", "a"] {
            let mut run = WorkflowRun::new(id, json!({}));
            manager.save_state(id, &mut run).await;
        }
        std::fs::write(manager.root().join("notes.txt"), "x").unwrap();
        assert_eq!(manager.list_workflows().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_ids_cannot_escape_storage_root() {
        let (dir, manager) = store();
        let outside = dir.path().join("outside.json");
        std::fs::write(&outside, r#"{"keep": true}"#).unwrap();

        assert!(!StateManager::is_valid_id("../outside"));
        assert!(!StateManager::is_valid_id("nested/wf"));
        assert!(!StateManager::is_valid_id(""));
        assert!(StateManager::is_valid_id("3f2c9a1e-wf_1.v2"));

        assert!(!manager.delete_state("../outside").await);
        assert!(manager.load_state("../outside").await.is_none());
        assert!(!manager.validate_and_repair_state("../outside").await);
        assert!(manager.update_state("../outside", |_| ()).await.is_none());

        let mut run = WorkflowRun::new("../outside", json!({}));
        assert!(!manager.save_state("../outside", &mut run).await);
        assert_eq!(
            std::fs::read_to_string(&outside).unwrap(),
            r#"{"keep": true}"#
        );
        assert!(manager.list_workflows().await.is_empty());
    }

    #[tokio::test]
    async fn test_repair_damaged_record() {
        let (_dir, manager) = store();
        std::fs::write(
            manager.record_path("wf-4"),
            r#"{"results": {}, "created_at": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(manager.load_state("wf-4").await.is_none());

        assert!(manager.validate_and_repair_state("wf-4").await);
        let run = manager.load_state("wf-4").await.unwrap();
        assert_eq!(run.status, WorkflowStatus::Failed);
        assert_eq!(run.workflow_id, "wf-4");
        assert!(run.error.is_some());

        assert!(!manager.validate_and_repair_state("absent").await);
    }
}
