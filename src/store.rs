//! Process-wide stores shared between the scheduler and external readers
//!
//! Both stores are keyed by task id with an explicit lifecycle: created at
//! submission, removed on the terminal transition (pool registry) or by a
//! caller purge (task store).

use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

use crate::models::{PoolStats, ResultRow, TaskRecord, TaskStatus};
use crate::proxy::ProxyPool;

/// Concurrent map of task id to live task record.
///
/// Field writes are last-writer-wins; readers may observe intermediate
/// records (e.g. `PROCESSING` with progress just below 100).
#[derive(Default)]
pub struct TaskStore {
    tasks: DashMap<String, TaskRecord>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, record: TaskRecord) {
        self.tasks.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.tasks.get(id).map(|record| record.value().clone())
    }

    pub fn delete(&self, id: &str) -> bool {
        self.tasks.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Publish an in-flight progress value; terminal records are left alone
    /// and progress never moves backwards.
    pub fn publish_progress(&self, id: &str, progress: f64) {
        if let Some(mut record) = self.tasks.get_mut(id) {
            if !record.status.is_terminal() && progress > record.progress {
                record.progress = progress;
            }
        }
    }

    pub fn set_message(&self, id: &str, message: impl Into<String>) {
        if let Some(mut record) = self.tasks.get_mut(id) {
            record.message = message.into();
        }
    }

    /// Terminal transition: only this write may set progress to 100.
    pub fn mark_completed(&self, id: &str, results: Vec<ResultRow>, proxy_stats: PoolStats) {
        if let Some(mut record) = self.tasks.get_mut(id) {
            if record.status.is_terminal() {
                warn!(task_id = %id, "Ignoring completion of a terminal task");
                return;
            }
            record.status = TaskStatus::Completed;
            record.progress = 100.0;
            record.message = "Processing complete.".to_string();
            record.results = results;
            record.proxy_stats = Some(proxy_stats);
        }
    }

    /// Terminal transition on failure: keeps the last published progress.
    pub fn mark_failed(&self, id: &str, message: impl Into<String>) {
        if let Some(mut record) = self.tasks.get_mut(id) {
            if record.status.is_terminal() {
                warn!(task_id = %id, "Ignoring failure of a terminal task");
                return;
            }
            record.status = TaskStatus::Failed;
            record.message = message.into();
        }
    }

    /// Failure before any work started reports full progress so pollers
    /// do not wait on a task that will never advance.
    pub fn mark_failed_at(&self, id: &str, message: impl Into<String>, progress: f64) {
        if let Some(mut record) = self.tasks.get_mut(id) {
            if record.status.is_terminal() {
                return;
            }
            record.status = TaskStatus::Failed;
            record.message = message.into();
            record.progress = progress;
        }
    }
}

/// Registry of per-task proxy pools, created on submit and dropped on the
/// terminal transition.
#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<String, Arc<ProxyPool>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task_id: &str, pool: Arc<ProxyPool>) {
        self.pools.insert(task_id.to_string(), pool);
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<ProxyPool>> {
        self.pools.get(task_id).map(|pool| Arc::clone(pool.value()))
    }

    pub fn remove(&self, task_id: &str) {
        self.pools.remove(task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = TaskStore::new();
        store.put(TaskRecord::new("t1"));

        assert!(store.contains("t1"));
        assert_eq!(store.get("t1").unwrap().status, TaskStatus::Processing);
        assert!(store.delete("t1"));
        assert!(!store.delete("t1"));
        assert!(store.get("t1").is_none());
    }

    #[test]
    fn test_progress_is_monotone() {
        let store = TaskStore::new();
        store.put(TaskRecord::new("t1"));

        store.publish_progress("t1", 40.0);
        store.publish_progress("t1", 20.0);
        assert_eq!(store.get("t1").unwrap().progress, 40.0);

        store.publish_progress("t1", 99.0);
        assert_eq!(store.get("t1").unwrap().progress, 99.0);
    }

    #[test]
    fn test_completed_sets_full_progress() {
        let store = TaskStore::new();
        store.put(TaskRecord::new("t1"));
        store.publish_progress("t1", 55.0);

        let pool = ProxyPool::new(Vec::new());
        store.mark_completed("t1", Vec::new(), pool.stats());

        let record = store.get("t1").unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress, 100.0);
        assert_eq!(record.message, "Processing complete.");
        assert!(record.proxy_stats.is_some());
    }

    #[test]
    fn test_failed_keeps_progress() {
        let store = TaskStore::new();
        store.put(TaskRecord::new("t1"));
        store.publish_progress("t1", 55.0);

        store.mark_failed("t1", "Critical error: boom");

        let record = store.get("t1").unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.progress, 55.0);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let store = TaskStore::new();
        store.put(TaskRecord::new("t1"));
        store.mark_failed("t1", "first failure");

        let pool = ProxyPool::new(Vec::new());
        store.mark_completed("t1", Vec::new(), pool.stats());
        store.publish_progress("t1", 99.0);

        let record = store.get("t1").unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.message, "first failure");
        assert_eq!(record.progress, 0.0);
    }

    #[test]
    fn test_pool_registry_lifecycle() {
        let registry = PoolRegistry::new();
        registry.insert("t1", Arc::new(ProxyPool::new(vec!["p:1".to_string()])));

        assert!(registry.get("t1").is_some());
        registry.remove("t1");
        assert!(registry.get("t1").is_none());
    }
}
