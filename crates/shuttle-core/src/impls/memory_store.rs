//! In-memory task store (same contract as the redb store, no durability).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{NewTask, ResultId, StateBlob, Task, TaskId, TaskResult, TaskStatus};
use crate::error::{EngineError, Result};
use crate::ports::{Clock, SystemClock, TaskStore};

/// Tables and their indexes.
///
/// Design:
/// - `tasks` / `results` are the single source of truth.
/// - `by_status` / `by_time` hold ids only and are kept in step on every write.
#[derive(Default)]
struct Tables {
    tasks: BTreeMap<TaskId, Task>,
    by_status: HashMap<TaskStatus, BTreeSet<TaskId>>,
    results: BTreeMap<ResultId, TaskResult>,
    by_time: BTreeSet<(DateTime<Utc>, ResultId)>,
    state: HashMap<String, StateBlob>,
    next_task_id: u64,
    next_result_id: u64,
}

impl Tables {
    fn new() -> Self {
        Self {
            next_task_id: 1,
            next_result_id: 1,
            ..Default::default()
        }
    }

    fn index(&mut self, status: TaskStatus, id: TaskId) {
        self.by_status.entry(status).or_default().insert(id);
    }

    fn unindex(&mut self, status: TaskStatus, id: TaskId) {
        if let Some(ids) = self.by_status.get_mut(&status) {
            ids.remove(&id);
        }
    }

    fn ids_with(&self, status: TaskStatus) -> Vec<TaskId> {
        self.by_status
            .get(&status)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// In-memory store. `initialize()` must still be called before use.
pub struct InMemoryTaskStore {
    tables: Mutex<Option<Tables>>,
    clock: Arc<dyn Clock>,
    refuse_open: bool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Mutex::new(None),
            clock,
            refuse_open: false,
        }
    }

    /// A store whose `initialize()` always fails, for exercising startup errors.
    pub fn unavailable() -> Self {
        Self {
            refuse_open: true,
            ..Self::new()
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_initialized() -> EngineError {
    EngineError::StoreUnavailable("store has not been initialized".into())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn initialize(&self) -> Result<()> {
        if self.refuse_open {
            return Err(EngineError::StoreUnavailable(
                "in-memory store configured as unavailable".into(),
            ));
        }
        let mut tables = self.tables.lock().await;
        if tables.is_none() {
            *tables = Some(Tables::new());
        }
        Ok(())
    }

    async fn save_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;
        let now = self.clock.now();

        let mut saved = Vec::with_capacity(tasks.len());
        for new in tasks {
            let id = TaskId::new(tables.next_task_id);
            tables.next_task_id += 1;
            let task = Task::pending(id, new, now);
            tables.tasks.insert(id, task.clone());
            tables.index(TaskStatus::Pending, id);
            saved.push(task);
        }
        Ok(saved)
    }

    async fn get_pending_tasks(&self) -> Result<Vec<Task>> {
        let guard = self.tables.lock().await;
        let tables = guard.as_ref().ok_or_else(not_initialized)?;
        Ok(tables
            .ids_with(TaskStatus::Pending)
            .into_iter()
            .filter_map(|id| tables.tasks.get(&id).cloned())
            .collect())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let guard = self.tables.lock().await;
        let tables = guard.as_ref().ok_or_else(not_initialized)?;
        Ok(tables.tasks.get(&id).cloned())
    }

    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<Task> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;
        let now = self.clock.now();

        let task = tables
            .tasks
            .get_mut(&id)
            .ok_or(EngineError::TaskNotFound(id))?;
        let previous = task.status;
        task.transition(status, now)?;
        let updated = task.clone();

        tables.unindex(previous, id);
        tables.index(status, id);
        Ok(updated)
    }

    async fn remove_completed_tasks(&self) -> Result<usize> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;

        let completed = tables.ids_with(TaskStatus::Completed);
        for id in &completed {
            tables.tasks.remove(id);
        }
        tables.by_status.remove(&TaskStatus::Completed);
        Ok(completed.len())
    }

    async fn remove_tasks(&self, ids: Vec<TaskId>) -> Result<usize> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;

        let mut removed = 0;
        for id in ids {
            if let Some(task) = tables.tasks.remove(&id) {
                tables.unindex(task.status, id);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn clear_all_tasks(&self) -> Result<()> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;
        tables.tasks.clear();
        tables.by_status.clear();
        Ok(())
    }

    async fn count_by_status(&self) -> Result<HashMap<TaskStatus, usize>> {
        let guard = self.tables.lock().await;
        let tables = guard.as_ref().ok_or_else(not_initialized)?;
        Ok(TaskStatus::ALL
            .into_iter()
            .map(|status| (status, tables.by_status.get(&status).map_or(0, |s| s.len())))
            .collect())
    }

    async fn save_result(&self, task_id: TaskId, result: Value) -> Result<TaskResult> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;

        let id = ResultId::new(tables.next_result_id);
        tables.next_result_id += 1;
        let record = TaskResult {
            id: Some(id),
            task_id,
            result,
            completed_at: self.clock.now(),
        };
        tables.by_time.insert((record.completed_at, id));
        tables.results.insert(id, record.clone());
        Ok(record)
    }

    async fn get_results(&self, since: DateTime<Utc>) -> Result<Vec<TaskResult>> {
        let guard = self.tables.lock().await;
        let tables = guard.as_ref().ok_or_else(not_initialized)?;
        Ok(tables
            .by_time
            .range((since, ResultId::new(0))..)
            .filter_map(|(_, id)| tables.results.get(id).cloned())
            .collect())
    }

    async fn clear_results(&self) -> Result<()> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;
        tables.results.clear();
        tables.by_time.clear();
        Ok(())
    }

    async fn save_state(&self, key: &str, value: Value) -> Result<()> {
        let mut guard = self.tables.lock().await;
        let tables = guard.as_mut().ok_or_else(not_initialized)?;
        let blob = StateBlob {
            key: key.to_string(),
            value,
            updated_at: self.clock.now(),
        };
        tables.state.insert(blob.key.clone(), blob);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<StateBlob>> {
        let guard = self.tables.lock().await;
        let tables = guard.as_ref().ok_or_else(not_initialized)?;
        Ok(tables.state.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use serde_json::json;

    async fn ready_store() -> InMemoryTaskStore {
        let store = InMemoryTaskStore::new();
        store.initialize().await.unwrap();
        store
    }

    #[tokio::test]
    async fn operations_fail_before_initialize() {
        let store = InMemoryTaskStore::new();
        let err = store.get_pending_tasks().await.unwrap_err();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));

        let err = store.save_state("k", json!(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn unavailable_store_never_opens() {
        let store = InMemoryTaskStore::unavailable();
        assert!(store.initialize().await.is_err());
        assert!(store.save_tasks(vec![]).await.is_err());
    }

    #[tokio::test]
    async fn save_assigns_increasing_ids_and_pending_status() {
        let store = ready_store().await;
        let saved = store
            .save_tasks(vec![NewTask::create_sheet("A"), NewTask::create_sheet("B")])
            .await
            .unwrap();

        assert_eq!(saved[0].id, Some(TaskId::new(1)));
        assert_eq!(saved[1].id, Some(TaskId::new(2)));
        assert!(saved.iter().all(|t| t.status == TaskStatus::Pending && t.attempts == 0));

        let pending = store.get_pending_tasks().await.unwrap();
        assert_eq!(pending, saved);
    }

    #[tokio::test]
    async fn status_updates_move_the_index() {
        let store = ready_store().await;
        let saved = store
            .save_tasks(vec![NewTask::create_sheet("A"), NewTask::create_sheet("B")])
            .await
            .unwrap();
        let first = saved[0].id.unwrap();

        store
            .update_task_status(first, TaskStatus::Completed)
            .await
            .unwrap();

        let pending = store.get_pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, saved[1].id);

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts[&TaskStatus::Completed], 1);
        assert_eq!(counts[&TaskStatus::Pending], 1);

        assert_eq!(store.remove_completed_tasks().await.unwrap(), 1);
        assert!(store.get_task(first).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_tasks_deletes_only_the_listed_ids() {
        let store = ready_store().await;
        let saved = store
            .save_tasks(vec![
                NewTask::create_sheet("A"),
                NewTask::create_sheet("B"),
                NewTask::create_sheet("C"),
            ])
            .await
            .unwrap();
        let a = saved[0].id.unwrap();
        let b = saved[1].id.unwrap();
        store.update_task_status(a, TaskStatus::Failed).await.unwrap();

        let removed = store
            .remove_tasks(vec![a, b, TaskId::new(99)])
            .await
            .unwrap();
        assert_eq!(removed, 2);

        let pending = store.get_pending_tasks().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, saved[2].id);

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(counts[&TaskStatus::Failed], 0);
        assert_eq!(counts[&TaskStatus::Pending], 1);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_clear() {
        let store = ready_store().await;
        store.save_tasks(vec![NewTask::create_sheet("A")]).await.unwrap();
        store.clear_all_tasks().await.unwrap();

        let saved = store.save_tasks(vec![NewTask::create_sheet("B")]).await.unwrap();
        assert_eq!(saved[0].id, Some(TaskId::new(2)));
    }

    #[tokio::test]
    async fn results_filter_by_completion_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = Arc::new(FixedClock::new(start));
        let store = InMemoryTaskStore::with_clock(clock.clone());
        store.initialize().await.unwrap();

        store.save_result(TaskId::new(1), json!("early")).await.unwrap();
        clock.advance(chrono::Duration::seconds(10));
        store.save_result(TaskId::new(2), json!("late")).await.unwrap();

        let all = store.get_results(start).await.unwrap();
        assert_eq!(all.len(), 2);

        let recent = store
            .get_results(start + chrono::Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].result, json!("late"));
    }

    #[tokio::test]
    async fn state_is_upserted_by_key() {
        let store = ready_store().await;
        store.save_state("offset", json!(10)).await.unwrap();
        store.save_state("offset", json!(20)).await.unwrap();

        let blob = store.get_state("offset").await.unwrap().unwrap();
        assert_eq!(blob.value, json!(20));
        assert!(store.get_state("missing").await.unwrap().is_none());
    }
}
