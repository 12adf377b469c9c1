//! Durable task store backed by a single redb file.
//!
//! # Table design
//!
//! ```text
//! tasks            u64            -> JSON Task
//! tasks_by_status  &str (multi)   -> u64 task id
//! results          u64            -> JSON TaskResult
//! results_by_time  [ms BE | id BE] -> u64 result id
//! state            &str           -> JSON StateBlob
//! meta             &str           -> u64 (id counters)
//! ```
//!
//! `results_by_time` puts the completion timestamp in the high bytes, so a
//! single range scan from `since` yields results oldest first. Counters live in
//! `meta` and only ever grow; ids are not reused after a clear.
//!
//! redb is synchronous, so every operation runs on the blocking pool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{
    Database, MultimapTableDefinition, ReadableTable, TableDefinition, WriteTransaction,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{NewTask, ResultId, StateBlob, Task, TaskId, TaskResult, TaskStatus};
use crate::error::{EngineError, Result};
use crate::ports::{Clock, SystemClock, TaskStore};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const TASKS: TableDefinition<u64, &[u8]> = TableDefinition::new("tasks");
const TASKS_BY_STATUS: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("tasks_by_status");
const RESULTS: TableDefinition<u64, &[u8]> = TableDefinition::new("results");
const RESULTS_BY_TIME: TableDefinition<&[u8], u64> = TableDefinition::new("results_by_time");
const STATE: TableDefinition<&str, &[u8]> = TableDefinition::new("state");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_TASK_ID: &str = "next_task_id";
const NEXT_RESULT_ID: &str = "next_result_id";

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

fn time_key(ts: DateTime<Utc>, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn db_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::StoreUnavailable(e.to_string())
}

fn not_initialized() -> EngineError {
    EngineError::StoreUnavailable("store has not been initialized".into())
}

/// Take the next value of a `meta` counter (starting at 1) and advance it.
fn next_id(wt: &WriteTransaction, counter: &str) -> Result<u64> {
    let mut meta = wt.open_table(META).map_err(db_err)?;
    let next = meta.get(counter).map_err(db_err)?.map(|g| g.value()).unwrap_or(1);
    meta.insert(counter, next + 1).map_err(db_err)?;
    Ok(next)
}

// ---------------------------------------------------------------------------
// RedbTaskStore
// ---------------------------------------------------------------------------

/// Task store persisted to a redb file at `path`.
pub struct RedbTaskStore {
    path: PathBuf,
    db: RwLock<Option<Arc<Database>>>,
    clock: Arc<dyn Clock>,
}

impl RedbTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            db: RwLock::new(None),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the open database on the blocking pool.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.read().await.clone().ok_or_else(not_initialized)?;
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| EngineError::StoreUnavailable(format!("store worker failed: {e}")))?
    }
}

#[async_trait]
impl TaskStore for RedbTaskStore {
    async fn initialize(&self) -> Result<()> {
        let mut slot = self.db.write().await;
        if slot.is_some() {
            return Ok(());
        }

        let path = self.path.clone();
        let db = tokio::task::spawn_blocking(move || -> Result<Database> {
            let db = Database::create(&path).map_err(db_err)?;
            // Create every table up front so read transactions never miss one
            let wt = db.begin_write().map_err(db_err)?;
            wt.open_table(TASKS).map_err(db_err)?;
            wt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;
            wt.open_table(RESULTS).map_err(db_err)?;
            wt.open_table(RESULTS_BY_TIME).map_err(db_err)?;
            wt.open_table(STATE).map_err(db_err)?;
            wt.open_table(META).map_err(db_err)?;
            wt.commit().map_err(db_err)?;
            Ok(db)
        })
        .await
        .map_err(|e| EngineError::StoreUnavailable(format!("store worker failed: {e}")))??;

        info!(path = %self.path.display(), "task store opened");
        *slot = Some(Arc::new(db));
        Ok(())
    }

    async fn save_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>> {
        let now = self.clock.now();
        self.with_db(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            let mut saved = Vec::with_capacity(tasks.len());
            {
                let mut table = wt.open_table(TASKS).map_err(db_err)?;
                let mut by_status = wt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;
                for new in tasks {
                    let id = next_id(&wt, NEXT_TASK_ID)?;
                    let task = Task::pending(TaskId::new(id), new, now);
                    let bytes = serde_json::to_vec(&task)?;
                    table.insert(id, bytes.as_slice()).map_err(db_err)?;
                    by_status
                        .insert(TaskStatus::Pending.as_str(), id)
                        .map_err(db_err)?;
                    saved.push(task);
                }
            }
            wt.commit().map_err(db_err)?;
            debug!(count = saved.len(), "tasks saved");
            Ok(saved)
        })
        .await
    }

    async fn get_pending_tasks(&self) -> Result<Vec<Task>> {
        self.with_db(|db| {
            let rt = db.begin_read().map_err(db_err)?;
            let table = rt.open_table(TASKS).map_err(db_err)?;
            let by_status = rt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;

            let mut pending = Vec::new();
            // multimap values are sorted, so this is id order
            for id in by_status
                .get(TaskStatus::Pending.as_str())
                .map_err(db_err)?
            {
                let id = id.map_err(db_err)?.value();
                if let Some(bytes) = table.get(id).map_err(db_err)? {
                    pending.push(serde_json::from_slice::<Task>(bytes.value())?);
                }
            }
            Ok(pending)
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        self.with_db(move |db| {
            let rt = db.begin_read().map_err(db_err)?;
            let table = rt.open_table(TASKS).map_err(db_err)?;
            let found = table.get(id.get()).map_err(db_err)?;
            match found {
                Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
                None => Ok(None),
            }
        })
        .await
    }

    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<Task> {
        let now = self.clock.now();
        self.with_db(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            let task = {
                let mut table = wt.open_table(TASKS).map_err(db_err)?;
                let mut by_status = wt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;

                let bytes = table
                    .get(id.get())
                    .map_err(db_err)?
                    .map(|g| g.value().to_vec())
                    .ok_or(EngineError::TaskNotFound(id))?;
                let mut task: Task = serde_json::from_slice(&bytes)?;
                let previous = task.status;
                task.transition(status, now)?;

                let bytes = serde_json::to_vec(&task)?;
                table.insert(id.get(), bytes.as_slice()).map_err(db_err)?;
                by_status
                    .remove(previous.as_str(), id.get())
                    .map_err(db_err)?;
                by_status.insert(status.as_str(), id.get()).map_err(db_err)?;
                task
            };
            wt.commit().map_err(db_err)?;
            Ok(task)
        })
        .await
    }

    async fn remove_completed_tasks(&self) -> Result<usize> {
        self.with_db(|db| {
            let wt = db.begin_write().map_err(db_err)?;
            let removed = {
                let mut table = wt.open_table(TASKS).map_err(db_err)?;
                let mut by_status = wt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;

                let mut ids = Vec::new();
                for id in by_status
                    .remove_all(TaskStatus::Completed.as_str())
                    .map_err(db_err)?
                {
                    ids.push(id.map_err(db_err)?.value());
                }
                for id in &ids {
                    table.remove(*id).map_err(db_err)?;
                }
                ids.len()
            };
            wt.commit().map_err(db_err)?;
            Ok(removed)
        })
        .await
    }

    async fn remove_tasks(&self, ids: Vec<TaskId>) -> Result<usize> {
        self.with_db(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            let removed = {
                let mut table = wt.open_table(TASKS).map_err(db_err)?;
                let mut by_status = wt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;

                let mut removed = 0;
                for id in ids {
                    let Some(bytes) = table
                        .remove(id.get())
                        .map_err(db_err)?
                        .map(|g| g.value().to_vec())
                    else {
                        continue;
                    };
                    let task: Task = serde_json::from_slice(&bytes)?;
                    by_status
                        .remove(task.status.as_str(), id.get())
                        .map_err(db_err)?;
                    removed += 1;
                }
                removed
            };
            wt.commit().map_err(db_err)?;
            debug!(removed, "tasks removed");
            Ok(removed)
        })
        .await
    }

    async fn clear_all_tasks(&self) -> Result<()> {
        self.with_db(|db| {
            let wt = db.begin_write().map_err(db_err)?;
            {
                let mut table = wt.open_table(TASKS).map_err(db_err)?;
                let mut by_status = wt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;

                let mut ids = Vec::new();
                for entry in table.iter().map_err(db_err)? {
                    ids.push(entry.map_err(db_err)?.0.value());
                }
                for id in ids {
                    table.remove(id).map_err(db_err)?;
                }
                for status in TaskStatus::ALL {
                    by_status.remove_all(status.as_str()).map_err(db_err)?;
                }
            }
            wt.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn count_by_status(&self) -> Result<HashMap<TaskStatus, usize>> {
        self.with_db(|db| {
            let rt = db.begin_read().map_err(db_err)?;
            let by_status = rt.open_multimap_table(TASKS_BY_STATUS).map_err(db_err)?;
            let mut counts = HashMap::new();
            for status in TaskStatus::ALL {
                let values = by_status.get(status.as_str()).map_err(db_err)?;
                counts.insert(status, values.count());
            }
            Ok(counts)
        })
        .await
    }

    async fn save_result(&self, task_id: TaskId, result: Value) -> Result<TaskResult> {
        let completed_at = self.clock.now();
        self.with_db(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            let id = next_id(&wt, NEXT_RESULT_ID)?;
            let record = TaskResult {
                id: Some(ResultId::new(id)),
                task_id,
                result,
                completed_at,
            };
            {
                let mut results = wt.open_table(RESULTS).map_err(db_err)?;
                let mut by_time = wt.open_table(RESULTS_BY_TIME).map_err(db_err)?;
                let bytes = serde_json::to_vec(&record)?;
                results.insert(id, bytes.as_slice()).map_err(db_err)?;
                let key = time_key(completed_at, id);
                by_time.insert(key.as_slice(), id).map_err(db_err)?;
            }
            wt.commit().map_err(db_err)?;
            Ok(record)
        })
        .await
    }

    async fn get_results(&self, since: DateTime<Utc>) -> Result<Vec<TaskResult>> {
        self.with_db(move |db| {
            let rt = db.begin_read().map_err(db_err)?;
            let results = rt.open_table(RESULTS).map_err(db_err)?;
            let by_time = rt.open_table(RESULTS_BY_TIME).map_err(db_err)?;

            let lower = time_key(since, 0);
            let mut out = Vec::new();
            for entry in by_time.range(lower.as_slice()..).map_err(db_err)? {
                let (_, id) = entry.map_err(db_err)?;
                if let Some(bytes) = results.get(id.value()).map_err(db_err)? {
                    let record: TaskResult = serde_json::from_slice(bytes.value())?;
                    // keys are millisecond-granular
                    if record.completed_at >= since {
                        out.push(record);
                    }
                }
            }
            Ok(out)
        })
        .await
    }

    async fn clear_results(&self) -> Result<()> {
        self.with_db(|db| {
            let wt = db.begin_write().map_err(db_err)?;
            {
                let mut results = wt.open_table(RESULTS).map_err(db_err)?;
                let mut by_time = wt.open_table(RESULTS_BY_TIME).map_err(db_err)?;

                let mut keys = Vec::new();
                for entry in by_time.iter().map_err(db_err)? {
                    let (key, id) = entry.map_err(db_err)?;
                    keys.push((key.value().to_vec(), id.value()));
                }
                for (key, id) in keys {
                    by_time.remove(key.as_slice()).map_err(db_err)?;
                    results.remove(id).map_err(db_err)?;
                }
            }
            wt.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn save_state(&self, key: &str, value: Value) -> Result<()> {
        let blob = StateBlob {
            key: key.to_string(),
            value,
            updated_at: self.clock.now(),
        };
        self.with_db(move |db| {
            let bytes = serde_json::to_vec(&blob)?;
            let wt = db.begin_write().map_err(db_err)?;
            {
                let mut state = wt.open_table(STATE).map_err(db_err)?;
                state
                    .insert(blob.key.as_str(), bytes.as_slice())
                    .map_err(db_err)?;
            }
            wt.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn get_state(&self, key: &str) -> Result<Option<StateBlob>> {
        let key = key.to_string();
        self.with_db(move |db| {
            let rt = db.begin_read().map_err(db_err)?;
            let state = rt.open_table(STATE).map_err(db_err)?;
            let found = state.get(key.as_str()).map_err(db_err)?;
            match found {
                Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
                None => Ok(None),
            }
        })
        .await
    }
}
