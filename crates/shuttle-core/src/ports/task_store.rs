//! TaskStore port - プロセス再起動を越えて残る正本（source of truth）
//!
//! TaskStore は以下を管理します：
//! - タスク（status インデックス付き）
//! - 結果（completedAt インデックス付き、追記のみ）
//! - 状態 blob（キーで直接参照）
//!
//! # 実装
//! - `impls::RedbTaskStore`: redb ファイル（本番用）
//! - `impls::InMemoryTaskStore`: 永続化なし（テスト用）

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::{NewTask, StateBlob, Task, TaskId, TaskResult, TaskStatus};
use crate::error::Result;

/// TaskStore はタスク・結果・状態の正本
///
/// # 設計原則
/// - `save_tasks` が返った時点で永続化済み。呼び出し側はその後に executor へ渡す
/// - `initialize()` 前、または失敗後の操作はすべて `StoreUnavailable`
/// - 結果は個別に削除しない（`clear_results` で一括のみ）
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Open or create the medium and its indexes.
    async fn initialize(&self) -> Result<()>;

    /// Insert as `pending` with `attempts = 0`; returns ids in input order.
    async fn save_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>>;

    /// All `pending` tasks in id (insertion) order.
    async fn get_pending_tasks(&self) -> Result<Vec<Task>>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>>;

    /// Read-modify-write of one record. Rejects moves the status machine forbids.
    async fn update_task_status(&self, id: TaskId, status: TaskStatus) -> Result<Task>;

    /// Delete every `completed` task; returns how many were removed.
    async fn remove_completed_tasks(&self) -> Result<usize>;

    /// Delete the given tasks whatever their status; unknown ids are skipped.
    /// Returns how many were removed.
    async fn remove_tasks(&self, ids: Vec<TaskId>) -> Result<usize>;

    async fn clear_all_tasks(&self) -> Result<()>;

    async fn count_by_status(&self) -> Result<HashMap<TaskStatus, usize>>;

    async fn save_result(&self, task_id: TaskId, result: Value) -> Result<TaskResult>;

    /// Results with `completed_at >= since`, oldest first.
    async fn get_results(&self, since: DateTime<Utc>) -> Result<Vec<TaskResult>>;

    async fn clear_results(&self) -> Result<()>;

    async fn save_state(&self, key: &str, value: Value) -> Result<()>;

    async fn get_state(&self, key: &str) -> Result<Option<StateBlob>>;
}
