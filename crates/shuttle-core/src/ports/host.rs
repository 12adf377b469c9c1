//! Host ports - ホストアプリケーション側の協調者
//!
//! - **HostSink**: 結果・進捗・エラーの受け口（UI への反映はホストの責務）
//! - **Notifier**: 非表示中に完了したときの通知（許可制）
//! - **FrameClock**: 次の描画タイミング。バッファした結果はここで一括反映する

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{InstanceId, Progress, RunSummary, Task, TaskId};

/// HostSink はオーケストレーターが結果を流し込む先
///
/// 全メソッドにデフォルト（何もしない）実装があるので、必要なものだけ実装します。
/// 呼び出しはオーケストレーターのイベントループ上で行われるため、重い処理は避けてください。
#[allow(unused_variables)]
pub trait HostSink: Send + Sync {
    fn on_cell_update(&self, task: &Task, sheet: &str, cell: &str, value: &Value) {}

    fn on_sheet_created(&self, task: &Task, name: &str, result: &Value) {}

    fn on_chart_created(&self, task: &Task, sheet: &str, range: &str, result: &Value) {}

    /// Results of actions without a dedicated callback.
    fn on_result(&self, task: &Task, result: &Value) {}

    fn on_complete(&self, summary: &RunSummary) {}

    fn on_error(&self, message: &str) {}

    fn on_progress(&self, progress: &Progress) {}

    fn on_leadership_change(&self, is_leader: bool) {}

    /// A sibling instance finished a task; mirror it without re-executing.
    fn on_remote_completion(&self, task_id: TaskId, result: &Value, completed_by: &InstanceId) {}
}

/// A sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostSink for NoopHost {}

/// Notifier はユーザー向け通知（表示方法はホスト次第）
pub trait Notifier: Send + Sync {
    fn permission_granted(&self) -> bool;

    fn notify(&self, title: &str, body: &str);
}

/// FrameClock は次の描画機会まで待つ
#[async_trait]
pub trait FrameClock: Send + Sync {
    async fn next_frame(&self);
}
