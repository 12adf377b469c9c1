//! Events - コーディネーターがローカルの購読者へ流すイベント
//!
//! ブロードキャストチャネル上のワイヤーメッセージ（`app::coordinator::wire`）とは別物です。
//! こちらはプロセス内だけで使い、シリアライズしません。

use serde_json::Value;

use super::ids::{InstanceId, TaskId};

/// CoordinatorEvent はリーダーシップの変化と兄弟インスタンスからの通知
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// このインスタンスがリーダーになった
    BecameLeader,

    /// リーダーではなくなった（`leader` は新しく信じているリーダー）
    LostLeadership { leader: InstanceId },

    /// 兄弟インスタンスがタスクを取得した（情報のみ）
    TaskClaimed {
        task_id: TaskId,
        claimed_by: InstanceId,
    },

    /// 兄弟インスタンスがタスクを完了した（再実行せずに反映するため）
    TaskCompleted {
        task_id: TaskId,
        result: Value,
        completed_by: InstanceId,
    },

    /// ホストレベルの自由形式の状態同期
    StateSync { from: InstanceId, state: Value },
}
