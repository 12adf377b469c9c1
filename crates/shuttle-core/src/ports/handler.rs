//! TaskHandler port - タスク 1 件を実行する不透明な関数
//!
//! 式の評価器などホスト側のロジックです。executor はバッチ内で同期的に呼び出し、
//! エラーは `TASK_ERROR` として報告して次のタスクへ進みます（リトライなし）。

use serde_json::Value;

use crate::domain::Task;

/// Runs one task and returns its free-form result.
///
/// Must return promptly: the executor does not pre-empt a running task, so a
/// slow handler delays pause/cancel until the current batch drains.
pub trait TaskHandler: Send + Sync + 'static {
    fn execute(&self, task: &Task) -> Result<Value, String>;
}

impl<F> TaskHandler for F
where
    F: Fn(&Task) -> Result<Value, String> + Send + Sync + 'static,
{
    fn execute(&self, task: &Task) -> Result<Value, String> {
        self(task)
    }
}
