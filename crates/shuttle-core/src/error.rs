use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::{TaskId, TaskStatus};

/// ErrorKind は失敗の運用上の分類
///
/// - Fatal: 起動や実行を止める（ホストに通知、自動リトライなし）
/// - NonFatal: そのタスクだけ失敗、ループは続行
/// - Degraded: 機能を落として続行（単一インスタンスモードなど）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    NonFatal,
    Degraded,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("task {} failed: {message}", display_task(.task_id))]
    TaskExecution {
        task_id: Option<TaskId>,
        message: String,
    },

    #[error("a processing run is already active")]
    AlreadyProcessing,

    #[error("broadcast channel unavailable: {0}")]
    CoordinatorUnavailable(String),

    #[error("executor context is no longer running")]
    ExecutorGone,

    #[error("engine has not been initialized")]
    NotInitialized,

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn display_task(task_id: &Option<TaskId>) -> String {
    task_id.map_or_else(|| "<unsaved>".to_string(), |id| id.to_string())
}

impl EngineError {
    pub fn task_failed(task_id: Option<TaskId>, message: impl Into<String>) -> Self {
        EngineError::TaskExecution {
            task_id,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::TaskExecution { .. } | EngineError::AlreadyProcessing => {
                ErrorKind::NonFatal
            }
            EngineError::CoordinatorUnavailable(_) => ErrorKind::Degraded,
            EngineError::StoreUnavailable(_)
            | EngineError::ExecutorGone
            | EngineError::NotInitialized
            | EngineError::InvalidTransition { .. }
            | EngineError::TaskNotFound(_)
            | EngineError::Codec(_)
            | EngineError::Config(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_errors_are_non_fatal() {
        let err = EngineError::task_failed(Some(TaskId::new(3)), "division by zero");
        assert_eq!(err.kind(), ErrorKind::NonFatal);
        assert_eq!(err.to_string(), "task task-3 failed: division by zero");

        let unsaved = EngineError::task_failed(None, "boom");
        assert_eq!(unsaved.to_string(), "task <unsaved> failed: boom");
    }

    #[test]
    fn coordinator_errors_degrade() {
        let err = EngineError::CoordinatorUnavailable("bus closed".into());
        assert_eq!(err.kind(), ErrorKind::Degraded);
        assert_eq!(EngineError::StoreUnavailable("x".into()).kind(), ErrorKind::Fatal);
    }
}
