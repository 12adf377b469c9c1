//! Executor protocol - executor コンテキストとの間で交わすメッセージ
//!
//! 戻り値はありません。すべての結果は `Outbound` として非同期に届きます。

use serde_json::Value;

use crate::domain::{Progress, RunSummary, StatusReport, Task};

/// Settings applied by `INIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Tasks executed per synchronous pass before yielding.
    pub batch_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { batch_size: 50 }
    }
}

/// Host → executor.
#[derive(Debug, Clone)]
pub enum Inbound {
    Init(ExecutorConfig),
    Start(Vec<Task>),
    AddTasks(Vec<Task>),
    Pause,
    Resume,
    Cancel,
    GetStatus,
}

impl Inbound {
    pub fn name(&self) -> &'static str {
        match self {
            Inbound::Init(_) => "INIT",
            Inbound::Start(_) => "START",
            Inbound::AddTasks(_) => "ADD_TASKS",
            Inbound::Pause => "PAUSE",
            Inbound::Resume => "RESUME",
            Inbound::Cancel => "CANCEL",
            Inbound::GetStatus => "GET_STATUS",
        }
    }
}

/// Executor → host.
///
/// Every `START` and `ADD_TASKS` is answered by exactly one of `Started`,
/// `TasksAdded` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Emitted once when the context starts.
    Ready,
    Initialized(ExecutorConfig),
    Started {
        total: usize,
    },
    TasksAdded {
        added: usize,
        total: usize,
    },
    TaskCompleted {
        task: Task,
        result: Value,
        progress: Progress,
    },
    TaskError {
        task: Task,
        error: String,
        progress: Progress,
    },
    Paused {
        progress: Progress,
    },
    Resumed,
    Cancelled {
        processed: usize,
        discarded: usize,
    },
    Status(StatusReport),
    Completed(RunSummary),
    /// A rejected request (e.g. `START` during a run). The executor state is unchanged.
    Error {
        message: String,
    },
}

impl Outbound {
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::Ready => "READY",
            Outbound::Initialized(_) => "INITIALIZED",
            Outbound::Started { .. } => "STARTED",
            Outbound::TasksAdded { .. } => "TASKS_ADDED",
            Outbound::TaskCompleted { .. } => "TASK_COMPLETED",
            Outbound::TaskError { .. } => "TASK_ERROR",
            Outbound::Paused { .. } => "PAUSED",
            Outbound::Resumed => "RESUMED",
            Outbound::Cancelled { .. } => "CANCELLED",
            Outbound::Status(_) => "STATUS",
            Outbound::Completed(_) => "COMPLETED",
            Outbound::Error { .. } => "ERROR",
        }
    }
}
