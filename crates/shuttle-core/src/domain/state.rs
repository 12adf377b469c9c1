//! Task and engine state machines.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a persisted task.
///
/// State transitions:
/// - Pending -> Processing -> Completed
/// - Pending -> Processing -> Failed
/// - Pending -> Completed (the executor reported the result before the store saw `Processing`)
///
/// Nothing goes back to `Pending`. Restart recovery replays records that are
/// still `Pending` in the store; it never rewrites a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is allowed. Same-status writes are no-ops and allowed.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            TaskStatus::Pending => next != TaskStatus::Pending,
            TaskStatus::Processing => next.is_terminal(),
            TaskStatus::Completed | TaskStatus::Failed => false,
        }
    }

    /// Key used in the status index.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine status exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    #[default]
    Idle,
    Initializing,
    Processing,
    Paused,
    Completed,
    Error,
}

impl EngineStatus {
    /// A run is active while processing or paused.
    pub fn is_active(self) -> bool {
        matches!(self, EngineStatus::Processing | EngineStatus::Paused)
    }
}

/// Foreground / background state of the host surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

impl Visibility {
    pub fn is_foreground(self) -> bool {
        self == Visibility::Foreground
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::dispatch(TaskStatus::Pending, TaskStatus::Processing, true)]
    #[case::direct_complete(TaskStatus::Pending, TaskStatus::Completed, true)]
    #[case::complete(TaskStatus::Processing, TaskStatus::Completed, true)]
    #[case::fail(TaskStatus::Processing, TaskStatus::Failed, true)]
    #[case::same(TaskStatus::Completed, TaskStatus::Completed, true)]
    #[case::back_to_pending(TaskStatus::Processing, TaskStatus::Pending, false)]
    #[case::reopen(TaskStatus::Completed, TaskStatus::Processing, false)]
    #[case::failed_to_completed(TaskStatus::Failed, TaskStatus::Completed, false)]
    fn status_transitions(
        #[case] from: TaskStatus,
        #[case] to: TaskStatus,
        #[case] allowed: bool,
    ) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(TaskStatus::Processing.to_string(), "processing");
    }

    #[test]
    fn only_processing_and_paused_are_active() {
        assert!(EngineStatus::Processing.is_active());
        assert!(EngineStatus::Paused.is_active());
        assert!(!EngineStatus::Idle.is_active());
        assert!(!EngineStatus::Completed.is_active());
        assert!(!EngineStatus::Error.is_active());
    }
}
