//! Results and named state blobs kept next to the task queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ResultId, TaskId};

/// Output of one executed task. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ResultId>,
    pub task_id: TaskId,
    pub result: Value,
    pub completed_at: DateTime<Utc>,
}

/// A generic named durable value (e.g. last processed offset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateBlob {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}
