//! Wire format - 兄弟インスタンス間の JSON メッセージ
//!
//! ```text
//! { "type": "HEARTBEAT", "senderId": "a1", "payload": { "timestamp": 1700000000000 }, "timestamp": 1700000000000 }
//! ```
//!
//! `type` と `payload` の組を `Message` に型付けします。
//! 未知の `type` やデコードできない payload はエラー（受信側でログを出して捨てる）。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{InstanceId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Heartbeat,
    LeaderElection,
    TaskClaimed,
    TaskCompleted,
    StateSync,
}

/// The envelope as it travels on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub sender_id: InstanceId,
    #[serde(default)]
    pub payload: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Decoded payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Heartbeat {
        timestamp: i64,
    },
    LeaderElection {
        leader_id: InstanceId,
    },
    TaskClaimed {
        task_id: TaskId,
        claimed_by: InstanceId,
    },
    TaskCompleted {
        task_id: TaskId,
        result: Value,
        completed_by: InstanceId,
    },
    StateSync(Value),
}

#[derive(Serialize, Deserialize)]
struct HeartbeatPayload {
    timestamp: i64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaderPayload {
    leader_id: InstanceId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimedPayload {
    task_id: TaskId,
    claimed_by: InstanceId,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletedPayload {
    task_id: TaskId,
    #[serde(default)]
    result: Value,
    completed_by: InstanceId,
}

impl Message {
    pub fn kind(&self) -> MessageType {
        match self {
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::LeaderElection { .. } => MessageType::LeaderElection,
            Message::TaskClaimed { .. } => MessageType::TaskClaimed,
            Message::TaskCompleted { .. } => MessageType::TaskCompleted,
            Message::StateSync(_) => MessageType::StateSync,
        }
    }

    fn payload(self) -> serde_json::Result<Value> {
        match self {
            Message::Heartbeat { timestamp } => serde_json::to_value(HeartbeatPayload { timestamp }),
            Message::LeaderElection { leader_id } => {
                serde_json::to_value(LeaderPayload { leader_id })
            }
            Message::TaskClaimed {
                task_id,
                claimed_by,
            } => serde_json::to_value(ClaimedPayload {
                task_id,
                claimed_by,
            }),
            Message::TaskCompleted {
                task_id,
                result,
                completed_by,
            } => serde_json::to_value(CompletedPayload {
                task_id,
                result,
                completed_by,
            }),
            Message::StateSync(state) => Ok(state),
        }
    }
}

impl WireMessage {
    pub fn new(sender_id: InstanceId, timestamp: i64, message: Message) -> serde_json::Result<Self> {
        Ok(Self {
            kind: message.kind(),
            sender_id,
            payload: message.payload()?,
            timestamp,
        })
    }

    /// Type the payload according to `kind`.
    pub fn message(&self) -> serde_json::Result<Message> {
        let payload = self.payload.clone();
        Ok(match self.kind {
            MessageType::Heartbeat => {
                let p: HeartbeatPayload = serde_json::from_value(payload)?;
                Message::Heartbeat {
                    timestamp: p.timestamp,
                }
            }
            MessageType::LeaderElection => {
                let p: LeaderPayload = serde_json::from_value(payload)?;
                Message::LeaderElection {
                    leader_id: p.leader_id,
                }
            }
            MessageType::TaskClaimed => {
                let p: ClaimedPayload = serde_json::from_value(payload)?;
                Message::TaskClaimed {
                    task_id: p.task_id,
                    claimed_by: p.claimed_by,
                }
            }
            MessageType::TaskCompleted => {
                let p: CompletedPayload = serde_json::from_value(payload)?;
                Message::TaskCompleted {
                    task_id: p.task_id,
                    result: p.result,
                    completed_by: p.completed_by,
                }
            }
            MessageType::StateSync => Message::StateSync(payload),
        })
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}
