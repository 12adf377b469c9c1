//! Status - ホストが購読するリアクティブな状態
//!
//! `Orchestrator::subscribe()` が返す `watch::Receiver<EngineView>` で観測します。

use serde::Serialize;

use crate::domain::{EngineStatus, InstanceId, Progress, Stats};

/// Snapshot of the engine for the host UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineView {
    pub instance_id: InstanceId,
    pub status: EngineStatus,
    pub progress: Progress,
    pub stats: Stats,
    pub is_leader: bool,
    /// Results held back while the surface is hidden.
    pub buffered: usize,
    /// Last fatal error, cleared when a new run starts.
    pub last_error: Option<String>,
}

impl EngineView {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            status: EngineStatus::Idle,
            progress: Progress::default(),
            stats: Stats::default(),
            is_leader: true,
            buffered: 0,
            last_error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
