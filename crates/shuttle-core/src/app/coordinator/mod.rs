//! InstanceCoordinator - 兄弟インスタンス間の助言的リーダー選出
//!
//! # フロー
//! 1. 起動時: 生存集合 = {self} で選出（= 自分）→ `LEADER_ELECTION` を送信
//! 2. heartbeat 間隔ごと: `HEARTBEAT` 送信 → 期限切れ peer の除去
//! 3. 受信: 新しい peer を見たら再選出、`LEADER_ELECTION` はそのまま採用
//!
//! # 設計原則
//! - 辞書順で最小の生存 ID がリーダー
//! - 相互排他には使わない（一時的な複数リーダーは許容）
//! - `LEADER_ELECTION` は無条件に採用する（後勝ち。既知の競合あり）
//! - 媒体が使えなければ単一インスタンスとして動く（is_leader = true）
//!
//! 状態は std Mutex で保護し、`.await` をまたいで保持しません。

pub mod wire;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::domain::{CoordinatorEvent, InstanceId, TaskId};
use crate::error::Result;
use crate::ports::{BroadcastChannel, Clock, FrameReceiver};

use self::wire::{Message, WireMessage};

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorConfig {
    pub heartbeat_interval: Duration,
    pub dead_peer_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for CoordinatorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            dead_peer_timeout: config.dead_peer_timeout(),
        }
    }
}

/// What this instance currently believes about leadership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderState {
    pub self_id: InstanceId,
    pub believed_leader: InstanceId,
    pub is_leader: bool,
}

impl LeaderState {
    fn solo(self_id: InstanceId) -> Self {
        Self {
            believed_leader: self_id.clone(),
            self_id,
            is_leader: true,
        }
    }
}

/// Smallest id among `self_id` and the live peers.
fn elect<'a>(self_id: &'a InstanceId, peers: impl Iterator<Item = &'a InstanceId>) -> InstanceId {
    peers
        .chain(std::iter::once(self_id))
        .min()
        .unwrap_or(self_id)
        .clone()
}

struct Shared {
    self_id: InstanceId,
    channel: Option<Arc<dyn BroadcastChannel>>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    /// Heartbeat records: peer → last seen.
    peers: Mutex<HashMap<InstanceId, Instant>>,
    leader: watch::Sender<LeaderState>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl Shared {
    fn publish(&self, message: Message) -> Result<()> {
        let Some(channel) = &self.channel else {
            return Ok(());
        };
        let timestamp = self.clock.now().timestamp_millis();
        let frame = WireMessage::new(self.self_id.clone(), timestamp, message)?.encode()?;
        channel.publish(frame)
    }

    fn emit(&self, event: CoordinatorEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Adopt `leader` as the believed leader; emits an event when `is_leader` flips.
    fn set_leader(&self, leader: InstanceId) {
        let is_leader = leader == self.self_id;
        let previous = self.leader.send_replace(LeaderState {
            self_id: self.self_id.clone(),
            believed_leader: leader.clone(),
            is_leader,
        });

        if previous.believed_leader != leader {
            info!(instance = %self.self_id, %leader, "leader changed");
        }
        if previous.is_leader != is_leader {
            if is_leader {
                self.emit(CoordinatorEvent::BecameLeader);
            } else {
                self.emit(CoordinatorEvent::LostLeadership { leader });
            }
        }
    }

    /// Recompute the leader from the live set and broadcast the result.
    fn elect_and_announce(&self) {
        let leader = {
            let peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
            elect(&self.self_id, peers.keys())
        };
        self.set_leader(leader.clone());
        if let Err(e) = self.publish(Message::LeaderElection { leader_id: leader }) {
            warn!(error = %e, "failed to broadcast leader election");
        }
    }

    fn on_frame(&self, frame: &str) {
        let wire = match WireMessage::decode(frame) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };
        if wire.sender_id == self.self_id {
            return;
        }
        let message = match wire.message() {
            Ok(message) => message,
            Err(e) => {
                warn!(sender = %wire.sender_id, kind = ?wire.kind, error = %e, "dropping bad payload");
                return;
            }
        };
        let sender = wire.sender_id;

        match message {
            Message::Heartbeat { .. } => {
                let is_new = {
                    let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
                    peers.insert(sender.clone(), Instant::now()).is_none()
                };
                if is_new {
                    info!(instance = %self.self_id, peer = %sender, "peer joined");
                    self.elect_and_announce();
                }
            }
            Message::LeaderElection { leader_id } => {
                debug!(from = %sender, leader = %leader_id, "leader election received");
                self.set_leader(leader_id);
            }
            Message::TaskClaimed {
                task_id,
                claimed_by,
            } => self.emit(CoordinatorEvent::TaskClaimed {
                task_id,
                claimed_by,
            }),
            Message::TaskCompleted {
                task_id,
                result,
                completed_by,
            } => self.emit(CoordinatorEvent::TaskCompleted {
                task_id,
                result,
                completed_by,
            }),
            Message::StateSync(state) => self.emit(CoordinatorEvent::StateSync {
                from: sender,
                state,
            }),
        }
    }

    /// Evict peers silent for longer than the timeout; re-elect if the leader went.
    fn sweep(&self) {
        let evicted: Vec<InstanceId> = {
            let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
            let timeout = self.config.dead_peer_timeout;
            let dead: Vec<InstanceId> = peers
                .iter()
                .filter(|(_, seen)| seen.elapsed() > timeout)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &dead {
                peers.remove(id);
            }
            dead
        };
        if evicted.is_empty() {
            return;
        }

        for peer in &evicted {
            info!(instance = %self.self_id, %peer, "peer evicted");
        }
        let leader = self.leader.borrow().believed_leader.clone();
        if evicted.contains(&leader) {
            self.elect_and_announce();
        }
    }
}

/// One per process. Dropping it stops heartbeats.
pub struct InstanceCoordinator {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl InstanceCoordinator {
    /// Subscribe to `channel`, run the startup election and spawn the loops.
    ///
    /// When the channel cannot be subscribed the coordinator runs degraded:
    /// nothing is sent and this instance always leads.
    pub fn start(
        self_id: InstanceId,
        channel: Arc<dyn BroadcastChannel>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        match channel.subscribe() {
            Ok(rx) => Self::spawn(self_id, Some(channel), Some(rx), clock, config),
            Err(e) => {
                warn!(instance = %self_id, error = %e, "broadcast unavailable; running as single instance");
                Self::spawn(self_id, None, None, clock, config)
            }
        }
    }

    /// A coordinator with no channel at all.
    pub fn standalone(self_id: InstanceId, clock: Arc<dyn Clock>) -> Self {
        Self::spawn(self_id, None, None, clock, CoordinatorConfig::default())
    }

    fn spawn(
        self_id: InstanceId,
        channel: Option<Arc<dyn BroadcastChannel>>,
        rx: Option<Box<dyn FrameReceiver>>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
    ) -> Self {
        let (leader, _) = watch::channel(LeaderState::solo(self_id.clone()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            self_id,
            channel,
            clock,
            config,
            peers: Mutex::new(HashMap::new()),
            leader,
            events,
        });

        let mut tasks = Vec::new();
        if let Some(rx) = rx {
            shared.elect_and_announce();
            tasks.push(tokio::spawn(heartbeat_loop(shared.clone())));
            tasks.push(tokio::spawn(receive_loop(shared.clone(), rx)));
            info!(instance = %shared.self_id, "coordinator started");
        }

        Self {
            shared,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.shared.self_id
    }

    pub fn is_leader(&self) -> bool {
        self.shared.leader.borrow().is_leader
    }

    pub fn leader(&self) -> InstanceId {
        self.shared.leader.borrow().believed_leader.clone()
    }

    /// No broadcast medium: single-instance mode.
    pub fn is_degraded(&self) -> bool {
        self.shared.channel.is_none()
    }

    /// Live peers (not including self), sorted.
    pub fn peers(&self) -> Vec<InstanceId> {
        let peers = self.shared.peers.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<InstanceId> = peers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn leadership(&self) -> watch::Receiver<LeaderState> {
        self.shared.leader.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.shared.events.subscribe()
    }

    pub fn announce_claimed(&self, task_id: TaskId) -> Result<()> {
        self.shared.publish(Message::TaskClaimed {
            task_id,
            claimed_by: self.shared.self_id.clone(),
        })
    }

    pub fn announce_completed(&self, task_id: TaskId, result: Value) -> Result<()> {
        self.shared.publish(Message::TaskCompleted {
            task_id,
            result,
            completed_by: self.shared.self_id.clone(),
        })
    }

    pub fn sync_state(&self, state: Value) -> Result<()> {
        self.shared.publish(Message::StateSync(state))
    }

    /// Stop heartbeats and receiving. Peers evict this instance after their timeout.
    pub fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        if !tasks.is_empty() {
            info!(instance = %self.shared.self_id, "coordinator stopped");
        }
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for InstanceCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn heartbeat_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let timestamp = shared.clock.now().timestamp_millis();
        if let Err(e) = shared.publish(Message::Heartbeat { timestamp }) {
            warn!(error = %e, "heartbeat not sent");
        }
        shared.sweep();
    }
}

async fn receive_loop(shared: Arc<Shared>, mut rx: Box<dyn FrameReceiver>) {
    while let Some(frame) = rx.recv().await {
        shared.on_frame(&frame);
    }
    // the medium is gone: nobody else can be heard from
    warn!(instance = %shared.self_id, "broadcast channel closed; running as single instance");
    shared
        .peers
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clear();
    shared.set_leader(shared.self_id.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::LocalBus;
    use crate::ports::SystemClock;
    use serde_json::json;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig {
            heartbeat_interval: Duration::from_secs(2),
            dead_peer_timeout: Duration::from_secs(5),
        }
    }

    fn start(id: &str, bus: &LocalBus) -> InstanceCoordinator {
        InstanceCoordinator::start(
            InstanceId::new(id),
            Arc::new(bus.clone()),
            Arc::new(SystemClock),
            config(),
        )
    }

    #[test]
    fn smallest_id_wins() {
        let me = InstanceId::new("b2");
        let peers = [InstanceId::new("c3"), InstanceId::new("a1")];
        assert_eq!(elect(&me, peers.iter()), InstanceId::new("a1"));
        assert_eq!(elect(&me, std::iter::empty()), me);
    }

    #[tokio::test(start_paused = true)]
    async fn two_instances_agree_on_the_smallest_id() {
        let bus = LocalBus::new();
        let a1 = start("a1", &bus);
        let b2 = start("b2", &bus);

        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(a1.leader(), InstanceId::new("a1"));
        assert_eq!(b2.leader(), InstanceId::new("a1"));
        assert!(a1.is_leader());
        assert!(!b2.is_leader());
        assert_eq!(b2.peers(), vec![InstanceId::new("a1")]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_leader_is_evicted_and_replaced() {
        let bus = LocalBus::new();
        let a1 = start("a1", &bus);
        let b2 = start("b2", &bus);
        let mut events = b2.subscribe();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!b2.is_leader());

        a1.shutdown();
        tokio::time::sleep(Duration::from_secs(7)).await;

        assert!(b2.is_leader());
        assert!(b2.peers().is_empty());
        let mut became_leader = false;
        while let Ok(event) = events.try_recv() {
            became_leader |= event == CoordinatorEvent::BecameLeader;
        }
        assert!(became_leader);
    }

    #[tokio::test(start_paused = true)]
    async fn completions_are_relayed_to_siblings_only() {
        let bus = LocalBus::new();
        let a1 = start("a1", &bus);
        let b2 = start("b2", &bus);
        let mut a1_events = a1.subscribe();
        let mut b2_events = b2.subscribe();

        a1.announce_completed(TaskId::new(4), json!({"ok": true}))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut seen = None;
        while let Ok(event) = b2_events.try_recv() {
            if let CoordinatorEvent::TaskCompleted { .. } = event {
                seen = Some(event);
            }
        }
        assert_eq!(
            seen,
            Some(CoordinatorEvent::TaskCompleted {
                task_id: TaskId::new(4),
                result: json!({"ok": true}),
                completed_by: InstanceId::new("a1"),
            })
        );
        while let Ok(event) = a1_events.try_recv() {
            assert!(!matches!(event, CoordinatorEvent::TaskCompleted { .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_channel_degrades_to_leader() {
        let bus = LocalBus::new();
        bus.close();
        let solo = start("z9", &bus);

        assert!(solo.is_degraded());
        assert!(solo.is_leader());
        // announcements are silently skipped
        solo.announce_claimed(TaskId::new(1)).unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_frames_are_ignored() {
        let bus = LocalBus::new();
        let a1 = start("a1", &bus);
        bus.publish("not json".into()).unwrap();
        bus.publish(json!({"type": "HEARTBEAT", "senderId": "x"}).to_string())
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(a1.is_leader());
        assert!(a1.peers().is_empty());
    }
}
