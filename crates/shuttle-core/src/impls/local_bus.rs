//! LocalBus - 同一プロセス内のブロードキャスト媒体
//!
//! 複数の `Orchestrator`（= 兄弟インスタンス）を 1 プロセスで動かすためのものです。
//! デモとテストで使います。
//!
//! # 実装詳細
//! - tokio::sync::broadcast の上に `BroadcastChannel` を載せるだけ
//! - 遅い購読者はフレームを取りこぼす（Lagged）。媒体の best-effort 性と同じ扱い
//! - `close()` 以降は publish / subscribe とも `CoordinatorUnavailable`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::ports::{BroadcastChannel, FrameReceiver};

const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out of JSON frames. Clones share the same bus.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Refuse further publishes and subscriptions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngineError::CoordinatorUnavailable("local bus closed".into()));
        }
        Ok(())
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastChannel for LocalBus {
    fn publish(&self, frame: String) -> Result<()> {
        self.check_open()?;
        // no subscribers is not an error for a broadcast medium
        let _ = self.tx.send(frame);
        Ok(())
    }

    fn subscribe(&self) -> Result<Box<dyn FrameReceiver>> {
        self.check_open()?;
        Ok(Box::new(LocalReceiver {
            rx: self.tx.subscribe(),
            closed: self.closed.clone(),
        }))
    }
}

struct LocalReceiver {
    rx: broadcast::Receiver<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl FrameReceiver for LocalReceiver {
    async fn recv(&mut self) -> Option<String> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "local bus subscriber lagged; frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_every_frame() {
        let bus = LocalBus::new();
        let mut a = bus.subscribe().unwrap();
        let mut b = bus.subscribe().unwrap();

        bus.publish("one".into()).unwrap();
        bus.publish("two".into()).unwrap();

        assert_eq!(a.recv().await.as_deref(), Some("one"));
        assert_eq!(a.recv().await.as_deref(), Some("two"));
        assert_eq!(b.recv().await.as_deref(), Some("one"));
    }

    #[tokio::test]
    async fn closed_bus_is_unavailable() {
        let bus = LocalBus::new();
        bus.close();

        let err = bus.publish("x".into()).unwrap_err();
        assert!(matches!(err, EngineError::CoordinatorUnavailable(_)));
        assert!(bus.subscribe().is_err());
    }

    #[tokio::test]
    async fn lagged_subscriber_skips_to_newest() {
        let bus = LocalBus::with_capacity(2);
        let mut rx = bus.subscribe().unwrap();
        for i in 0..5 {
            bus.publish(format!("f{i}")).unwrap();
        }
        assert_eq!(rx.recv().await.as_deref(), Some("f3"));
        assert_eq!(rx.recv().await.as_deref(), Some("f4"));
    }
}
