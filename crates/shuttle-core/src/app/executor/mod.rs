//! TaskExecutor - 分離された実行コンテキスト
//!
//! executor は専用の tokio タスクで動き、ホストとはメッセージだけでやり取りします。
//!
//! # フロー
//! 1. `spawn_executor()` で起動 → `READY`
//! 2. `START` / `ADD_TASKS` でキューを受け取る
//! 3. バッチ（既定 50 件）を同期的に実行
//! 4. 自分の inbox に継続メッセージを積んで yield（タイマーは使わない）
//! 5. キューが空になったら `COMPLETED`
//!
//! 継続メッセージは制御メッセージと同じ inbox を通るので、
//! バッチ中に届いた PAUSE / CANCEL は次のバッチより先に処理されます。

pub mod protocol;
mod state;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::ports::TaskHandler;

pub use self::protocol::{ExecutorConfig, Inbound, Outbound};
use self::state::{ExecutorState, Schedule};

/// Everything that lands in the executor inbox.
#[derive(Debug)]
enum Envelope {
    Host(Inbound),
    /// Self-posted yield point for the run with this generation.
    Continue(u64),
}

/// Sending half of the executor inbox. Cheap to clone.
///
/// The context stops once every handle is dropped and its inbox drains.
#[derive(Debug, Clone)]
pub struct ExecutorHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl ExecutorHandle {
    pub fn send(&self, msg: Inbound) -> Result<()> {
        self.tx
            .send(Envelope::Host(msg))
            .map_err(|_| EngineError::ExecutorGone)
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Spawn the executor context. Emits `READY` before anything else.
pub fn spawn_executor(
    handler: Arc<dyn TaskHandler>,
) -> (
    ExecutorHandle,
    mpsc::UnboundedReceiver<Outbound>,
    JoinHandle<()>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let inbox = tx.downgrade();

    let join = tokio::spawn(run(handler, rx, inbox, out_tx));
    (ExecutorHandle { tx }, out_rx, join)
}

async fn run(
    handler: Arc<dyn TaskHandler>,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    inbox: mpsc::WeakUnboundedSender<Envelope>,
    out_tx: mpsc::UnboundedSender<Outbound>,
) {
    let mut state = ExecutorState::new(ExecutorConfig::default());
    let mut out = Vec::new();
    // generation of the continuation currently in the inbox, if any
    let mut pending: Option<u64> = None;

    if out_tx.send(Outbound::Ready).is_err() {
        return;
    }

    while let Some(envelope) = rx.recv().await {
        let next = match envelope {
            Envelope::Host(msg) => state.handle(msg, &mut out),
            Envelope::Continue(generation) => {
                if pending == Some(generation) {
                    pending = None;
                }
                state.resume_run(generation, handler.as_ref(), &mut out)
            }
        };

        for msg in out.drain(..) {
            if out_tx.send(msg).is_err() {
                debug!("executor output closed; stopping");
                return;
            }
        }

        let generation = state.generation();
        if next == Schedule::Yield && pending != Some(generation) {
            // all handles gone means nobody is left to observe the run
            if let Some(tx) = inbox.upgrade() {
                if tx.send(Envelope::Continue(generation)).is_ok() {
                    pending = Some(generation);
                }
            }
            tokio::task::yield_now().await;
        }
    }
    debug!("executor inbox closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, Task, TaskId};
    use chrono::Utc;
    use serde_json::{json, Value};

    fn task(id: u64, name: &str) -> Task {
        Task::pending(TaskId::new(id), NewTask::create_sheet(name), Utc::now())
    }

    fn done() -> Arc<dyn TaskHandler> {
        Arc::new(|_: &Task| -> std::result::Result<Value, String> { Ok(json!({"done": true})) })
    }

    async fn next_named(rx: &mut mpsc::UnboundedReceiver<Outbound>, name: &str) -> Outbound {
        loop {
            let msg = rx.recv().await.unwrap();
            if msg.name() == name {
                return msg;
            }
        }
    }

    #[tokio::test]
    async fn ready_is_emitted_first() {
        let (handle, mut rx, _join) = spawn_executor(done());
        assert_eq!(rx.recv().await, Some(Outbound::Ready));

        handle.send(Inbound::Init(ExecutorConfig { batch_size: 0 })).unwrap();
        // a zero batch would never make progress
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Initialized(ExecutorConfig { batch_size: 1 }))
        );
    }

    #[tokio::test]
    async fn fifo_run_reports_each_task_then_completes() {
        let (handle, mut rx, _join) = spawn_executor(done());
        handle
            .send(Inbound::Start(vec![task(1, "A"), task(2, "B"), task(3, "C")]))
            .unwrap();

        let mut order = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                Outbound::TaskCompleted { task, result, .. } => {
                    assert_eq!(result, json!({"done": true}));
                    order.push(task.id.unwrap().get());
                }
                Outbound::Completed(summary) => {
                    assert_eq!(summary.total, 3);
                    assert_eq!(summary.failed, 0);
                    break;
                }
                _ => {}
            }
        }
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn control_messages_interleave_between_batches() {
        let (handle, mut rx, _join) = spawn_executor(done());
        handle.send(Inbound::Init(ExecutorConfig { batch_size: 1 })).unwrap();
        handle
            .send(Inbound::Start((1..=10).map(|i| task(i, "T")).collect()))
            .unwrap();
        handle.send(Inbound::Pause).unwrap();

        // START's first continuation is queued behind PAUSE
        match next_named(&mut rx, "PAUSED").await {
            Outbound::Paused { progress } => assert_eq!(progress.current, 0),
            other => panic!("unexpected {other:?}"),
        }

        handle.send(Inbound::GetStatus).unwrap();
        match next_named(&mut rx, "STATUS").await {
            Outbound::Status(report) => {
                assert!(report.paused);
                assert_eq!(report.queued, 10);
            }
            other => panic!("unexpected {other:?}"),
        }

        handle.send(Inbound::Cancel).unwrap();
        assert_eq!(
            next_named(&mut rx, "CANCELLED").await,
            Outbound::Cancelled {
                processed: 0,
                discarded: 10
            }
        );
    }

    #[tokio::test]
    async fn start_during_run_is_an_error() {
        let (handle, mut rx, _join) = spawn_executor(done());
        handle.send(Inbound::Start(vec![task(1, "A")])).unwrap();
        handle.send(Inbound::Start(vec![task(2, "B")])).unwrap();

        assert!(matches!(
            next_named(&mut rx, "ERROR").await,
            Outbound::Error { .. }
        ));
        match next_named(&mut rx, "COMPLETED").await {
            Outbound::Completed(summary) => assert_eq!(summary.total, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_every_handle_stops_the_context() {
        let (handle, mut rx, join) = spawn_executor(done());
        drop(handle);
        join.await.unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Ready));
        assert_eq!(rx.recv().await, None);
    }
}
