//! ResultLoop - executor の出力をホストの状態に反映するループ
//!
//! # フロー
//! 1. `TASK_COMPLETED` → 結果を追記 → タスクを completed に → 兄弟へ通知
//! 2. 表示中ならすぐ反映、非表示ならバッファ
//! 3. 表示に戻ったら次のフレームでバッファを到着順に flush
//! 4. `COMPLETED` → 実行したタスクを削除 → on_complete → 非表示なら通知
//!    新しい dispatch がまだ確認されていなければ、その `COMPLETED` は前の run のもの
//!
//! 同時に、リーダーシップの変化と兄弟インスタンスの完了通知をホストへ中継します。

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::coordinator::{InstanceCoordinator, LeaderState};
use super::executor::{ExecutorHandle, Inbound, Outbound};
use super::orchestrator::{PendingResult, Shared};
use crate::domain::{
    CoordinatorEvent, EngineStatus, Progress, RunSummary, Stats, Task, TaskStatus, Visibility,
};
use crate::error::EngineError;

type FrameWait = Pin<Box<dyn Future<Output = ()> + Send>>;

async fn wait_frame(frame: &mut Option<FrameWait>) {
    match frame {
        Some(wait) => wait.await,
        None => std::future::pending().await,
    }
}

pub(crate) struct ResultLoop {
    shared: Arc<Shared>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    executor: ExecutorHandle,
    coordinator: Arc<InstanceCoordinator>,
    events: broadcast::Receiver<CoordinatorEvent>,
    leadership: watch::Receiver<LeaderState>,
    visibility: watch::Receiver<Visibility>,
    shutdown: watch::Receiver<bool>,
    frame: Option<FrameWait>,
    run_started: Option<Instant>,
    /// `Started` / `TasksAdded` / `Error` seen so far; lags `Shared::dispatched`
    /// while a newer dispatch is still on its way.
    acked: u64,
    events_open: bool,
    leadership_open: bool,
    visibility_open: bool,
}

impl ResultLoop {
    pub(crate) fn new(
        shared: Arc<Shared>,
        outbound: mpsc::UnboundedReceiver<Outbound>,
        executor: ExecutorHandle,
        coordinator: Arc<InstanceCoordinator>,
        visibility: watch::Receiver<Visibility>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            events: coordinator.subscribe(),
            leadership: coordinator.leadership(),
            shared,
            outbound,
            executor,
            coordinator,
            visibility,
            shutdown,
            frame: None,
            run_started: None,
            acked: 0,
            events_open: true,
            leadership_open: true,
            visibility_open: true,
        }
    }

    fn is_foreground(&self) -> bool {
        self.visibility.borrow().is_foreground()
    }

    fn schedule_flush(&mut self) {
        if self.frame.is_none() {
            let frames = self.shared.frames.clone();
            self.frame = Some(Box::pin(async move { frames.next_frame().await }));
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.changed() => break,

                msg = self.outbound.recv() => match msg {
                    Some(msg) => self.on_executor(msg).await,
                    None => {
                        self.shared.fail(&EngineError::ExecutorGone);
                        break;
                    }
                },

                changed = self.visibility.changed(), if self.visibility_open => {
                    if changed.is_err() {
                        self.visibility_open = false;
                        continue;
                    }
                    let visibility = *self.visibility.borrow_and_update();
                    debug!(?visibility, "visibility changed");
                    if visibility.is_foreground() && self.shared.has_buffered() {
                        self.schedule_flush();
                    }
                }

                changed = self.leadership.changed(), if self.leadership_open => {
                    if changed.is_err() {
                        self.leadership_open = false;
                        continue;
                    }
                    let is_leader = self.leadership.borrow_and_update().is_leader;
                    self.on_leadership(is_leader);
                }

                event = self.events.recv(), if self.events_open => match event {
                    Ok(event) => self.on_coordinator(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "coordinator events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => self.events_open = false,
                },

                _ = wait_frame(&mut self.frame) => {
                    self.frame = None;
                    if self.is_foreground() {
                        self.shared.flush();
                    }
                }
            }
        }
        debug!("result loop stopped");
    }

    fn on_leadership(&self, is_leader: bool) {
        let changed = self.shared.view.send_if_modified(|v| {
            let changed = v.is_leader != is_leader;
            v.is_leader = is_leader;
            changed
        });
        if changed {
            info!(is_leader, "leadership changed");
            self.shared.host.on_leadership_change(is_leader);
        }
    }

    fn on_coordinator(&self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::TaskCompleted {
                task_id,
                result,
                completed_by,
            } => {
                debug!(%task_id, %completed_by, "remote completion");
                self.shared
                    .host
                    .on_remote_completion(task_id, &result, &completed_by);
            }
            CoordinatorEvent::TaskClaimed {
                task_id,
                claimed_by,
            } => debug!(%task_id, %claimed_by, "remote claim"),
            CoordinatorEvent::StateSync { from, .. } => debug!(%from, "state sync received"),
            // leadership is read from the watch channel
            CoordinatorEvent::BecameLeader | CoordinatorEvent::LostLeadership { .. } => {}
        }
    }

    fn update_progress(&mut self, progress: Progress) {
        let elapsed = self.run_started.map(|t| t.elapsed()).unwrap_or_default();
        let remaining = progress.total.saturating_sub(progress.current);
        let stats = Stats::compute(progress.current, remaining, elapsed);
        self.shared.view.send_modify(|v| {
            v.progress = progress;
            v.stats = stats;
        });
        self.shared.host.on_progress(&progress);
    }

    async fn on_executor(&mut self, msg: Outbound) {
        match msg {
            Outbound::Ready => debug!("executor ready"),
            Outbound::Initialized(config) => {
                debug!(batch_size = config.batch_size, "executor initialized")
            }
            // status is set by dispatch() / cancel(); these may belong to a cancelled run
            Outbound::Started { total } => {
                self.acked += 1;
                self.run_started = Some(Instant::now());
                self.update_progress(Progress::new(0, total));
            }
            Outbound::TasksAdded { added, total } => {
                self.acked += 1;
                debug!(added, total, "tasks added");
                let current = self.shared.view.borrow().progress.current;
                self.update_progress(Progress::new(current, total));
            }
            Outbound::TaskCompleted {
                task,
                result,
                progress,
            } => {
                self.on_task_completed(task, result).await;
                self.update_progress(progress);
            }
            Outbound::TaskError {
                task,
                error,
                progress,
            } => {
                let err = EngineError::task_failed(task.id, error);
                warn!(action = task.action_name(), error = %err, "task error");
                self.shared.host.on_error(&err.to_string());
                self.update_progress(progress);
            }
            Outbound::Paused { progress } => {
                self.shared.view.send_modify(|v| {
                    if v.status == EngineStatus::Processing {
                        v.status = EngineStatus::Paused;
                    }
                    v.progress = progress;
                });
            }
            Outbound::Resumed => {
                self.shared.view.send_modify(|v| {
                    if v.status == EngineStatus::Paused {
                        v.status = EngineStatus::Processing;
                    }
                });
            }
            Outbound::Cancelled {
                processed,
                discarded,
            } => {
                info!(processed, discarded, "run cancelled");
                self.run_started = None;
            }
            Outbound::Status(report) => {
                self.shared.view.send_modify(|v| v.stats = report.stats);
                self.shared.resolve_status(&report);
            }
            Outbound::Completed(summary) => self.on_completed(summary).await,
            Outbound::Error { message } => {
                self.acked += 1;
                warn!(%message, "executor rejected a request");
                self.shared.host.on_error(&message);
            }
        }
    }

    async fn on_task_completed(&mut self, task: Task, result: Value) {
        if let Some(id) = task.id {
            let store = self.shared.store.clone();
            if let Err(e) = store.save_result(id, result.clone()).await {
                self.abort_run(&e);
                return;
            }
            match store.update_task_status(id, TaskStatus::Completed).await {
                Ok(_) => {}
                Err(e @ EngineError::StoreUnavailable(_)) => {
                    self.abort_run(&e);
                    return;
                }
                // e.g. the task table was cleared by cancel()
                Err(e) => debug!(task_id = %id, error = %e, "task record not updated"),
            }
            if let Err(e) = self.coordinator.announce_completed(id, result.clone()) {
                debug!(task_id = %id, error = %e, "completion not announced");
            }
        } else {
            warn!(action = task.action_name(), "completed task has no id; result not persisted");
        }

        let pending = PendingResult { task, result };
        let foreground = self.is_foreground();
        if foreground && !self.shared.has_buffered() {
            self.shared.apply(&pending);
            return;
        }
        // earlier results still waiting: keep arrival order
        self.shared.buffer(pending);
        if foreground {
            self.schedule_flush();
        } else {
            debug!("result buffered while hidden");
        }
    }

    /// The store failed mid-run: stop the executor and keep pending records for replay.
    fn abort_run(&self, err: &EngineError) {
        error!(error = %err, "aborting run");
        self.shared.fail(err);
        if let Err(e) = self.executor.send(Inbound::Cancel) {
            debug!(error = %e, "executor already gone");
        }
    }

    async fn on_completed(&mut self, summary: RunSummary) {
        let foreground = self.is_foreground();
        if foreground {
            self.shared.flush();
        } else if self.shared.has_buffered() {
            debug!("holding buffered results until the surface is visible");
        }

        // completed records left by an earlier session go too; pending ones stay for the next run
        let store = self.shared.store.clone();
        let removed = async {
            let executed = store.remove_tasks(summary.executed.clone()).await?;
            Ok::<_, EngineError>(executed + store.remove_completed_tasks().await?)
        };
        match removed.await {
            Ok(removed) => debug!(removed, "finished tasks removed"),
            Err(e) => self.shared.fail(&e),
        }

        let stale = self.acked < self.shared.dispatched.load(Ordering::SeqCst);
        if stale {
            debug!(total = summary.total, "a newer dispatch is pending; status left as is");
        } else {
            self.clear_results_if_drained().await;
            self.run_started = None;
            let total = summary.total;
            // cancel() already moved an active view to idle
            self.shared.view.send_if_modified(|v| {
                if !v.is_active() {
                    return false;
                }
                v.status = EngineStatus::Completed;
                v.progress = Progress::new(total, total);
                v.stats = Stats {
                    rate: summary.rate,
                    eta: None,
                    elapsed: summary.elapsed,
                };
                true
            });
        }
        self.shared.host.on_complete(&summary);

        if !foreground && self.shared.config.notify_when_hidden {
            if self.shared.notifier.permission_granted() {
                let body = format!("{} tasks processed ({} failed)", summary.total, summary.failed);
                self.shared.notifier.notify("Processing complete", &body);
            } else {
                debug!("notification permission not granted");
            }
        }
    }

    /// Results are cleared together with the queue: once no task record is left.
    async fn clear_results_if_drained(&mut self) {
        let store = &self.shared.store;
        let drained = match store.count_by_status().await {
            Ok(counts) => counts.values().all(|&n| n == 0),
            Err(e) => {
                self.shared.fail(&e);
                return;
            }
        };
        if drained {
            if let Err(e) = store.clear_results().await {
                self.shared.fail(&e);
            }
        }
    }
}
