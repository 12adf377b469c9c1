//! Orchestrator - executor とホストの状態をつなぐ統合レイヤー
//!
//! # 責務
//! - 起動: ストア → コーディネーター → executor の順に初期化し、残っている pending を再投入
//! - 制御 API: start_processing / add_tasks / pause / resume / cancel / get_status
//! - 結果の反映は `ResultLoop` が担当（非表示中はバッファ）
//!
//! # 設計原則
//! - 永続化してから executor へ渡す（save_tasks が返る前に dispatch しない）
//! - 制御操作は `running` の Mutex で直列化する

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::coordinator::{CoordinatorConfig, InstanceCoordinator};
use super::executor::{spawn_executor, ExecutorConfig, ExecutorHandle, Inbound, Outbound};
use super::result_loop::ResultLoop;
use super::status::EngineView;
use crate::config::EngineConfig;
use crate::domain::{
    EngineStatus, InstanceId, NewTask, Progress, StatusReport, Task, TaskAction, TaskId,
    TaskResult, TaskStatus, Visibility,
};
use crate::error::{EngineError, Result};
use crate::ports::{BroadcastChannel, Clock, FrameClock, HostSink, Notifier, TaskHandler, TaskStore};

/// A completed result waiting to be applied to the host.
#[derive(Debug, Clone)]
pub(crate) struct PendingResult {
    pub task: Task,
    pub result: Value,
}

/// State shared between the control API and the result loop.
pub(crate) struct Shared {
    pub store: Arc<dyn TaskStore>,
    pub host: Arc<dyn HostSink>,
    pub notifier: Arc<dyn Notifier>,
    pub frames: Arc<dyn FrameClock>,
    pub config: EngineConfig,
    pub view: watch::Sender<EngineView>,
    pub buffer: Mutex<Vec<PendingResult>>,
    pub status_waiters: Mutex<Vec<oneshot::Sender<StatusReport>>>,
    /// `START` / `ADD_TASKS` messages handed to the executor, counted before persisting.
    pub dispatched: AtomicU64,
}

impl Shared {
    pub fn set_status(&self, status: EngineStatus) {
        self.view.send_modify(|v| v.status = status);
    }

    /// Fatal error: status `error`, reported to the host.
    pub fn fail(&self, err: &EngineError) {
        error!(error = %err, "engine error");
        let message = err.to_string();
        self.view.send_modify(|v| {
            v.status = EngineStatus::Error;
            v.last_error = Some(message.clone());
        });
        self.host.on_error(&message);
    }

    /// Hand one result to the host callback matching its action.
    pub fn apply(&self, pending: &PendingResult) {
        let PendingResult { task, result } = pending;
        match &task.action {
            TaskAction::UpdateCell { sheet, cell, .. } => {
                self.host.on_cell_update(task, sheet, cell, result)
            }
            TaskAction::CreateSheet { name } => self.host.on_sheet_created(task, name, result),
            TaskAction::CreateChart { sheet, range, .. } => {
                self.host.on_chart_created(task, sheet, range, result)
            }
            TaskAction::Other { .. } => self.host.on_result(task, result),
        }
    }

    pub fn buffer(&self, pending: PendingResult) {
        let count = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(pending);
            buffer.len()
        };
        self.view.send_modify(|v| v.buffered = count);
    }

    pub fn has_buffered(&self) -> bool {
        !self
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Apply every buffered result in arrival order.
    pub fn flush(&self) -> usize {
        let drained = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(|e| e.into_inner()));
        for pending in &drained {
            self.apply(pending);
        }
        self.view.send_modify(|v| v.buffered = 0);
        if !drained.is_empty() {
            info!(count = drained.len(), "flushed buffered results");
        }
        drained.len()
    }

    pub fn discard_buffer(&self) {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.view.send_modify(|v| v.buffered = 0);
    }

    pub fn resolve_status(&self, report: &StatusReport) {
        let waiters =
            std::mem::take(&mut *self.status_waiters.lock().unwrap_or_else(|e| e.into_inner()));
        for waiter in waiters {
            let _ = waiter.send(report.clone());
        }
    }
}

/// Live parts created by `initialize()`.
struct Running {
    executor: ExecutorHandle,
    coordinator: Arc<InstanceCoordinator>,
    shutdown_tx: watch::Sender<bool>,
    result_loop: JoinHandle<()>,
}

/// Host-owned engine. Build with `OrchestratorBuilder`.
pub struct Orchestrator {
    shared: Arc<Shared>,
    handler: Arc<dyn TaskHandler>,
    instance_id: InstanceId,
    channel: Option<Arc<dyn BroadcastChannel>>,
    clock: Arc<dyn Clock>,
    visibility: watch::Receiver<Visibility>,
    // keeps the default always-foreground source open
    _visibility_tx: Option<watch::Sender<Visibility>>,
    running: tokio::sync::Mutex<Option<Running>>,
}

pub(crate) struct Parts {
    pub store: Arc<dyn TaskStore>,
    pub handler: Arc<dyn TaskHandler>,
    pub host: Arc<dyn HostSink>,
    pub notifier: Arc<dyn Notifier>,
    pub frames: Arc<dyn FrameClock>,
    pub channel: Option<Arc<dyn BroadcastChannel>>,
    pub clock: Arc<dyn Clock>,
    pub instance_id: InstanceId,
    pub visibility: watch::Receiver<Visibility>,
    pub visibility_tx: Option<watch::Sender<Visibility>>,
    pub config: EngineConfig,
}

async fn wait_for(outbound: &mut mpsc::UnboundedReceiver<Outbound>, name: &str) -> Result<()> {
    while let Some(msg) = outbound.recv().await {
        if msg.name() == name {
            return Ok(());
        }
        debug!(message = msg.name(), "ignored during startup");
    }
    Err(EngineError::ExecutorGone)
}

impl Orchestrator {
    pub(crate) fn from_parts(parts: Parts) -> Self {
        let (view, _) = watch::channel(EngineView::new(parts.instance_id.clone()));
        Self {
            shared: Arc::new(Shared {
                store: parts.store,
                host: parts.host,
                notifier: parts.notifier,
                frames: parts.frames,
                config: parts.config,
                view,
                buffer: Mutex::new(Vec::new()),
                status_waiters: Mutex::new(Vec::new()),
                dispatched: AtomicU64::new(0),
            }),
            handler: parts.handler,
            instance_id: parts.instance_id,
            channel: parts.channel,
            clock: parts.clock,
            visibility: parts.visibility,
            _visibility_tx: parts.visibility_tx,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Open the store, join the sibling instances, start the executor and
    /// replay pending tasks. Calling it again is a no-op.
    pub async fn initialize(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }
        let shared = &self.shared;
        shared.set_status(EngineStatus::Initializing);

        if let Err(e) = shared.store.initialize().await {
            shared.fail(&e);
            return Err(e);
        }

        let coordinator = Arc::new(match &self.channel {
            Some(channel) => InstanceCoordinator::start(
                self.instance_id.clone(),
                channel.clone(),
                self.clock.clone(),
                CoordinatorConfig::from(&shared.config),
            ),
            None => InstanceCoordinator::standalone(self.instance_id.clone(), self.clock.clone()),
        });
        let is_leader = coordinator.is_leader();
        shared.view.send_modify(|v| v.is_leader = is_leader);

        let (executor, mut outbound, _join) = spawn_executor(self.handler.clone());
        let ready = async {
            wait_for(&mut outbound, Outbound::Ready.name()).await?;
            executor.send(Inbound::Init(ExecutorConfig {
                batch_size: shared.config.batch_size,
            }))?;
            wait_for(&mut outbound, "INITIALIZED").await
        };
        if let Err(e) = ready.await {
            shared.fail(&e);
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let result_loop = ResultLoop::new(
            shared.clone(),
            outbound,
            executor.clone(),
            coordinator.clone(),
            self.visibility.clone(),
            shutdown_rx,
        );
        let result_loop = tokio::spawn(result_loop.run());

        let live = Running {
            executor,
            coordinator,
            shutdown_tx,
            result_loop,
        };
        shared.set_status(EngineStatus::Idle);
        info!(instance = %self.instance_id, "engine initialized");

        if shared.config.auto_recover {
            let pending = match shared.store.get_pending_tasks().await {
                Ok(pending) => pending,
                Err(e) => {
                    shared.fail(&e);
                    *running = Some(live);
                    return Err(e);
                }
            };
            if !pending.is_empty() {
                info!(count = pending.len(), "recovering pending tasks");
                shared.dispatched.fetch_add(1, Ordering::SeqCst);
                self.dispatch(&live, pending, false)?;
            }
        }

        *running = Some(live);
        Ok(())
    }

    /// Persist `tasks` and start a run. Fails with `AlreadyProcessing` while a run is active.
    pub async fn start_processing(&self, tasks: Vec<NewTask>) -> Result<Vec<TaskId>> {
        let running = self.running.lock().await;
        let live = running.as_ref().ok_or(EngineError::NotInitialized)?;
        if self.shared.view.borrow().is_active() {
            return Err(EngineError::AlreadyProcessing);
        }

        let saved = self.persist(tasks).await?;
        let ids = saved.iter().filter_map(|t| t.id).collect();
        self.dispatch(live, saved, false)?;
        Ok(ids)
    }

    /// Persist `tasks` and append them to the live run (or start one when idle).
    pub async fn add_tasks(&self, tasks: Vec<NewTask>) -> Result<Vec<TaskId>> {
        let running = self.running.lock().await;
        let live = running.as_ref().ok_or(EngineError::NotInitialized)?;

        let saved = self.persist(tasks).await?;
        let ids = saved.iter().filter_map(|t| t.id).collect();
        self.dispatch(live, saved, true)?;
        Ok(ids)
    }

    pub async fn pause(&self) -> Result<()> {
        self.send(Inbound::Pause).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(Inbound::Resume).await
    }

    /// Stop the run, drop its queue, clear the task and result tables and buffered results.
    pub async fn cancel(&self) -> Result<()> {
        let running = self.running.lock().await;
        let live = running.as_ref().ok_or(EngineError::NotInitialized)?;

        live.executor.send(Inbound::Cancel)?;
        self.shared.discard_buffer();
        self.shared.set_status(EngineStatus::Idle);
        let store = &self.shared.store;
        let cleared = async {
            store.clear_all_tasks().await?;
            store.clear_results().await
        };
        if let Err(e) = cleared.await {
            self.shared.fail(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Ask the executor for its counters.
    pub async fn get_status(&self) -> Result<StatusReport> {
        let rx = {
            let running = self.running.lock().await;
            let live = running.as_ref().ok_or(EngineError::NotInitialized)?;
            let (tx, rx) = oneshot::channel();
            self.shared
                .status_waiters
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(tx);
            live.executor.send(Inbound::GetStatus)?;
            rx
        };
        rx.await.map_err(|_| EngineError::ExecutorGone)
    }

    pub fn view(&self) -> EngineView {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineView> {
        self.shared.view.subscribe()
    }

    pub fn is_leader(&self) -> bool {
        self.shared.view.borrow().is_leader
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.shared.store
    }

    /// Results recorded at or after `since`.
    pub async fn results_since(&self, since: DateTime<Utc>) -> Result<Vec<TaskResult>> {
        self.shared.store.get_results(since).await
    }

    /// Broadcast free-form host state to sibling instances.
    pub async fn sync_state(&self, state: Value) -> Result<()> {
        let running = self.running.lock().await;
        let live = running.as_ref().ok_or(EngineError::NotInitialized)?;
        live.coordinator.sync_state(state)
    }

    /// Stop the result loop, the coordinator and the executor. Persisted
    /// pending tasks stay in the store for the next `initialize()`.
    pub async fn shutdown(&self) {
        let Some(live) = self.running.lock().await.take() else {
            return;
        };
        let _ = live.shutdown_tx.send(true);
        live.coordinator.shutdown();
        if let Err(e) = live.result_loop.await {
            debug!(error = %e, "result loop ended abnormally");
        }
        info!(instance = %self.instance_id, "engine stopped");
    }

    async fn send(&self, msg: Inbound) -> Result<()> {
        let running = self.running.lock().await;
        let live = running.as_ref().ok_or(EngineError::NotInitialized)?;
        live.executor.send(msg)
    }

    /// Save `tasks` for the dispatch that follows. The dispatch is counted
    /// first, so a `COMPLETED` still queued for the result loop reads as stale.
    async fn persist(&self, tasks: Vec<NewTask>) -> Result<Vec<Task>> {
        self.shared.dispatched.fetch_add(1, Ordering::SeqCst);
        match self.shared.store.save_tasks(tasks).await {
            Ok(saved) => Ok(saved),
            Err(e) => {
                self.shared.dispatched.fetch_sub(1, Ordering::SeqCst);
                self.shared.fail(&e);
                Err(e)
            }
        }
    }

    fn dispatch(&self, live: &Running, mut tasks: Vec<Task>, append: bool) -> Result<()> {
        let now = self.clock.now();
        for task in &mut tasks {
            // store records stay pending until their result is saved
            if let Err(e) = task.transition(TaskStatus::Processing, now) {
                debug!(task_id = ?task.id, error = %e, "task not marked processing");
            }
            if let Some(id) = task.id {
                if let Err(e) = live.coordinator.announce_claimed(id) {
                    debug!(task_id = %id, error = %e, "claim not announced");
                }
            }
        }

        let count = tasks.len();
        self.shared.view.send_modify(|v| {
            if v.is_active() {
                v.progress = Progress::new(v.progress.current, v.progress.total + count);
            } else {
                v.status = EngineStatus::Processing;
                v.progress = Progress::new(0, count);
                v.last_error = None;
            }
        });

        let msg = if append {
            Inbound::AddTasks(tasks)
        } else {
            Inbound::Start(tasks)
        };
        if let Err(e) = live.executor.send(msg) {
            self.shared.fail(&e);
            return Err(e);
        }
        Ok(())
    }
}
