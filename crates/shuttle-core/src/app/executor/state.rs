//! ExecutorState - executor タスクが所有する状態（グローバル変数なし）
//!
//! 状態遷移:
//! - idle → processing → completed (→ idle)
//! - processing ⇄ paused
//! - processing / paused → idle（cancel）
//!
//! ここは純粋なロジックだけで、チャネルには触れません。
//! `Schedule::Yield` が返ったら、ループ側が自分の inbox に継続メッセージを積みます。

use std::collections::VecDeque;

use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::protocol::{ExecutorConfig, Inbound, Outbound};
use crate::domain::{CompletedTask, Progress, RunSummary, Stats, StatusReport, Task, TaskId};
use crate::ports::TaskHandler;

/// What the loop should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Schedule {
    /// Post a continuation for the current run.
    Yield,
    Nothing,
}

#[derive(Debug)]
pub(crate) struct ExecutorState {
    config: ExecutorConfig,
    queue: VecDeque<Task>,
    processing: bool,
    paused: bool,
    processed: usize,
    failed: usize,
    total: usize,
    results: Vec<CompletedTask>,
    executed: Vec<TaskId>,
    started_at: Option<Instant>,
    /// Bumped per run so continuations from a cancelled run are ignored.
    generation: u64,
}

impl ExecutorState {
    pub(crate) fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            processing: false,
            paused: false,
            processed: 0,
            failed: 0,
            total: 0,
            results: Vec::new(),
            executed: Vec::new(),
            started_at: None,
            generation: 0,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub(crate) fn is_processing(&self) -> bool {
        self.processing
    }

    fn progress(&self) -> Progress {
        Progress::new(self.processed, self.total)
    }

    fn stats(&self) -> Stats {
        let elapsed = self.started_at.map(|t| t.elapsed()).unwrap_or_default();
        Stats::compute(self.processed, self.queue.len(), elapsed)
    }

    fn begin_run(&mut self, tasks: Vec<Task>) {
        self.queue = tasks.into();
        self.total = self.queue.len();
        self.processed = 0;
        self.failed = 0;
        self.results.clear();
        self.executed.clear();
        self.paused = false;
        self.processing = true;
        self.started_at = Some(Instant::now());
        self.generation += 1;
        info!(total = self.total, generation = self.generation, "run started");
    }

    /// Apply one host message.
    pub(crate) fn handle(&mut self, msg: Inbound, out: &mut Vec<Outbound>) -> Schedule {
        debug!(message = msg.name(), "executor inbound");
        match msg {
            Inbound::Init(config) => {
                self.config = ExecutorConfig {
                    batch_size: config.batch_size.max(1),
                };
                out.push(Outbound::Initialized(self.config));
                Schedule::Nothing
            }
            Inbound::Start(tasks) => {
                if self.processing {
                    out.push(Outbound::Error {
                        message: "a processing run is already active".into(),
                    });
                    return Schedule::Nothing;
                }
                self.begin_run(tasks);
                out.push(Outbound::Started { total: self.total });
                Schedule::Yield
            }
            Inbound::AddTasks(tasks) => {
                let added = tasks.len();
                if !self.processing {
                    // nothing running: the added tasks form a fresh run
                    self.begin_run(tasks);
                    out.push(Outbound::Started { total: self.total });
                    return Schedule::Yield;
                }
                self.queue.extend(tasks);
                self.total += added;
                out.push(Outbound::TasksAdded {
                    added,
                    total: self.total,
                });
                if self.paused {
                    Schedule::Nothing
                } else {
                    Schedule::Yield
                }
            }
            Inbound::Pause => {
                if self.processing && !self.paused {
                    self.paused = true;
                    info!(processed = self.processed, "run paused");
                    out.push(Outbound::Paused {
                        progress: self.progress(),
                    });
                }
                Schedule::Nothing
            }
            Inbound::Resume => {
                if self.processing && self.paused {
                    self.paused = false;
                    info!(remaining = self.queue.len(), "run resumed");
                    out.push(Outbound::Resumed);
                    return Schedule::Yield;
                }
                Schedule::Nothing
            }
            Inbound::Cancel => {
                let discarded = self.queue.len();
                let processed = self.processed;
                self.queue.clear();
                self.results.clear();
                self.executed.clear();
                self.processing = false;
                self.paused = false;
                self.generation += 1;
                info!(processed, discarded, "run cancelled");
                out.push(Outbound::Cancelled {
                    processed,
                    discarded,
                });
                Schedule::Nothing
            }
            Inbound::GetStatus => {
                out.push(Outbound::Status(StatusReport {
                    processing: self.processing,
                    paused: self.paused,
                    processed: self.processed,
                    failed: self.failed,
                    total: self.total,
                    queued: self.queue.len(),
                    stats: self.stats(),
                }));
                Schedule::Nothing
            }
        }
    }

    /// Handle a continuation: run one batch, or finish the run.
    pub(crate) fn resume_run(
        &mut self,
        generation: u64,
        handler: &dyn TaskHandler,
        out: &mut Vec<Outbound>,
    ) -> Schedule {
        if generation != self.generation || !self.processing || self.paused {
            return Schedule::Nothing;
        }
        if self.queue.is_empty() {
            self.finish(out);
            return Schedule::Nothing;
        }
        self.run_batch(handler, out);
        trace!(
            processed = self.processed,
            remaining = self.queue.len(),
            "batch done; yielding"
        );
        Schedule::Yield
    }

    fn run_batch(&mut self, handler: &dyn TaskHandler, out: &mut Vec<Outbound>) {
        for _ in 0..self.config.batch_size {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            self.executed.extend(task.id);
            match handler.execute(&task) {
                Ok(result) => {
                    self.processed += 1;
                    self.results.push(CompletedTask {
                        task_id: task.id,
                        result: result.clone(),
                    });
                    out.push(Outbound::TaskCompleted {
                        task,
                        result,
                        progress: self.progress(),
                    });
                }
                Err(error) => {
                    self.processed += 1;
                    self.failed += 1;
                    warn!(task_id = ?task.id, action = task.action_name(), %error, "task failed");
                    out.push(Outbound::TaskError {
                        task,
                        error,
                        progress: self.progress(),
                    });
                }
            }
        }
    }

    fn finish(&mut self, out: &mut Vec<Outbound>) {
        let stats = self.stats();
        let summary = RunSummary {
            total: self.total,
            failed: self.failed,
            elapsed: stats.elapsed,
            rate: stats.rate,
            results: std::mem::take(&mut self.results),
            executed: std::mem::take(&mut self.executed),
        };
        self.processing = false;
        self.paused = false;
        info!(
            total = summary.total,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run completed"
        );
        out.push(Outbound::Completed(summary));
    }
}
