//! Progress and throughput views shared by the executor protocol and the host API.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percent: f64,
}

impl Progress {
    pub fn new(current: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            (current as f64 / total as f64 * 100.0).min(100.0)
        };
        Self {
            current,
            total,
            percent,
        }
    }
}

/// Throughput of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Tasks per second since the run started.
    pub rate: f64,
    /// Estimated time to drain the queue at `rate`; `None` until a rate exists.
    pub eta: Option<Duration>,
    pub elapsed: Duration,
}

impl Stats {
    pub fn compute(processed: usize, remaining: usize, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };
        let eta = (rate > 0.0).then(|| Duration::from_secs_f64(remaining as f64 / rate));
        Self { rate, eta, elapsed }
    }
}

/// Executor counters as reported by `GET_STATUS`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    pub processing: bool,
    pub paused: bool,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    pub queued: usize,
    pub stats: Stats,
}

/// One result collected during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task_id: Option<TaskId>,
    pub result: Value,
}

/// Terminal summary of a run (`COMPLETED`).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub rate: f64,
    pub results: Vec<CompletedTask>,
    /// Every task the run executed, failed ones included.
    #[serde(default)]
    pub executed: Vec<TaskId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_percent_handles_empty_runs() {
        assert_eq!(Progress::new(0, 0).percent, 0.0);
        assert_eq!(Progress::new(1, 4).percent, 25.0);
        assert_eq!(Progress::new(4, 4).percent, 100.0);
    }

    #[test]
    fn stats_estimate_remaining_time() {
        let stats = Stats::compute(100, 50, Duration::from_secs(2));
        assert_eq!(stats.rate, 50.0);
        assert_eq!(stats.eta, Some(Duration::from_secs(1)));

        let idle = Stats::compute(0, 10, Duration::ZERO);
        assert_eq!(idle.rate, 0.0);
        assert_eq!(idle.eta, None);
    }
}
