//! shuttle - demo driver for shuttle-core
//!
//! N 個のインスタンスを同一プロセス内の LocalBus でつなぎ、
//! 先頭のインスタンスにスプレッドシート風のタスクを投入して完了を待ちます。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use serde_json::{Value, json};
use shuttle_core::domain::{EngineStatus, NewTask, Progress, RunSummary, Task, TaskAction};
use shuttle_core::impls::{LocalBus, RedbTaskStore};
use shuttle_core::ports::HostSink;
use shuttle_core::{EngineConfig, Orchestrator, OrchestratorBuilder};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "shuttle", about = "Run a batch of tasks through the shuttle engine")]
struct Args {
    /// TOML config file
    #[arg(long, env = "SHUTTLE_CONFIG")]
    config: Option<PathBuf>,

    /// Sibling instances sharing one bus
    #[arg(long, default_value_t = 2)]
    instances: usize,

    /// Tasks submitted to the first instance
    #[arg(long, default_value_t = 100)]
    tasks: usize,

    /// Store file; instance i uses `<stem>.<i>.redb`
    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,
}

/// Logs every callback.
struct TracingHost {
    instance: usize,
}

impl HostSink for TracingHost {
    fn on_cell_update(&self, _task: &Task, sheet: &str, cell: &str, value: &Value) {
        info!(instance = self.instance, sheet, cell, %value, "cell updated");
    }

    fn on_sheet_created(&self, _task: &Task, name: &str, _result: &Value) {
        info!(instance = self.instance, name, "sheet created");
    }

    fn on_complete(&self, summary: &RunSummary) {
        info!(
            instance = self.instance,
            total = summary.total,
            failed = summary.failed,
            rate = summary.rate,
            "run complete"
        );
    }

    fn on_error(&self, message: &str) {
        warn!(instance = self.instance, message, "engine error");
    }

    fn on_progress(&self, progress: &Progress) {
        if progress.current % 25 == 0 {
            info!(instance = self.instance, current = progress.current, total = progress.total, "progress");
        }
    }

    fn on_leadership_change(&self, is_leader: bool) {
        info!(instance = self.instance, is_leader, "leadership changed");
    }
}

/// `=a*b`, `=a+b` or `=a` over numbers.
fn evaluate(formula: &str) -> Result<Value, String> {
    let expr = formula
        .strip_prefix('=')
        .ok_or_else(|| format!("not a formula: {formula}"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| format!("bad operand '{s}': {e}"))
    };
    let value = if let Some((a, b)) = expr.split_once('*') {
        parse(a)? * parse(b)?
    } else if let Some((a, b)) = expr.split_once('+') {
        parse(a)? + parse(b)?
    } else {
        parse(expr)?
    };
    Ok(json!(value))
}

fn update_cell(task: &Task) -> Result<Value, String> {
    match &task.action {
        TaskAction::UpdateCell { formula, .. } => evaluate(formula),
        other => Err(format!("unexpected action {}", other.name())),
    }
}

fn create_sheet(_: &Task) -> Result<Value, String> {
    Ok(json!({ "created": true }))
}

fn store_path(base: &std::path::Path, instance: usize) -> PathBuf {
    base.with_extension(format!("{instance}.redb"))
}

fn build(
    instance: usize,
    config: &EngineConfig,
    base: &std::path::Path,
    bus: &LocalBus,
) -> anyhow::Result<Orchestrator> {
    let engine = OrchestratorBuilder::new()
        .config(config.clone())
        .store(Arc::new(RedbTaskStore::new(store_path(base, instance))))
        .register(TaskAction::UPDATE_CELL, update_cell)?
        .register(TaskAction::CREATE_SHEET, create_sheet)?
        .expect_actions(&[TaskAction::UPDATE_CELL, TaskAction::CREATE_SHEET])
        .host(Arc::new(TracingHost { instance }))
        .channel(Arc::new(bus.clone()))
        .instance_id(format!("instance-{instance:03}").as_str())
        .build()?;
    Ok(engine)
}

fn demo_tasks(count: usize) -> Vec<NewTask> {
    let mut tasks = vec![NewTask::create_sheet("Demo")];
    tasks.extend((1..=count).map(|i| NewTask::update_cell("Demo", format!("A{i}"), format!("={i}*{i}"))));
    // one bad formula to show a task error
    tasks.push(NewTask::update_cell("Demo", "B1", "=oops"));
    tasks
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if args.instances == 0 {
        bail!("--instances must be at least 1");
    }
    let base = args.store.clone().unwrap_or_else(|| config.store_path.clone());

    let bus = LocalBus::new();
    let mut engines = Vec::with_capacity(args.instances);
    for i in 0..args.instances {
        let engine = build(i, &config, &base, &bus)?;
        engine
            .initialize()
            .await
            .with_context(|| format!("initializing instance {i}"))?;
        engines.push(engine);
    }

    let submitter = &engines[0];
    let mut view = submitter.subscribe();
    if view.borrow().is_active() {
        info!("resuming recovered tasks");
    } else {
        let ids = submitter.start_processing(demo_tasks(args.tasks)).await?;
        info!(count = ids.len(), "tasks submitted");
    }

    let finished = async {
        view.wait_for(|v| matches!(v.status, EngineStatus::Completed | EngineStatus::Error))
            .await
            .map(|v| v.status)
    };
    tokio::select! {
        status = finished => {
            let status = status.context("engine stopped unexpectedly")?;
            info!(?status, "run finished");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted; pending tasks stay in the store");
        }
    }

    for engine in &engines {
        info!(instance = %engine.instance_id(), is_leader = engine.is_leader(), "shutting down");
        engine.shutdown().await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_simple_formulas() {
        assert_eq!(evaluate("=3*4").unwrap(), json!(12.0));
        assert_eq!(evaluate("=1+2").unwrap(), json!(3.0));
        assert_eq!(evaluate("=7").unwrap(), json!(7.0));
        assert!(evaluate("=oops").is_err());
        assert!(evaluate("3").is_err());
    }

    #[test]
    fn store_paths_are_per_instance() {
        let base = PathBuf::from("/tmp/shuttle.redb");
        assert_eq!(store_path(&base, 1), PathBuf::from("/tmp/shuttle.1.redb"));
    }
}
