//! shuttle-core
//!
//! Background task processing engine: a durable task queue, a batching
//! executor running in its own context, advisory leadership between sibling
//! instances, and an orchestrator that surfaces results to the host.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, result, state, progress, events）
//! - **ports**: 抽象化レイヤー（TaskStore, TaskHandler, BroadcastChannel, HostSink, Clock など）
//! - **app**: アプリケーションロジック（builder, orchestrator, executor, coordinator, result_loop）
//! - **impls**: 実装（RedbTaskStore, InMemoryTaskStore, LocalBus など）
//! - **config**: TOML から読み込む EngineConfig
//! - **error**: EngineError と ErrorKind

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use app::{BuildError, EngineView, Orchestrator, OrchestratorBuilder};
pub use config::{ConfigError, EngineConfig};
pub use error::{EngineError, ErrorKind, Result};
