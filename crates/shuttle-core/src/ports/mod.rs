//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（永続化媒体、ブロードキャスト媒体、ホストの UI、
//! タスク評価器）へのインターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - ストアが source of truth（正本）。executor のキューはメモリ上の写し
//! - ブロードキャストは助言的な協調のみ（相互排他には使わない）
//! - ホスト側の callback はすべて同期・非ブロッキング

pub mod broadcast;
pub mod clock;
pub mod handler;
pub mod host;
pub mod id_generator;
pub mod task_store;

// 主要な trait を再エクスポート
pub use self::broadcast::{BroadcastChannel, FrameReceiver};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::handler::TaskHandler;
pub use self::host::{FrameClock, HostSink, NoopHost, Notifier};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::TaskStore;
