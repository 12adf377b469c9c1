//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **OrchestratorBuilder**: エンジンの構築とワイヤリング
//! - **Orchestrator**: ホストが持つ制御 API（start / pause / resume / cancel / status）
//! - **executor**: 分離されたコンテキストでバッチ実行するメッセージ駆動のステートマシン
//! - **coordinator**: 兄弟インスタンス間のハートビートとリーダー選出
//! - **ResultLoop**: executor の出力を永続化し、ホストへ反映（非表示中はバッファ）
//! - **ActionRegistry**: アクション名 → handler のルーティング

pub mod builder;
pub mod coordinator;
pub mod executor;
pub mod orchestrator;
pub mod registry;
mod result_loop;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, OrchestratorBuilder};
pub use self::coordinator::{CoordinatorConfig, InstanceCoordinator, LeaderState};
pub use self::executor::{spawn_executor, ExecutorConfig, ExecutorHandle, Inbound, Outbound};
pub use self::orchestrator::Orchestrator;
pub use self::registry::{ActionRegistry, RegistryError};
pub use self::status::EngineView;
