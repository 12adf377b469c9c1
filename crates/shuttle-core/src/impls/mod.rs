//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **RedbTaskStore**: redb ファイルによる正本（本番用）
//! - **InMemoryTaskStore**: 永続化なしの正本（テスト用）
//! - **LocalBus**: 同一プロセス内のブロードキャスト媒体
//! - **LogNotifier** / **IntervalFrames**: ヘッドレス環境向けのホスト協調者

pub mod local_bus;
pub mod memory_store;
pub mod notifier;
pub mod redb_store;

// 主要な型を再エクスポート
pub use self::local_bus::LocalBus;
pub use self::memory_store::InMemoryTaskStore;
pub use self::notifier::{IntervalFrames, LogNotifier};
pub use self::redb_store::RedbTaskStore;
