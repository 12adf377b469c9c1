//! BroadcastChannel port - 兄弟インスタンス間の配送媒体
//!
//! 到達も順序も保証しない best-effort な fan-out を想定します。
//! 流すのは JSON 文字列（フレーム）だけで、デコードはコーディネーター側の責務です。
//!
//! # 実装
//! - `impls::LocalBus`: 同一プロセス内の tokio broadcast

use async_trait::async_trait;

use crate::error::Result;

/// Receiving half of a subscription.
#[async_trait]
pub trait FrameReceiver: Send {
    /// Next frame, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<String>;
}

/// BroadcastChannel は全兄弟インスタンスに同じフレームを配る
///
/// 自分が publish したフレームも自分の subscription に届きます。
/// 自己メッセージの除外は受信側（senderId 比較）で行います。
pub trait BroadcastChannel: Send + Sync {
    /// Fails with `CoordinatorUnavailable` when the medium is closed.
    fn publish(&self, frame: String) -> Result<()>;

    /// Fails with `CoordinatorUnavailable` when the medium cannot be opened.
    fn subscribe(&self) -> Result<Box<dyn FrameReceiver>>;
}
