//! Notifier / FrameClock のデフォルト実装
//!
//! - **LogNotifier**: 通知を tracing に流すだけ（CLI・ヘッドレス用）
//! - **IntervalFrames**: 固定間隔を「次の描画」とみなす

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::ports::{FrameClock, Notifier};

/// Writes notifications to the log. Permission is fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct LogNotifier {
    granted: bool,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self { granted: true }
    }

    pub fn denied() -> Self {
        Self { granted: false }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LogNotifier {
    fn permission_granted(&self) -> bool {
        self.granted
    }

    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "notification");
    }
}

/// Frame clock ticking at a fixed interval (16ms ≒ 60fps by default).
#[derive(Debug, Clone, Copy)]
pub struct IntervalFrames {
    interval: Duration,
}

impl IntervalFrames {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for IntervalFrames {
    fn default() -> Self {
        Self::new(Duration::from_millis(16))
    }
}

#[async_trait]
impl FrameClock for IntervalFrames {
    async fn next_frame(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_is_fixed() {
        assert!(LogNotifier::new().permission_granted());
        assert!(!LogNotifier::denied().permission_granted());
    }

    #[tokio::test(start_paused = true)]
    async fn frame_waits_for_the_interval() {
        let frames = IntervalFrames::new(Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        frames.next_frame().await;
        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
