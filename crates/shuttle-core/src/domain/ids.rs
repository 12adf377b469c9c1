//! Domain identifiers (strongly-typed IDs).
//!
//! # ストアが採番する ID + ジェネリック実装
//! Task / Result の ID は DurableTaskStore が insert 時に採番する連番（u64）です。
//! Phantom type パターンで `TaskId` と `ResultId` を別の型として扱い、
//! 取り違えをコンパイル時に防ぎます。
//!
//! `InstanceId` だけは文字列です。リーダー選出は「辞書順で最小の ID」を
//! リーダーとするため、比較は文字列の辞書順で行います。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-", "result-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// シリアライズ時は素の数値になります（ストアのキーと同じ値）。
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    /// ストアのキーとして使う生の値
    pub const fn get(&self) -> u64 {
        self.value
    }
}

// derive だと `T: Clone` などの余計な境界が付くので手書きする
impl<T: IdMarker> Clone for Id<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for Id<T> {}

impl<T: IdMarker> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for Id<T> {}

impl<T: IdMarker> std::hash::Hash for Id<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdMarker> From<u64> for Id<T> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// TaskResult のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskResult {}

impl IdMarker for TaskResult {
    fn prefix() -> &'static str {
        "result-"
    }
}

/// Identifier of a persisted task (auto-increment, assigned by the store).
pub type TaskId = Id<Task>;

/// Identifier of an appended task result.
pub type ResultId = Id<TaskResult>;

/// Identifier of one application instance (tab / window / process).
///
/// Ordering is plain lexicographic string ordering; the smallest live id is
/// the leader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let task = TaskId::new(7);
        let result = ResultId::new(7);

        assert_eq!(task.to_string(), "task-7");
        assert_eq!(result.to_string(), "result-7");
        assert_eq!(task.get(), result.get());

        // let _: ResultId = task; // <- does not compile
    }

    #[test]
    fn ids_serialize_as_bare_numbers() {
        let id = TaskId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");

        let back: TaskId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn instance_ids_order_lexicographically() {
        let mut ids = vec![
            InstanceId::new("b2"),
            InstanceId::new("a1"),
            InstanceId::new("a10"),
        ];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a1");
        assert_eq!(ids[1].as_str(), "a10");
        assert_eq!(ids[2].as_str(), "b2");
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<u64>());
        assert_eq!(size_of::<ResultId>(), size_of::<u64>());
    }
}
