//! IdGenerator port - インスタンス ID 生成の抽象化
//!
//! Task / Result の ID はストアの連番なので、ここで生成するのは `InstanceId` だけです。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::InstanceId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は兄弟インスタンス間で衝突しない ID を生成
///
/// # ULID の特性
/// - 時刻でソート可能 → 先に起動したインスタンスほど辞書順で小さい
/// - 分散環境で生成可能（調整不要）
pub trait IdGenerator: Send + Sync {
    fn generate_instance_id(&self) -> InstanceId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_instance_id(&self) -> InstanceId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        InstanceId::new(ulid.to_string())
    }
}
