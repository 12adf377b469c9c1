//! OrchestratorBuilder - Orchestrator の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - expect_actions() で期待されるアクション名を登録
//! - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
//! - ストアや handler が欠けていれば BuildError を返す

use std::sync::Arc;

use tokio::sync::watch;

use super::orchestrator::{Orchestrator, Parts};
use super::registry::{ActionRegistry, RegistryError};
use crate::config::{ConfigError, EngineConfig};
use crate::domain::{InstanceId, Visibility};
use crate::impls::{IntervalFrames, LogNotifier};
use crate::ports::{
    BroadcastChannel, Clock, FrameClock, HostSink, IdGenerator, NoopHost, Notifier, SystemClock,
    TaskHandler, TaskStore, UlidGenerator,
};

/// OrchestratorBuilder は Orchestrator を構築
///
/// # 使用例
/// ```ignore
/// let engine = OrchestratorBuilder::new()
///     .store(Arc::new(RedbTaskStore::new("shuttle.redb")))
///     .register("createSheet", create_sheet)?
///     .expect_actions(&["createSheet"])
///     .build()?;
/// engine.initialize().await?;
/// ```
pub struct OrchestratorBuilder {
    registry: ActionRegistry,
    expected_actions: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    host: Option<Arc<dyn HostSink>>,
    notifier: Option<Arc<dyn Notifier>>,
    frames: Option<Arc<dyn FrameClock>>,
    channel: Option<Arc<dyn BroadcastChannel>>,
    clock: Option<Arc<dyn Clock>>,
    instance_id: Option<InstanceId>,
    visibility: Option<watch::Receiver<Visibility>>,
    config: EngineConfig,
}

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing actions: {0:?}. These actions were expected but not registered.")]
    MissingActions(Vec<String>),

    #[error("no task store configured")]
    MissingStore,

    #[error("no task handler registered")]
    MissingHandler,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            registry: ActionRegistry::new(),
            expected_actions: None,
            store: None,
            host: None,
            notifier: None,
            frames: None,
            channel: None,
            clock: None,
            instance_id: None,
            visibility: None,
            config: EngineConfig::default(),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Handler for one action name.
    pub fn register<H: TaskHandler>(
        mut self,
        action: impl Into<String>,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register(action, handler)?;
        Ok(self)
    }

    /// Handler for every action without a dedicated registration.
    pub fn handler<H: TaskHandler>(mut self, handler: H) -> Self {
        self.registry.set_fallback(handler);
        self
    }

    /// Replace the whole registry.
    pub fn registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn expect_actions(mut self, actions: &[&str]) -> Self {
        self.expected_actions = Some(actions.iter().map(|a| a.to_string()).collect());
        self
    }

    pub fn host(mut self, host: Arc<dyn HostSink>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn frames(mut self, frames: Arc<dyn FrameClock>) -> Self {
        self.frames = Some(frames);
        self
    }

    /// Sibling instances share this channel. Without one the engine runs single-instance.
    pub fn channel(mut self, channel: Arc<dyn BroadcastChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn instance_id(mut self, id: impl Into<InstanceId>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Foreground / background source. Defaults to always foreground.
    pub fn visibility(mut self, visibility: watch::Receiver<Visibility>) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_actions {
            let registered = self.registry.registered_actions();
            let missing: Vec<String> = expected
                .iter()
                .filter(|a| !registered.contains(a))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingActions(missing));
            }
        }
        if self.registry.registered_actions().is_empty() && !self.registry.has_fallback() {
            return Err(BuildError::MissingHandler);
        }
        let store = self.store.ok_or(BuildError::MissingStore)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let instance_id = self
            .instance_id
            .unwrap_or_else(|| UlidGenerator::new(clock.clone()).generate_instance_id());
        let (visibility, visibility_tx) = match self.visibility {
            Some(rx) => (rx, None),
            None => {
                let (tx, rx) = watch::channel(Visibility::Foreground);
                (rx, Some(tx))
            }
        };
        let frames = self
            .frames
            .unwrap_or_else(|| Arc::new(IntervalFrames::new(self.config.frame_interval())));

        Ok(Orchestrator::from_parts(Parts {
            store,
            handler: Arc::new(self.registry),
            host: self.host.unwrap_or_else(|| Arc::new(NoopHost)),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier::new())),
            frames,
            channel: self.channel,
            clock,
            instance_id,
            visibility,
            visibility_tx,
            config: self.config,
        }))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;
    use crate::impls::InMemoryTaskStore;
    use serde_json::{json, Value};

    fn ok(_: &Task) -> Result<Value, String> {
        Ok(json!(true))
    }

    #[test]
    fn build_success() {
        let engine = OrchestratorBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .register("createSheet", ok)
            .unwrap()
            .expect_actions(&["createSheet"])
            .instance_id("a1")
            .build();
        assert!(engine.is_ok());
        assert_eq!(engine.unwrap().instance_id(), &InstanceId::new("a1"));
    }

    #[test]
    fn build_missing_actions() {
        let engine = OrchestratorBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .register("createSheet", ok)
            .unwrap()
            .expect_actions(&["createSheet", "updateCell"])
            .build();
        assert!(matches!(
            engine,
            Err(BuildError::MissingActions(missing)) if missing == vec!["updateCell".to_string()]
        ));
    }

    #[test]
    fn build_requires_store_and_handler() {
        let no_store = OrchestratorBuilder::new().handler(ok).build();
        assert!(matches!(no_store, Err(BuildError::MissingStore)));

        let no_handler = OrchestratorBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .build();
        assert!(matches!(no_handler, Err(BuildError::MissingHandler)));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = EngineConfig {
            batch_size: 0,
            ..EngineConfig::default()
        };
        let engine = OrchestratorBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .handler(ok)
            .config(config)
            .build();
        assert!(matches!(engine, Err(BuildError::Config(_))));
    }

    #[test]
    fn generated_instance_ids_are_ulids() {
        let engine = OrchestratorBuilder::new()
            .store(Arc::new(InMemoryTaskStore::new()))
            .handler(ok)
            .build()
            .unwrap();
        assert_eq!(engine.instance_id().as_str().len(), 26);
    }
}
