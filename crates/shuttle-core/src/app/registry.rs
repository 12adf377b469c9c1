//! ActionRegistry - アクション名ごとの TaskHandler の登録と管理
//!
//! # 内部実装
//! - HashMap<String, Arc<dyn TaskHandler>> で管理
//! - 未登録のアクションは fallback へ（なければそのタスクだけ失敗）
//! - ActionRegistry 自体も TaskHandler なので、そのまま executor に渡せる

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::Task;
use crate::ports::TaskHandler;

/// ActionRegistry はアクション名で handler を引く
///
/// # 使用例
/// ```ignore
/// let mut registry = ActionRegistry::new();
/// registry.register("createSheet", |task: &Task| Ok(json!({"ok": true})))?;
/// registry.set_fallback(|task: &Task| Ok(Value::Null));
/// ```
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

/// RegistryError は ActionRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler for action '{0}' is already registered")]
    AlreadyRegistered(String),
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: TaskHandler>(
        &mut self,
        action: impl Into<String>,
        handler: H,
    ) -> Result<(), RegistryError> {
        let action = action.into();
        if self.handlers.contains_key(&action) {
            return Err(RegistryError::AlreadyRegistered(action));
        }
        self.handlers.insert(action, Arc::new(handler));
        Ok(())
    }

    /// Handler for actions with no dedicated registration. Replaces any previous one.
    pub fn set_fallback<H: TaskHandler>(&mut self, handler: H) {
        self.fallback = Some(Arc::new(handler));
    }

    pub fn get(&self, action: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(action).cloned()
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    pub fn registered_actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.handlers.keys().cloned().collect();
        actions.sort();
        actions
    }
}

impl TaskHandler for ActionRegistry {
    fn execute(&self, task: &Task) -> Result<Value, String> {
        let action = task.action_name();
        match self.handlers.get(action).or(self.fallback.as_ref()) {
            Some(handler) => handler.execute(task),
            None => Err(format!("no handler registered for action '{action}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewTask, TaskAction, TaskId};
    use chrono::Utc;
    use serde_json::json;

    fn task(new: NewTask) -> Task {
        Task::pending(TaskId::new(1), new, Utc::now())
    }

    fn sheet_handler(task: &Task) -> Result<Value, String> {
        match &task.action {
            TaskAction::CreateSheet { name } => Ok(json!({ "created": name })),
            other => Err(format!("unexpected action {}", other.name())),
        }
    }

    #[test]
    fn routes_by_action_name() {
        let mut registry = ActionRegistry::new();
        registry
            .register(TaskAction::CREATE_SHEET, sheet_handler)
            .unwrap();

        let result = registry.execute(&task(NewTask::create_sheet("Q3"))).unwrap();
        assert_eq!(result, json!({"created": "Q3"}));
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = ActionRegistry::new();
        registry
            .register(TaskAction::CREATE_SHEET, sheet_handler)
            .unwrap();
        let result = registry.register(TaskAction::CREATE_SHEET, sheet_handler);
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(a)) if a == "createSheet"));
    }

    #[test]
    fn unknown_action_uses_fallback_or_fails() {
        let mut registry = ActionRegistry::new();
        let pivot = task(NewTask::action("pivot", json!({})));

        let err = registry.execute(&pivot).unwrap_err();
        assert!(err.contains("pivot"));

        registry.set_fallback(|t: &Task| -> Result<Value, String> { Ok(json!(t.action_name())) });
        assert_eq!(registry.execute(&pivot).unwrap(), json!("pivot"));
    }

    #[test]
    fn registered_actions_are_sorted() {
        let mut registry = ActionRegistry::new();
        registry.register("updateCell", sheet_handler).unwrap();
        registry.register("createChart", sheet_handler).unwrap();
        assert_eq!(
            registry.registered_actions(),
            vec!["createChart".to_string(), "updateCell".to_string()]
        );
        assert!(!registry.has_fallback());
    }
}
