//! Task model: typed actions over the free-form `{action, parameters}` shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::TaskId;
use super::state::TaskStatus;
use crate::error::{EngineError, Result};

/// What a task asks the executor to do.
///
/// Persisted and sent over the wire as `{"action": "...", "parameters": {...}}`.
/// Unknown action names (or known names whose parameters do not decode) land
/// in `Other` untouched, so records written by a newer build still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAction", into = "RawAction")]
pub enum TaskAction {
    UpdateCell {
        sheet: String,
        cell: String,
        formula: String,
    },
    CreateSheet {
        name: String,
    },
    CreateChart {
        sheet: String,
        range: String,
        chart_type: String,
    },
    Other {
        action: String,
        parameters: Map<String, Value>,
    },
}

impl TaskAction {
    pub const UPDATE_CELL: &'static str = "updateCell";
    pub const CREATE_SHEET: &'static str = "createSheet";
    pub const CREATE_CHART: &'static str = "createChart";

    pub fn other(action: impl Into<String>, parameters: Value) -> Self {
        let parameters = match parameters {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        TaskAction::Other {
            action: action.into(),
            parameters,
        }
    }

    /// The action name as written on the wire.
    pub fn name(&self) -> &str {
        match self {
            TaskAction::UpdateCell { .. } => Self::UPDATE_CELL,
            TaskAction::CreateSheet { .. } => Self::CREATE_SHEET,
            TaskAction::CreateChart { .. } => Self::CREATE_CHART,
            TaskAction::Other { action, .. } => action,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CellParams {
    sheet: String,
    cell: String,
    formula: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SheetParams {
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartParams {
    sheet: String,
    range: String,
    chart_type: String,
}

/// Untyped wire shape of an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAction {
    action: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

impl From<RawAction> for TaskAction {
    fn from(raw: RawAction) -> Self {
        let params = Value::Object(raw.parameters.clone());
        let typed = match raw.action.as_str() {
            TaskAction::UPDATE_CELL => serde_json::from_value::<CellParams>(params)
                .ok()
                .map(|p| TaskAction::UpdateCell {
                    sheet: p.sheet,
                    cell: p.cell,
                    formula: p.formula,
                }),
            TaskAction::CREATE_SHEET => serde_json::from_value::<SheetParams>(params)
                .ok()
                .map(|p| TaskAction::CreateSheet { name: p.name }),
            TaskAction::CREATE_CHART => serde_json::from_value::<ChartParams>(params)
                .ok()
                .map(|p| TaskAction::CreateChart {
                    sheet: p.sheet,
                    range: p.range,
                    chart_type: p.chart_type,
                }),
            _ => None,
        };
        typed.unwrap_or(TaskAction::Other {
            action: raw.action,
            parameters: raw.parameters,
        })
    }
}

fn into_map<T: Serialize>(params: T) -> Map<String, Value> {
    match serde_json::to_value(params) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

impl From<TaskAction> for RawAction {
    fn from(action: TaskAction) -> Self {
        let name = action.name().to_string();
        let parameters = match action {
            TaskAction::UpdateCell {
                sheet,
                cell,
                formula,
            } => into_map(CellParams {
                sheet,
                cell,
                formula,
            }),
            TaskAction::CreateSheet { name } => into_map(SheetParams { name }),
            TaskAction::CreateChart {
                sheet,
                range,
                chart_type,
            } => into_map(ChartParams {
                sheet,
                range,
                chart_type,
            }),
            TaskAction::Other { parameters, .. } => parameters,
        };
        RawAction {
            action: name,
            parameters,
        }
    }
}

/// A task as submitted by the host, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    #[serde(flatten)]
    pub action: TaskAction,
    #[serde(default)]
    pub priority: i32,
}

impl NewTask {
    pub fn new(action: TaskAction) -> Self {
        Self {
            action,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn update_cell(
        sheet: impl Into<String>,
        cell: impl Into<String>,
        formula: impl Into<String>,
    ) -> Self {
        Self::new(TaskAction::UpdateCell {
            sheet: sheet.into(),
            cell: cell.into(),
            formula: formula.into(),
        })
    }

    pub fn create_sheet(name: impl Into<String>) -> Self {
        Self::new(TaskAction::CreateSheet { name: name.into() })
    }

    /// A free-form action; `parameters` should be a JSON object.
    pub fn action(action: impl Into<String>, parameters: Value) -> Self {
        Self::new(TaskAction::other(action, parameters))
    }
}

/// A persisted task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<TaskId>,

    #[serde(flatten)]
    pub action: TaskAction,

    #[serde(default)]
    pub priority: i32,

    pub status: TaskStatus,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Written as 0 on insert. Nothing increments it yet.
    // TODO: decide whether failed tasks get retried; until then this stays 0.
    #[serde(default)]
    pub attempts: u32,
}

impl Task {
    /// Build the record the store inserts for `new`.
    pub fn pending(id: TaskId, new: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id: Some(id),
            action: new.action,
            priority: new.priority,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: None,
            attempts: 0,
        }
    }

    pub fn action_name(&self) -> &str {
        self.action.name()
    }

    /// Move to `status`, stamping `updated_at`. Same-status writes are no-ops.
    pub fn transition(&mut self, status: TaskStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(EngineError::InvalidTransition {
                task_id: self.id.unwrap_or(TaskId::new(0)),
                from: self.status,
                to: status,
            });
        }
        if self.status != status {
            self.status = status;
            self.updated_at = Some(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_action_decodes_to_typed_variant() {
        let task: NewTask = serde_json::from_value(json!({
            "action": "updateCell",
            "parameters": { "sheet": "Sheet1", "cell": "B2", "formula": "=A1*2" },
            "priority": 3
        }))
        .unwrap();

        assert_eq!(
            task.action,
            TaskAction::UpdateCell {
                sheet: "Sheet1".into(),
                cell: "B2".into(),
                formula: "=A1*2".into(),
            }
        );
        assert_eq!(task.priority, 3);
    }

    #[test]
    fn unknown_action_is_preserved() {
        let task: NewTask = serde_json::from_value(json!({
            "action": "pivot",
            "parameters": { "rows": ["region"] }
        }))
        .unwrap();

        assert_eq!(task.action.name(), "pivot");
        let back = serde_json::to_value(&task).unwrap();
        assert_eq!(back["action"], "pivot");
        assert_eq!(back["parameters"]["rows"][0], "region");
    }

    #[test]
    fn known_action_with_bad_parameters_falls_back() {
        let task: NewTask = serde_json::from_value(json!({
            "action": "createSheet",
            "parameters": { "title": "no name field" }
        }))
        .unwrap();

        assert!(matches!(task.action, TaskAction::Other { ref action, .. } if action == "createSheet"));
    }

    #[test]
    fn task_record_uses_camel_case_fields() {
        let now = Utc::now();
        let task = Task::pending(TaskId::new(1), NewTask::create_sheet("Totals"), now);
        let value = serde_json::to_value(&task).unwrap();

        assert_eq!(value["id"], 1);
        assert_eq!(value["action"], "createSheet");
        assert_eq!(value["parameters"]["name"], "Totals");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["attempts"], 0);
        assert!(value.get("createdAt").is_some());
        assert!(value.get("updatedAt").is_none());
    }

    #[test]
    fn transition_stamps_updated_at_once() {
        let created = Utc::now();
        let mut task = Task::pending(TaskId::new(9), NewTask::create_sheet("A"), created);

        let later = created + chrono::Duration::seconds(1);
        task.transition(TaskStatus::Completed, later).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.updated_at, Some(later));

        task.transition(TaskStatus::Completed, later + chrono::Duration::seconds(5))
            .unwrap();
        assert_eq!(task.updated_at, Some(later));

        let err = task.transition(TaskStatus::Pending, later).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn non_object_parameters_are_wrapped() {
        let action = TaskAction::other("echo", json!(5));
        match action {
            TaskAction::Other { parameters, .. } => assert_eq!(parameters["value"], 5),
            other => panic!("expected Other, got {other:?}"),
        }
    }
}
