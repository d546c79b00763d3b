//! Project editing boundary and action dispatch.

use serde_json::Value;
use tracing::warn;

use super::action::{ActionType, HistoryAction};
use crate::error::{HistoryError, Result};

/// Project data store the history replays edits against.
pub trait ProjectEditor {
    fn update_task(&mut self, project_id: &str, task_id: &str, data: &Value) -> Result<()>;
    fn create_task(&mut self, project_id: &str, data: &Value) -> Result<()>;
    fn delete_task(&mut self, project_id: &str, task_id: &str) -> Result<()>;
    fn create_dependency(&mut self, project_id: &str, data: &Value) -> Result<()>;
    fn delete_dependency(&mut self, project_id: &str, dependency_id: &str) -> Result<()>;
    fn update_job(&mut self, project_id: &str, job_id: &str, data: &Value) -> Result<()>;
    fn assign_resource(&mut self, project_id: &str, data: &Value) -> Result<()>;
    fn unassign_resource(&mut self, project_id: &str, data: &Value) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Undo,
    Redo,
}

/// Apply `action` in `direction`. Unknown action types are skipped.
pub(crate) fn dispatch(
    action: &HistoryAction,
    direction: Direction,
    editor: &mut dyn ProjectEditor,
) -> Result<()> {
    let project = action.project_id.as_str();
    let old = &action.data.old_data;
    let new = &action.data.new_data;
    let undo = direction == Direction::Undo;

    let outcome = match &action.action_type {
        ActionType::TaskUpdate => {
            let data = if undo { old } else { new };
            editor.update_task(project, id_of(action, data)?, data)
        }
        ActionType::TaskCreate => {
            if undo {
                editor.delete_task(project, id_of(action, new)?)
            } else {
                editor.create_task(project, new)
            }
        }
        ActionType::TaskDelete => {
            if undo {
                editor.create_task(project, old)
            } else {
                editor.delete_task(project, id_of(action, old)?)
            }
        }
        ActionType::DependencyCreate => {
            if undo {
                editor.delete_dependency(project, id_of(action, new)?)
            } else {
                editor.create_dependency(project, new)
            }
        }
        ActionType::DependencyDelete => {
            if undo {
                editor.create_dependency(project, old)
            } else {
                editor.delete_dependency(project, id_of(action, old)?)
            }
        }
        ActionType::JobUpdate => {
            let data = if undo { old } else { new };
            editor.update_job(project, id_of(action, data)?, data)
        }
        ActionType::ResourceAssign => {
            if undo {
                editor.unassign_resource(project, new)
            } else {
                editor.assign_resource(project, new)
            }
        }
        ActionType::ResourceUnassign => {
            if undo {
                editor.assign_resource(project, old)
            } else {
                editor.unassign_resource(project, old)
            }
        }
        ActionType::Unknown(kind) => {
            warn!(action_id = %action.id, kind = %kind, ?direction, "unknown action type, skipping");
            Ok(())
        }
    };

    outcome.map_err(|e| match e {
        crate::error::CoreError::History(h) => h.into(),
        other => HistoryError::EditorFailed {
            action_id: action.id.clone(),
            message: other.to_string(),
        }
        .into(),
    })
}

fn id_of<'a>(action: &HistoryAction, data: &'a Value) -> Result<&'a str> {
    data.get("id").and_then(Value::as_str).ok_or_else(|| {
        HistoryError::MissingData {
            action_id: action.id.clone(),
            field: "id".into(),
        }
        .into()
    })
}
