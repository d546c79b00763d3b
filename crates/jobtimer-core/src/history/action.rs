//! Reversible project-editing actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of project edit an action records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    TaskUpdate,
    TaskCreate,
    TaskDelete,
    DependencyCreate,
    DependencyDelete,
    JobUpdate,
    ResourceAssign,
    ResourceUnassign,
    /// Recorded by a newer client; replayed as a no-op.
    #[serde(untagged)]
    Unknown(String),
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::TaskUpdate => "task_update",
            ActionType::TaskCreate => "task_create",
            ActionType::TaskDelete => "task_delete",
            ActionType::DependencyCreate => "dependency_create",
            ActionType::DependencyDelete => "dependency_delete",
            ActionType::JobUpdate => "job_update",
            ActionType::ResourceAssign => "resource_assign",
            ActionType::ResourceUnassign => "resource_unassign",
            ActionType::Unknown(other) => other,
        };
        f.write_str(s)
    }
}

/// Before/after payloads. Undo restores `old_data`, redo re-applies `new_data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    #[serde(default)]
    pub old_data: serde_json::Value,
    #[serde(default)]
    pub new_data: serde_json::Value,
}

/// Input for `UndoRedoService::record_action`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub action_type: ActionType,
    pub user_id: String,
    pub user_name: String,
    pub description: String,
    pub data: ActionData,
    pub can_undo: bool,
}

impl NewAction {
    pub fn new(action_type: ActionType, description: impl Into<String>, data: ActionData) -> Self {
        Self {
            action_type,
            user_id: String::new(),
            user_name: String::new(),
            description: description.into(),
            data,
            can_undo: true,
        }
    }

    pub fn by(mut self, user_id: impl Into<String>, user_name: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.user_name = user_name.into();
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.can_undo = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryAction {
    pub id: String,
    pub project_id: String,
    pub action_type: ActionType,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_name: String,
    pub description: String,
    pub data: ActionData,
    pub can_undo: bool,
    pub can_redo: bool,
}
