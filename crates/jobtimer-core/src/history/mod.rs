//! Per-project undo/redo log.
//!
//! Each project has a bounded undo stack and a redo stack. Recording a new
//! action clears the project's redo stack; the oldest entries are evicted
//! once a stack holds `max_entries`.

mod action;
mod editor;

pub use action::{ActionData, ActionType, HistoryAction, NewAction};
pub use editor::ProjectEditor;

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use editor::{dispatch, Direction};

pub const DEFAULT_MAX_ENTRIES: usize = 50;

#[derive(Debug, Default)]
struct ProjectHistory {
    undo: VecDeque<HistoryAction>,
    redo: VecDeque<HistoryAction>,
}

/// Undo/redo service. Construct one and pass it to whoever edits projects.
#[derive(Debug)]
pub struct UndoRedoService {
    max_entries: usize,
    projects: HashMap<String, ProjectHistory>,
}

impl Default for UndoRedoService {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl UndoRedoService {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            projects: HashMap::new(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Record an action and return its id.
    pub fn record_action(&mut self, project_id: &str, action: NewAction) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = HistoryAction {
            id: id.clone(),
            project_id: project_id.to_string(),
            action_type: action.action_type,
            timestamp: Utc::now(),
            user_id: action.user_id,
            user_name: action.user_name,
            description: action.description,
            data: action.data,
            can_undo: action.can_undo,
            can_redo: true,
        };
        debug!(project_id, action_id = %id, kind = %entry.action_type, "action recorded");

        let max = self.max_entries;
        let history = self.projects.entry(project_id.to_string()).or_default();
        history.redo.clear();
        push_bounded(&mut history.undo, entry, max);
        id
    }

    /// Revert the most recent action.
    ///
    /// Returns `Ok(None)` when there is nothing to undo or the top action
    /// is marked irreversible; both stacks are left as they were.
    ///
    /// # Errors
    /// The editor's error. The action stays on the undo stack.
    pub fn undo(
        &mut self,
        project_id: &str,
        editor: &mut dyn ProjectEditor,
    ) -> Result<Option<HistoryAction>> {
        let max = self.max_entries;
        let Some(history) = self.projects.get_mut(project_id) else {
            return Ok(None);
        };
        match history.undo.back() {
            None => return Ok(None),
            Some(top) if !top.can_undo => {
                debug!(project_id, action_id = %top.id, "top action is irreversible");
                return Ok(None);
            }
            Some(_) => {}
        }
        let Some(action) = history.undo.pop_back() else {
            return Ok(None);
        };

        if let Err(err) = dispatch(&action, Direction::Undo, editor) {
            history.undo.push_back(action);
            return Err(err);
        }

        info!(project_id, action_id = %action.id, kind = %action.action_type, "undone");
        push_bounded(&mut history.redo, action.clone(), max);
        Ok(Some(action))
    }

    /// Re-apply the most recently undone action.
    ///
    /// # Errors
    /// The editor's error. The action stays on the redo stack.
    pub fn redo(
        &mut self,
        project_id: &str,
        editor: &mut dyn ProjectEditor,
    ) -> Result<Option<HistoryAction>> {
        let max = self.max_entries;
        let Some(history) = self.projects.get_mut(project_id) else {
            return Ok(None);
        };
        match history.redo.back() {
            None => return Ok(None),
            Some(top) if !top.can_redo => return Ok(None),
            Some(_) => {}
        }
        let Some(action) = history.redo.pop_back() else {
            return Ok(None);
        };

        if let Err(err) = dispatch(&action, Direction::Redo, editor) {
            history.redo.push_back(action);
            return Err(err);
        }

        info!(project_id, action_id = %action.id, kind = %action.action_type, "redone");
        push_bounded(&mut history.undo, action.clone(), max);
        Ok(Some(action))
    }

    pub fn can_undo(&self, project_id: &str) -> bool {
        self.projects
            .get(project_id)
            .and_then(|h| h.undo.back())
            .is_some_and(|a| a.can_undo)
    }

    pub fn can_redo(&self, project_id: &str) -> bool {
        self.projects
            .get(project_id)
            .and_then(|h| h.redo.back())
            .is_some_and(|a| a.can_redo)
    }

    /// Undo stack for a project, most recent first.
    pub fn history(&self, project_id: &str) -> Vec<&HistoryAction> {
        self.projects
            .get(project_id)
            .map(|h| h.undo.iter().rev().collect())
            .unwrap_or_default()
    }

    pub fn redo_len(&self, project_id: &str) -> usize {
        self.projects.get(project_id).map_or(0, |h| h.redo.len())
    }

    /// Drop both stacks for a project.
    pub fn clear(&mut self, project_id: &str) {
        self.projects.remove(project_id);
    }
}

fn push_bounded(stack: &mut VecDeque<HistoryAction>, action: HistoryAction, max: usize) {
    stack.push_back(action);
    while stack.len() > max {
        stack.pop_front();
    }
}
