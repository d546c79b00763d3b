//! Timer document model.
//!
//! `TimerState` is the shape written to `timers/{id}`. Field names are
//! serialized in camelCase so the stored documents keep the schema the
//! web clients already read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Why a timer was paused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    Break,
    Idle,
    SystemSleep,
    Other(String),
}

impl Default for PauseReason {
    fn default() -> Self {
        PauseReason::Manual
    }
}

/// One pause interval. Entries are append-only; only `resumed_at` is ever
/// filled in after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseEntry {
    pub paused_at: DateTime<Utc>,
    #[serde(default)]
    pub resumed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reason: PauseReason,
}

impl PauseEntry {
    pub fn new(paused_at: DateTime<Utc>, reason: PauseReason) -> Self {
        Self {
            paused_at,
            resumed_at: None,
            reason,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resumed_at.is_none()
    }
}

/// Coarse status derived from the running/paused flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for TimerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
            TimerStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Explicit state transition carried by an update. An update that flips
/// `is_running` without one is treated as a possible conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Stop,
}

/// Live timer document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub id: String,
    pub user_id: String,
    pub project_id: String,
    pub job_card_id: String,
    #[serde(default)]
    pub job_card_title: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Seconds left against the allocation; negative once exceeded.
    pub time_remaining: i64,
    pub allocated_hours: f64,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub pause_count: u32,
    #[serde(default)]
    pub pause_history: Vec<PauseEntry>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub session_id: String,
    pub sync_version: u64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub idempotency_key: String,
}

impl TimerState {
    pub fn status(&self) -> TimerStatus {
        if self.is_running {
            TimerStatus::Running
        } else if self.is_paused {
            TimerStatus::Paused
        } else {
            TimerStatus::Stopped
        }
    }

    /// Allocation expressed in seconds.
    pub fn allocated_secs(&self) -> i64 {
        (self.allocated_hours * 3600.0).round() as i64
    }

    /// Seconds consumed so far against the allocation.
    pub fn time_spent_secs(&self) -> i64 {
        self.allocated_secs() - self.time_remaining
    }

    pub fn is_exceeded(&self) -> bool {
        self.time_remaining < 0
    }

    /// Check the document-level invariants.
    ///
    /// # Errors
    /// Returns the first violated invariant.
    pub fn check_invariants(&self) -> Result<(), ValidationError> {
        if self.is_running && self.is_paused {
            return Err(ValidationError::RunningAndPaused(self.id.clone()));
        }
        if self.pause_history.len() != self.pause_count as usize {
            return Err(ValidationError::PauseCountMismatch {
                id: self.id.clone(),
                count: self.pause_count,
                history: self.pause_history.len(),
            });
        }
        Ok(())
    }

    /// Apply a partial update in place.
    ///
    /// Scalar fields present in the update overwrite the current value.
    /// Pause history is merged: unknown entries are appended, known entries
    /// (same `paused_at`) only gain a missing `resumed_at`.
    pub fn apply(&mut self, update: &TimerUpdate) {
        if let Some(title) = &update.job_card_title {
            self.job_card_title = title.clone();
        }
        if let Some(start) = update.start_time {
            self.start_time = Some(start);
        }
        if let Some(remaining) = update.time_remaining {
            self.time_remaining = remaining;
        }
        if let Some(running) = update.is_running {
            self.is_running = running;
        }
        if let Some(paused) = update.is_paused {
            self.is_paused = paused;
        }
        if let Some(count) = update.pause_count {
            self.pause_count = count;
        }
        if let Some(entries) = &update.pause_history {
            for entry in entries {
                match self
                    .pause_history
                    .iter_mut()
                    .find(|e| e.paused_at == entry.paused_at)
                {
                    Some(existing) => {
                        if existing.resumed_at.is_none() {
                            existing.resumed_at = entry.resumed_at;
                        }
                    }
                    None => self.pause_history.push(entry.clone()),
                }
            }
        }
        if let Some(device) = &update.device_id {
            self.device_id = device.clone();
        }
        if let Some(session) = &update.session_id {
            self.session_id = session.clone();
        }
        if let Some(version) = update.sync_version {
            self.sync_version = version;
        }
        if let Some(at) = update.last_updated {
            self.last_updated = at;
        }
    }

    /// Return a copy with the update applied.
    pub fn with_update(&self, update: &TimerUpdate) -> TimerState {
        let mut next = self.clone();
        next.apply(update);
        next
    }
}

/// Partial update to a timer document. Identity fields (`id`, owners,
/// `allocated_hours`, `idempotency_key`) are not updatable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_card_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paused: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_history: Option<Vec<PauseEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition: Option<Transition>,
}

impl TimerUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TimerUpdate::default()
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transition = Some(transition);
        self
    }
}

impl From<&TimerState> for TimerUpdate {
    /// Full-document update, used when a whole local state competes with
    /// a remote snapshot.
    fn from(state: &TimerState) -> Self {
        Self {
            job_card_title: Some(state.job_card_title.clone()),
            start_time: state.start_time,
            time_remaining: Some(state.time_remaining),
            is_running: Some(state.is_running),
            is_paused: Some(state.is_paused),
            pause_count: Some(state.pause_count),
            pause_history: Some(state.pause_history.clone()),
            device_id: Some(state.device_id.clone()),
            session_id: Some(state.session_id.clone()),
            sync_version: Some(state.sync_version),
            last_updated: Some(state.last_updated),
            transition: None,
        }
    }
}

/// Input for `initialize_timer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTimer {
    pub user_id: String,
    pub project_id: String,
    pub job_card_id: String,
    #[serde(default)]
    pub job_card_title: String,
    pub allocated_hours: f64,
    /// Defaults to the full allocation.
    #[serde(default)]
    pub time_remaining: Option<i64>,
    #[serde(default)]
    pub device_id: String,
    /// Start running immediately.
    #[serde(default)]
    pub start_running: bool,
    /// Caller-supplied key; generated when absent.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// How a timer session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    #[default]
    Finished,
    Stopped,
    Exceeded,
}

/// Input for `complete_timer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionData {
    #[serde(default)]
    pub reason: CompletionReason,
    /// Final remaining seconds; the live value is used when absent.
    #[serde(default)]
    pub time_remaining: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Immutable archive record written to `timerLogs/{autoId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerLog {
    pub id: String,
    pub timer_id: String,
    pub user_id: String,
    pub project_id: String,
    pub job_card_id: String,
    pub job_card_title: String,
    pub allocated_hours: f64,
    pub time_remaining: i64,
    pub time_spent_secs: i64,
    pub pause_count: u32,
    pub pause_history: Vec<PauseEntry>,
    pub reason: CompletionReason,
    #[serde(default)]
    pub notes: Option<String>,
    pub final_sync_version: u64,
    pub completed_at: DateTime<Utc>,
}

impl TimerLog {
    /// Build the archive record for a timer being completed.
    pub fn from_completion(
        state: &TimerState,
        data: &CompletionData,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let time_remaining = data.time_remaining.unwrap_or(state.time_remaining);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timer_id: state.id.clone(),
            user_id: state.user_id.clone(),
            project_id: state.project_id.clone(),
            job_card_id: state.job_card_id.clone(),
            job_card_title: state.job_card_title.clone(),
            allocated_hours: state.allocated_hours,
            time_remaining,
            time_spent_secs: state.allocated_secs() - time_remaining,
            pause_count: state.pause_count,
            pause_history: state.pause_history.clone(),
            reason: data.reason,
            notes: data.notes.clone(),
            final_sync_version: state.sync_version,
            completed_at,
        }
    }
}

/// Ephemeral time-slot hold owned by a live timer; removed on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotReservation {
    pub id: String,
    pub timer_id: String,
    pub user_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    pub(crate) fn sample_state() -> TimerState {
        TimerState {
            id: "timer_u1_p1_1000".into(),
            user_id: "u1".into(),
            project_id: "p1".into(),
            job_card_id: "jc1".into(),
            job_card_title: "Design review".into(),
            start_time: None,
            time_remaining: 7200,
            allocated_hours: 2.0,
            is_running: false,
            is_paused: false,
            pause_count: 0,
            pause_history: vec![],
            device_id: "dev-a".into(),
            session_id: "s1".into(),
            sync_version: 1,
            last_updated: Utc::now(),
            idempotency_key: "k1".into(),
        }
    }

    #[test]
    fn status_follows_flags() {
        let mut state = sample_state();
        assert_eq!(state.status(), TimerStatus::Stopped);
        state.is_running = true;
        assert_eq!(state.status(), TimerStatus::Running);
        state.is_running = false;
        state.is_paused = true;
        assert_eq!(state.status(), TimerStatus::Paused);
    }

    #[test]
    fn invariants_flag_running_and_paused() {
        let mut state = sample_state();
        state.is_running = true;
        state.is_paused = true;
        assert!(matches!(
            state.check_invariants(),
            Err(ValidationError::RunningAndPaused(_))
        ));
    }

    #[test]
    fn invariants_flag_pause_count_mismatch() {
        let mut state = sample_state();
        state.pause_count = 2;
        assert!(matches!(
            state.check_invariants(),
            Err(ValidationError::PauseCountMismatch { count: 2, history: 0, .. })
        ));
    }

    #[test]
    fn apply_overwrites_present_fields_only() {
        let state = sample_state();
        let update = TimerUpdate {
            time_remaining: Some(6000),
            is_paused: Some(true),
            ..Default::default()
        };
        let next = state.with_update(&update);
        assert_eq!(next.time_remaining, 6000);
        assert!(next.is_paused);
        assert_eq!(next.job_card_title, state.job_card_title);
        assert_eq!(next.sync_version, state.sync_version);
    }

    #[test]
    fn apply_appends_pause_history_and_fills_resume() {
        let t0 = Utc::now();
        let mut state = sample_state();
        state.pause_history.push(PauseEntry::new(t0, PauseReason::Manual));

        let mut closed = PauseEntry::new(t0, PauseReason::Manual);
        closed.resumed_at = Some(t0 + Duration::minutes(5));
        let fresh = PauseEntry::new(t0 + Duration::minutes(30), PauseReason::Break);

        state.apply(&TimerUpdate {
            pause_history: Some(vec![closed, fresh.clone()]),
            ..Default::default()
        });

        assert_eq!(state.pause_history.len(), 2);
        assert_eq!(state.pause_history[0].resumed_at, Some(t0 + Duration::minutes(5)));
        assert_eq!(state.pause_history[1], fresh);
    }

    #[test]
    fn document_uses_camel_case_fields() {
        let json = serde_json::to_value(sample_state()).unwrap();
        assert!(json.get("syncVersion").is_some());
        assert!(json.get("timeRemaining").is_some());
        assert!(json.get("idempotencyKey").is_some());
    }

    #[test]
    fn log_records_time_spent() {
        let mut state = sample_state();
        state.time_remaining = 1800;
        let log = TimerLog::from_completion(&state, &CompletionData::default(), Utc::now());
        assert_eq!(log.time_spent_secs, 5400);
        assert_eq!(log.timer_id, state.id);
    }
}
