//! Local timer state machine.
//!
//! Mutates a `TimerState` optimistically and hands back the `TimerUpdate`
//! to commit. The caller drives time forward with `tick()`; there are no
//! internal threads.
//!
//! ```text
//! Stopped -> Running <-> Paused
//!    ^          |           |
//!    +----------+-----------+  (stop)
//! ```

use chrono::{DateTime, Utc};

use super::state::{PauseEntry, PauseReason, TimerState, TimerStatus, TimerUpdate, Transition};
use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalTimer {
    state: TimerState,
}

impl LocalTimer {
    pub fn new(state: TimerState) -> Self {
        Self { state }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn into_state(self) -> TimerState {
        self.state
    }

    pub fn status(&self) -> TimerStatus {
        self.state.status()
    }

    /// Running and within `warning_secs` of the allocation, not yet over it.
    pub fn time_warning_due(&self, warning_secs: i64) -> bool {
        self.state.is_running
            && self.state.time_remaining > 0
            && self.state.time_remaining <= warning_secs
    }

    pub fn is_exceeded(&self) -> bool {
        self.state.is_exceeded()
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<TimerUpdate, ValidationError> {
        match self.status() {
            TimerStatus::Stopped => {
                self.state.is_running = true;
                self.state.is_paused = false;
                self.state.start_time = Some(now);
                self.state.last_updated = now;
                Ok(TimerUpdate {
                    start_time: Some(now),
                    is_running: Some(true),
                    is_paused: Some(false),
                    last_updated: Some(now),
                    ..Default::default()
                }
                .with_transition(Transition::Start))
            }
            status => Err(invalid("start", status)),
        }
    }

    pub fn pause(
        &mut self,
        reason: PauseReason,
        now: DateTime<Utc>,
    ) -> Result<TimerUpdate, ValidationError> {
        match self.status() {
            TimerStatus::Running => {
                let entry = PauseEntry::new(now, reason);
                self.state.pause_history.push(entry.clone());
                self.state.pause_count += 1;
                self.state.is_running = false;
                self.state.is_paused = true;
                self.state.last_updated = now;
                Ok(TimerUpdate {
                    is_running: Some(false),
                    is_paused: Some(true),
                    pause_count: Some(self.state.pause_count),
                    pause_history: Some(vec![entry]),
                    last_updated: Some(now),
                    ..Default::default()
                }
                .with_transition(Transition::Pause))
            }
            status => Err(invalid("pause", status)),
        }
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<TimerUpdate, ValidationError> {
        match self.status() {
            TimerStatus::Paused => {
                let closed = self.close_open_pause(now);
                self.state.is_running = true;
                self.state.is_paused = false;
                self.state.start_time = Some(now);
                self.state.last_updated = now;
                Ok(TimerUpdate {
                    start_time: Some(now),
                    is_running: Some(true),
                    is_paused: Some(false),
                    pause_history: closed.map(|e| vec![e]),
                    last_updated: Some(now),
                    ..Default::default()
                }
                .with_transition(Transition::Resume))
            }
            status => Err(invalid("resume", status)),
        }
    }

    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<TimerUpdate, ValidationError> {
        match self.status() {
            TimerStatus::Running | TimerStatus::Paused => {
                let closed = self.close_open_pause(now);
                self.state.is_running = false;
                self.state.is_paused = false;
                self.state.last_updated = now;
                Ok(TimerUpdate {
                    is_running: Some(false),
                    is_paused: Some(false),
                    pause_history: closed.map(|e| vec![e]),
                    last_updated: Some(now),
                    ..Default::default()
                }
                .with_transition(Transition::Stop))
            }
            TimerStatus::Stopped => Err(invalid("stop", TimerStatus::Stopped)),
        }
    }

    /// Consume `elapsed_secs` of the allocation. Returns `None` unless the
    /// timer is running.
    pub fn tick(&mut self, elapsed_secs: u64, now: DateTime<Utc>) -> Option<TimerUpdate> {
        if !self.state.is_running || elapsed_secs == 0 {
            return None;
        }
        let elapsed = i64::try_from(elapsed_secs).unwrap_or(i64::MAX);
        self.state.time_remaining = self.state.time_remaining.saturating_sub(elapsed);
        self.state.last_updated = now;
        Some(TimerUpdate {
            time_remaining: Some(self.state.time_remaining),
            last_updated: Some(now),
            ..Default::default()
        })
    }

    fn close_open_pause(&mut self, now: DateTime<Utc>) -> Option<PauseEntry> {
        let open = self.state.pause_history.iter_mut().rev().find(|e| e.is_open())?;
        open.resumed_at = Some(now);
        Some(open.clone())
    }
}

fn invalid(action: &str, status: TimerStatus) -> ValidationError {
    ValidationError::InvalidTransition {
        action: action.to_string(),
        status: status.to_string(),
    }
}
