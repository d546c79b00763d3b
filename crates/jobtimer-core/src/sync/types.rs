//! Core types for timer synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::TimerState;

/// Per-timer sync state.
///
/// A timer is `Clean` when the last local value was committed, `Dirty`
/// while an optimistic value waits in the retry queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncState {
    Clean,
    Dirty {
        pending: Box<TimerState>,
        since: DateTime<Utc>,
    },
}

impl SyncState {
    pub fn is_dirty(&self) -> bool {
        matches!(self, SyncState::Dirty { .. })
    }

    pub fn mark_dirty(&mut self, pending: TimerState, now: DateTime<Utc>) {
        // Keep the original `since` when a dirty timer is written again.
        let since = match self {
            SyncState::Dirty { since, .. } => *since,
            SyncState::Clean => now,
        };
        *self = SyncState::Dirty {
            pending: Box::new(pending),
            since,
        };
    }

    pub fn mark_clean(&mut self) {
        *self = SyncState::Clean;
    }
}

/// Summary of a persistence instance's sync bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Writes waiting in the retry queue.
    pub pending_retries: usize,
    /// Timers whose latest local value is not yet committed.
    pub dirty_timers: Vec<String>,
    /// Listeners still attached.
    pub active_listeners: usize,
    /// Earliest retry deadline.
    pub next_retry_at: Option<DateTime<Utc>>,
}
