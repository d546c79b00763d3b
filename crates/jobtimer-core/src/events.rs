use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::{ConflictReason, ResolutionKind};
use crate::timer::CompletionReason;

/// Every state change made by the persistence layer produces an Event.
/// Callers drain them; `RetryExhausted` is the only channel for a write
/// that was finally given up on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    TimerInitialized {
        timer_id: String,
        user_id: String,
        project_id: String,
        at: DateTime<Utc>,
    },
    TimerUpdated {
        timer_id: String,
        sync_version: u64,
        optimistic: bool,
        at: DateTime<Utc>,
    },
    /// A divergence was detected and reconciled before writing.
    ConflictResolved {
        timer_id: String,
        kind: ResolutionKind,
        reasons: Vec<ConflictReason>,
        sync_version: u64,
        at: DateTime<Utc>,
    },
    /// An optimistic write failed and is waiting for retry.
    WriteQueued {
        timer_id: String,
        error: String,
        next_attempt_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    RetrySucceeded {
        timer_id: String,
        attempts: u32,
        sync_version: u64,
        at: DateTime<Utc>,
    },
    /// Retries ran out; the write was dropped.
    RetryExhausted {
        timer_id: String,
        attempts: u32,
        last_error: String,
        at: DateTime<Utc>,
    },
    TimerCompleted {
        timer_id: String,
        log_id: String,
        reason: CompletionReason,
        at: DateTime<Utc>,
    },
    ListenerError {
        timer_id: String,
        error: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn timer_id(&self) -> &str {
        match self {
            Event::TimerInitialized { timer_id, .. }
            | Event::TimerUpdated { timer_id, .. }
            | Event::ConflictResolved { timer_id, .. }
            | Event::WriteQueued { timer_id, .. }
            | Event::RetrySucceeded { timer_id, .. }
            | Event::RetryExhausted { timer_id, .. }
            | Event::TimerCompleted { timer_id, .. }
            | Event::ListenerError { timer_id, .. } => timer_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Event::TimerInitialized { at, .. }
            | Event::TimerUpdated { at, .. }
            | Event::ConflictResolved { at, .. }
            | Event::WriteQueued { at, .. }
            | Event::RetrySucceeded { at, .. }
            | Event::RetryExhausted { at, .. }
            | Event::TimerCompleted { at, .. }
            | Event::ListenerError { at, .. } => *at,
        }
    }
}
