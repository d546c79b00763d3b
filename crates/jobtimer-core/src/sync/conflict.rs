//! Conflict detection between a stored timer and an incoming update.

use serde::{Deserialize, Serialize};

use crate::timer::{TimerState, TimerUpdate};

/// Allowed disagreement on `time_remaining` before two writers are
/// considered to have diverged.
pub const DEFAULT_DRIFT_THRESHOLD_SECS: i64 = 60;

/// Tunable detection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    pub drift_threshold_secs: i64,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
        }
    }
}

/// Why an update conflicts with the stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictReason {
    /// The update was based on an older document.
    StaleVersion { current: u64, incoming: u64 },
    /// Running flag flipped without an explicit transition.
    RunningMismatch { current: bool, incoming: bool },
    /// Remaining time diverged beyond the drift threshold.
    TimeDrift {
        current: i64,
        incoming: i64,
        drift: i64,
    },
}

/// Every reason `incoming` conflicts with `current`. Pure and cheap.
pub fn conflict_reasons(
    current: &TimerState,
    incoming: &TimerUpdate,
    policy: &ConflictPolicy,
) -> Vec<ConflictReason> {
    let mut reasons = Vec::new();

    if let Some(version) = incoming.sync_version {
        if version < current.sync_version {
            reasons.push(ConflictReason::StaleVersion {
                current: current.sync_version,
                incoming: version,
            });
        }
    }

    if let Some(running) = incoming.is_running {
        if running != current.is_running && incoming.transition.is_none() {
            reasons.push(ConflictReason::RunningMismatch {
                current: current.is_running,
                incoming: running,
            });
        }
    }

    if let Some(remaining) = incoming.time_remaining {
        let drift = remaining.saturating_sub(current.time_remaining).saturating_abs();
        if drift > policy.drift_threshold_secs {
            reasons.push(ConflictReason::TimeDrift {
                current: current.time_remaining,
                incoming: remaining,
                drift,
            });
        }
    }

    reasons
}

/// Whether `incoming` conflicts with `current`.
pub fn detect_conflict(
    current: &TimerState,
    incoming: &TimerUpdate,
    policy: &ConflictPolicy,
) -> bool {
    !conflict_reasons(current, incoming, policy).is_empty()
}
