mod local;
mod state;

pub use local::LocalTimer;
pub use state::{
    CompletionData, CompletionReason, NewTimer, PauseEntry, PauseReason, SlotReservation,
    TimerLog, TimerState, TimerStatus, TimerUpdate, Transition,
};

/// Deterministic live-timer id:
/// `timer_{userId}_{projectId}_{jobCardId}_{timestampMillis}`.
pub fn timer_id(user_id: &str, project_id: &str, job_card_id: &str, created_at_ms: i64) -> String {
    format!("timer_{user_id}_{project_id}_{job_card_id}_{created_at_ms}")
}
