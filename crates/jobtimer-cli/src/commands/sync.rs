use chrono::Utc;
use clap::Subcommand;
use serde_json::json;

use super::{print_json, Session};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Show queued writes
    Status,
    /// Retry every queued write that is due
    Retry,
}

pub fn run(action: SyncAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::open()?;
    let now = Utc::now();

    let result = match action {
        SyncAction::Status => {
            let status = session.persistence.sync_status(now);
            let queued = session.persistence.retry_queue().entries();
            print_json(&json!({
                "pendingRetries": status.pending_retries,
                "nextRetryAt": status.next_retry_at,
                "queued": queued,
            }))
        }
        SyncAction::Retry => {
            let report = session.persistence.process_retries(now);
            let events = session.persistence.drain_events();
            print_json(&json!({
                "report": report,
                "events": events,
                "pendingRetries": session.persistence.pending_retries(),
            }))
        }
    };

    session.close();
    result
}
