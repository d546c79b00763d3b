use chrono::Utc;
use clap::Subcommand;
use jobtimer_core::timer::{
    CompletionData, CompletionReason, LocalTimer, NewTimer, PauseReason, TimerState, TimerUpdate,
};
use serde_json::json;

use super::{parse_enum, print_json, Session};

#[derive(Subcommand)]
pub enum TimerAction {
    /// Create a timer for a job card
    Init {
        #[arg(long)]
        user: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        job_card: String,
        /// Job card title
        #[arg(long, default_value = "")]
        title: String,
        /// Allocated hours
        #[arg(long)]
        hours: f64,
        /// Seconds remaining (defaults to the full allocation)
        #[arg(long)]
        remaining: Option<i64>,
        /// Start running immediately
        #[arg(long)]
        start: bool,
        /// Idempotency key
        #[arg(long)]
        key: Option<String>,
    },
    /// Write a partial update
    Update {
        id: String,
        #[arg(long)]
        remaining: Option<i64>,
        #[arg(long)]
        title: Option<String>,
        /// Read and reconcile with the stored copy before writing
        #[arg(long)]
        checked: bool,
    },
    /// Pause a running timer
    Pause {
        id: String,
        /// manual, break, idle or system_sleep
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// Resume a paused timer
    Resume { id: String },
    /// Archive the session and remove the live timer
    Complete {
        id: String,
        /// finished, stopped or exceeded
        #[arg(long, default_value = "finished")]
        reason: String,
        #[arg(long)]
        remaining: Option<i64>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Print a timer as JSON
    Status { id: String },
    /// List a user's live timers
    List {
        #[arg(long)]
        user: String,
        #[arg(long)]
        limit: Option<usize>,
    },
}

pub fn run(action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = Session::open()?;
    let result = dispatch(&mut session, action);
    session.close();
    result
}

fn dispatch(session: &mut Session, action: TimerAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        TimerAction::Init {
            user,
            project,
            job_card,
            title,
            hours,
            remaining,
            start,
            key,
        } => {
            let id = session.persistence.initialize_timer(NewTimer {
                user_id: user,
                project_id: project,
                job_card_id: job_card,
                job_card_title: title.clone(),
                allocated_hours: hours,
                time_remaining: remaining,
                device_id: String::new(),
                start_running: start,
                idempotency_key: key,
            })?;
            if start {
                session.notifier.notify_timer_started(&title);
            }
            print_json(&json!({ "id": id }))?;
        }
        TimerAction::Update {
            id,
            remaining,
            title,
            checked,
        } => {
            let update = TimerUpdate {
                time_remaining: remaining,
                job_card_title: title,
                ..Default::default()
            };
            let committed = session.persistence.update_timer(&id, update, !checked)?;
            print_outcome(session, &id, committed)?;
        }
        TimerAction::Pause { id, reason } => {
            let reason: PauseReason = parse_enum("pause reason", &reason)?;
            let mut local = LocalTimer::new(load(session, &id)?);
            let update = local.pause(reason, Utc::now())?;
            let committed = session.persistence.update_timer(&id, update, true)?;
            session.notifier.notify_timer_paused(title_of(local.state()));
            print_outcome(session, &id, committed)?;
        }
        TimerAction::Resume { id } => {
            let mut local = LocalTimer::new(load(session, &id)?);
            let update = local.resume(Utc::now())?;
            let committed = session.persistence.update_timer(&id, update, true)?;
            session.notifier.notify_timer_resumed(title_of(local.state()));
            print_outcome(session, &id, committed)?;
        }
        TimerAction::Complete {
            id,
            reason,
            remaining,
            notes,
        } => {
            let reason: CompletionReason = parse_enum("completion reason", &reason)?;
            let state = load(session, &id)?;
            let data = CompletionData {
                reason,
                time_remaining: remaining,
                notes,
            };
            let completed = session.persistence.complete_timer(&id, data)?;
            if completed {
                session.notifier.notify_timer_stopped(title_of(&state));
            }
            print_json(&json!({ "id": id, "completed": completed }))?;
        }
        TimerAction::Status { id } => {
            let state = load(session, &id)?;
            let warning_minutes = session.config.notifications.warning_minutes;
            session.notifier.observe(&state, warning_minutes);
            print_json(&json!({
                "status": state.status(),
                "timer": state,
            }))?;
        }
        TimerAction::List { user, limit } => {
            let limit = limit.unwrap_or(session.config.sync.active_timer_limit);
            let timers = session.persistence.get_active_timers(&user, Some(limit))?;
            print_json(&timers)?;
        }
    }
    Ok(())
}

fn load(session: &Session, id: &str) -> Result<TimerState, Box<dyn std::error::Error>> {
    session
        .persistence
        .get_timer(id)?
        .ok_or_else(|| format!("timer not found: {id}").into())
}

fn title_of(state: &TimerState) -> &str {
    if state.job_card_title.is_empty() {
        &state.job_card_id
    } else {
        &state.job_card_title
    }
}

/// Print the write outcome with the freshest local view of the timer.
fn print_outcome(
    session: &Session,
    id: &str,
    committed: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    print_json(&json!({
        "id": id,
        "committed": committed,
        "timer": session.persistence.local_state(id),
    }))
}
