//! Conflict resolution for timer documents.
//!
//! `current` is always the copy held by the store, `incoming` the competing
//! local state. No strategy drops or reorders pause history entries.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::timer::{PauseEntry, TimerState};

/// Resolution strategy, configured per persistence instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Later `last_updated` wins the whole document.
    #[default]
    LastWriteWins,
    /// Field-level reconciliation.
    Merge,
    /// Client-authoritative: the local state always wins.
    LocalWins,
}

/// Which side the resolved document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    LocalWins,
    RemoteWins,
    Merged,
}

/// Outcome of resolving a conflict; `resolved` is ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub kind: ResolutionKind,
    pub resolved: TimerState,
}

/// Resolve a conflict between the stored document and a local state.
pub fn resolve_conflict(
    current: &TimerState,
    incoming: &TimerState,
    strategy: ResolutionStrategy,
) -> Resolution {
    let top_version = current.sync_version.max(incoming.sync_version);
    match strategy {
        ResolutionStrategy::LastWriteWins => {
            let local_newer = incoming_is_newer(current, incoming);
            let kind = if local_newer {
                ResolutionKind::LocalWins
            } else {
                ResolutionKind::RemoteWins
            };
            let mut resolved = take_whole(current, incoming, local_newer);
            resolved.sync_version = top_version + 1;
            Resolution { kind, resolved }
        }
        ResolutionStrategy::Merge => {
            let mut resolved = merge_fields(current, incoming);
            resolved.sync_version = current.sync_version + 1;
            Resolution {
                kind: ResolutionKind::Merged,
                resolved,
            }
        }
        ResolutionStrategy::LocalWins => {
            let mut resolved = take_whole(current, incoming, true);
            resolved.sync_version = top_version + 1;
            Resolution {
                kind: ResolutionKind::LocalWins,
                resolved,
            }
        }
    }
}

/// Later `last_updated` wins; equal timestamps fall back to `sync_version`,
/// and a full tie goes to the local side.
fn incoming_is_newer(current: &TimerState, incoming: &TimerState) -> bool {
    match incoming.last_updated.cmp(&current.last_updated) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => incoming.sync_version >= current.sync_version,
    }
}

/// Winner's fields, identity from the stored document, pause history from both.
fn take_whole(current: &TimerState, incoming: &TimerState, local_wins: bool) -> TimerState {
    let (winner, loser) = if local_wins {
        (incoming, current)
    } else {
        (current, incoming)
    };
    let mut resolved = winner.clone();
    keep_identity(&mut resolved, current);
    resolved.pause_history = merge_pause_history(&winner.pause_history, &loser.pause_history);
    resolved.pause_count = pause_count_of(&resolved.pause_history);
    resolved
}

/// Scalars from the newer side (empty values filled from the older side),
/// pause history concatenated and de-duplicated.
fn merge_fields(current: &TimerState, incoming: &TimerState) -> TimerState {
    let (newer, older) = if incoming_is_newer(current, incoming) {
        (incoming, current)
    } else {
        (current, incoming)
    };

    let mut merged = newer.clone();
    keep_identity(&mut merged, current);
    if merged.job_card_title.is_empty() {
        merged.job_card_title = older.job_card_title.clone();
    }
    merged.start_time = newer.start_time.or(older.start_time);
    if merged.device_id.is_empty() {
        merged.device_id = older.device_id.clone();
    }
    if merged.session_id.is_empty() {
        merged.session_id = older.session_id.clone();
    }
    merged.last_updated = newer.last_updated.max(older.last_updated);
    merged.pause_history = merge_pause_history(&current.pause_history, &incoming.pause_history);
    merged.pause_count = pause_count_of(&merged.pause_history);
    merged
}

/// Owner references and the allocation never change after creation.
fn keep_identity(target: &mut TimerState, current: &TimerState) {
    target.id = current.id.clone();
    target.user_id = current.user_id.clone();
    target.project_id = current.project_id.clone();
    target.job_card_id = current.job_card_id.clone();
    target.allocated_hours = current.allocated_hours;
    target.idempotency_key = current.idempotency_key.clone();
}

/// The counter always matches the merged history.
fn pause_count_of(history: &[PauseEntry]) -> u32 {
    u32::try_from(history.len()).unwrap_or(u32::MAX)
}

/// Union of two pause histories keyed by `paused_at`.
///
/// Entries present on both sides are kept once, gaining `resumed_at` from
/// whichever side has it. Remaining entries are interleaved by `paused_at`
/// without reordering either input.
pub fn merge_pause_history(primary: &[PauseEntry], secondary: &[PauseEntry]) -> Vec<PauseEntry> {
    let mut base: Vec<PauseEntry> = primary.to_vec();
    let mut extra: Vec<PauseEntry> = Vec::new();

    for entry in secondary {
        match base.iter_mut().find(|e| e.paused_at == entry.paused_at) {
            Some(existing) => {
                if existing.resumed_at.is_none() {
                    existing.resumed_at = entry.resumed_at;
                }
            }
            None => {
                if !extra.iter().any(|e| e.paused_at == entry.paused_at) {
                    extra.push(entry.clone());
                }
            }
        }
    }

    let mut merged = Vec::with_capacity(base.len() + extra.len());
    let mut left = base.into_iter().peekable();
    let mut right = extra.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l.paused_at <= r.paused_at,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    merged
}
