//! Retry queue for failed timer writes.
//!
//! Entries are keyed by timer id: a newer failed write for the same timer
//! replaces the pending one. Backoff is exponential and bounded by
//! `max_retries`; an exhausted entry is dropped and handed back once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::TimerState;

/// Backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retry attempts allowed after the initial failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.retry_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn next_attempt_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(attempt))
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now + delay
    }
}

/// A buffered write awaiting retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub timer_id: String,
    /// Full document the failed write tried to commit.
    pub state: TimerState,
    /// Retry attempts already made.
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub queued_at: DateTime<Utc>,
    pub last_error: String,
}

/// What happened to an entry whose retry failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Requeued for another attempt.
    Scheduled { attempt: u32, at: DateTime<Utc> },
    /// A newer write for the same timer was queued meanwhile; this one is dropped.
    Superseded,
    /// Out of retries; the entry has been dropped.
    Exhausted(PendingWrite),
}

/// Retry queue, private to one persistence instance.
pub struct RetryQueue {
    policy: RetryPolicy,
    pending: HashMap<String, PendingWrite>,
    /// Optional persistent queue file path.
    queue_file: Option<PathBuf>,
}

impl RetryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
            queue_file: None,
        }
    }

    /// Create a queue that can `persist()`/`load()` at `path`.
    pub fn with_path(policy: RetryPolicy, path: PathBuf) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
            queue_file: Some(path),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Queue a failed write, replacing any pending write for the same timer.
    /// Returns when the first retry is due.
    pub fn enqueue(
        &mut self,
        state: TimerState,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let next_attempt_at = self.policy.next_attempt_at(1, now);
        self.pending.insert(
            state.id.clone(),
            PendingWrite {
                timer_id: state.id.clone(),
                state,
                attempts: 0,
                next_attempt_at,
                queued_at: now,
                last_error: error.into(),
            },
        );
        next_attempt_at
    }

    /// Remove and return every entry due at `now`, oldest deadline first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<PendingWrite> {
        let mut due = Vec::new();
        self.pending.retain(|_, entry| {
            if entry.next_attempt_at <= now {
                due.push(entry.clone());
                false
            } else {
                true
            }
        });
        due.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        due
    }

    /// Record a failed retry of an entry previously taken with `take_due`.
    pub fn record_failure(
        &mut self,
        mut entry: PendingWrite,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> RetryOutcome {
        if self.pending.contains_key(&entry.timer_id) {
            return RetryOutcome::Superseded;
        }

        entry.attempts += 1;
        entry.last_error = error.into();
        if entry.attempts >= self.policy.max_retries {
            return RetryOutcome::Exhausted(entry);
        }

        let at = self.policy.next_attempt_at(entry.attempts + 1, now);
        entry.next_attempt_at = at;
        let attempt = entry.attempts + 1;
        self.pending.insert(entry.timer_id.clone(), entry);
        RetryOutcome::Scheduled { attempt, at }
    }

    pub fn remove(&mut self, timer_id: &str) -> Option<PendingWrite> {
        self.pending.remove(timer_id)
    }

    pub fn get(&self, timer_id: &str) -> Option<&PendingWrite> {
        self.pending.get(timer_id)
    }

    pub fn contains(&self, timer_id: &str) -> bool {
        self.pending.contains_key(timer_id)
    }

    /// Pending entries ordered by next attempt.
    pub fn entries(&self) -> Vec<&PendingWrite> {
        let mut entries: Vec<&PendingWrite> = self.pending.values().collect();
        entries.sort_by(|a, b| a.next_attempt_at.cmp(&b.next_attempt_at));
        entries
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Time until the earliest entry is due; zero if one is overdue.
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.pending
            .values()
            .map(|p| p.next_attempt_at)
            .min()
            .map(|t| {
                if t > now {
                    t - now
                } else {
                    chrono::Duration::zero()
                }
            })
    }

    /// Persist queue to disk. A queue without a path persists nothing.
    pub fn persist(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        let data = serde_json::to_string_pretty(&self.pending)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Load queue from disk, replacing in-memory entries.
    pub fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(path) = &self.queue_file else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let loaded: HashMap<String, PendingWrite> = serde_json::from_str(&content)?;
        self.pending = loaded;
        Ok(())
    }
}

impl Default for RetryQueue {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
