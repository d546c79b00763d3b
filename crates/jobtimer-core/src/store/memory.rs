//! In-process document store with fault injection.
//!
//! Stands in for the remote database in headless runs and tests. Writes
//! can be made to fail (`fail_next_writes`, `set_offline`) and transport
//! errors can be pushed to listeners (`inject_listener_error`).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{ChangeFeed, DocumentStore, SnapshotCallback, SubscriptionId, WriteBatch, WriteOp};
use crate::error::StoreError;
use crate::timer::{SlotReservation, TimerLog, TimerState};

#[derive(Debug, Clone, Default)]
struct Documents {
    timers: HashMap<String, TimerState>,
    reservations: HashMap<String, SlotReservation>,
    logs: Vec<TimerLog>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_writes: u32,
    offline: bool,
    reject_subscriptions: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<Documents>,
    faults: Mutex<Faults>,
    commits: Mutex<u64>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` commits with `StoreError::Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        self.faults().fail_writes = n;
    }

    /// While offline every read, write and subscribe fails.
    pub fn set_offline(&self, offline: bool) {
        self.faults().offline = offline;
    }

    pub fn reject_subscriptions(&self, reject: bool) {
        self.faults().reject_subscriptions = reject;
    }

    /// Push a transport error to every listener of `timers/{id}`.
    pub fn inject_listener_error(&self, id: &str, error: StoreError) {
        self.feed.publish(id, Err(error));
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscriber_count(&self) -> usize {
        self.feed.subscriber_count()
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn docs(&self) -> Result<MutexGuard<'_, Documents>, StoreError> {
        self.docs
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.faults().offline {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    fn take_write_fault(&self) -> Result<(), StoreError> {
        let mut faults = self.faults();
        if faults.offline {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        if faults.fail_writes > 0 {
            faults.fail_writes -= 1;
            return Err(StoreError::Unavailable("simulated write failure".into()));
        }
        Ok(())
    }
}

fn apply_op(docs: &mut Documents, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Create(state) => {
            if docs.timers.contains_key(&state.id) {
                return Err(StoreError::AlreadyExists(op.path()));
            }
            docs.timers.insert(state.id.clone(), state.clone());
        }
        WriteOp::Put(state) => {
            docs.timers.insert(state.id.clone(), state.clone());
        }
        WriteOp::Delete(id) => {
            if docs.timers.remove(id).is_none() {
                return Err(StoreError::WriteRejected(format!(
                    "{} does not exist",
                    op.path()
                )));
            }
        }
        WriteOp::PutReservation(r) => {
            docs.reservations.insert(r.id.clone(), r.clone());
        }
        WriteOp::DeleteReservations { timer_id } => {
            docs.reservations.retain(|_, r| &r.timer_id != timer_id);
        }
        WriteOp::AppendLog(log) => {
            if docs.logs.iter().any(|l| l.id == log.id) {
                return Err(StoreError::WriteRejected(format!(
                    "{} already exists",
                    op.path()
                )));
            }
            docs.logs.push(log.clone());
        }
    }
    Ok(())
}

impl DocumentStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Option<TimerState>, StoreError> {
        self.check_online()?;
        Ok(self.docs()?.timers.get(id).cloned())
    }

    fn query_by_user(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TimerState>, StoreError> {
        self.check_online()?;
        let mut timers: Vec<TimerState> = self
            .docs()?
            .timers
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        timers.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
        if let Some(limit) = limit {
            timers.truncate(limit);
        }
        Ok(timers)
    }

    fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<TimerState>, StoreError> {
        self.check_online()?;
        Ok(self
            .docs()?
            .timers
            .values()
            .find(|t| t.user_id == user_id && t.idempotency_key == key)
            .cloned())
    }

    fn reservations_for(&self, timer_id: &str) -> Result<Vec<SlotReservation>, StoreError> {
        self.check_online()?;
        let mut found: Vec<SlotReservation> = self
            .docs()?
            .reservations
            .values()
            .filter(|r| r.timer_id == timer_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.starts_at.cmp(&b.starts_at));
        Ok(found)
    }

    fn logs_for_timer(&self, timer_id: &str) -> Result<Vec<TimerLog>, StoreError> {
        self.check_online()?;
        Ok(self
            .docs()?
            .logs
            .iter()
            .filter(|l| l.timer_id == timer_id)
            .cloned()
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.take_write_fault()?;

        let touched = batch.touched_timers();
        let snapshots: Vec<(String, Option<TimerState>)> = {
            let mut docs = self.docs()?;
            // Stage on a copy so a failing op leaves nothing behind.
            let mut staged = docs.clone();
            for op in batch.ops() {
                apply_op(&mut staged, op)?;
            }
            *docs = staged;
            touched
                .into_iter()
                .map(|id| {
                    let snapshot = docs.timers.get(&id).cloned();
                    (id, snapshot)
                })
                .collect()
        };
        *self.commits.lock().unwrap_or_else(|e| e.into_inner()) += 1;

        for (id, snapshot) in snapshots {
            self.feed.publish(&id, Ok(snapshot));
        }
        Ok(())
    }

    fn subscribe(
        &self,
        id: &str,
        callback: SnapshotCallback,
    ) -> Result<SubscriptionId, StoreError> {
        self.check_online()?;
        if self.faults().reject_subscriptions {
            return Err(StoreError::Unavailable("subscriptions rejected".into()));
        }
        let current = self.docs()?.timers.get(id).cloned();
        let subscription = self.feed.subscribe(id, callback.clone());
        callback(Ok(current));
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.feed.unsubscribe(subscription);
    }
}
