//! Document store boundary.
//!
//! The remote database is an external collaborator: it reads and writes
//! whole documents, commits batches atomically, and pushes full-document
//! snapshots to subscribers. Path conventions:
//!
//! - `timers/{id}` -- live timers
//! - `timerLogs/{autoId}` -- completed-session archives
//! - `slotReservations/{id}` -- ephemeral holds owned by a live timer

mod feed;
pub mod memory;
pub mod sqlite;

pub use feed::ChangeFeed;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use crate::error::StoreError;
use crate::timer::{SlotReservation, TimerLog, TimerState};

/// Snapshot delivered to subscribers. `Ok(None)` means the document was
/// deleted.
pub type Snapshot = Result<Option<TimerState>, StoreError>;

/// Subscriber callback.
pub type SnapshotCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Handle for a store-level subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

pub fn timer_path(id: &str) -> String {
    format!("timers/{id}")
}

pub fn log_path(id: &str) -> String {
    format!("timerLogs/{id}")
}

pub fn reservation_path(id: &str) -> String {
    format!("slotReservations/{id}")
}

/// A single write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create `timers/{id}`; fails the batch if the document exists.
    Create(TimerState),
    /// Create or overwrite `timers/{id}`.
    Put(TimerState),
    /// Delete `timers/{id}`; fails the batch if the document is missing.
    Delete(String),
    PutReservation(SlotReservation),
    /// Delete every reservation owned by the timer.
    DeleteReservations { timer_id: String },
    /// Append an immutable `timerLogs` record.
    AppendLog(TimerLog),
}

impl WriteOp {
    pub fn path(&self) -> String {
        match self {
            WriteOp::Create(state) | WriteOp::Put(state) => timer_path(&state.id),
            WriteOp::Delete(id) => timer_path(id),
            WriteOp::PutReservation(r) => reservation_path(&r.id),
            WriteOp::DeleteReservations { timer_id } => {
                format!("slotReservations?timerId={timer_id}")
            }
            WriteOp::AppendLog(log) => log_path(&log.id),
        }
    }

    /// Live timer id whose subscribers must hear about this write.
    pub fn touched_timer(&self) -> Option<&str> {
        match self {
            WriteOp::Create(state) | WriteOp::Put(state) => Some(&state.id),
            WriteOp::Delete(id) => Some(id),
            _ => None,
        }
    }
}

/// Ordered set of writes committed all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, state: TimerState) -> Self {
        self.ops.push(WriteOp::Create(state));
        self
    }

    pub fn put(mut self, state: TimerState) -> Self {
        self.ops.push(WriteOp::Put(state));
        self
    }

    pub fn delete(mut self, id: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete(id.into()));
        self
    }

    pub fn put_reservation(mut self, reservation: SlotReservation) -> Self {
        self.ops.push(WriteOp::PutReservation(reservation));
        self
    }

    pub fn delete_reservations(mut self, timer_id: impl Into<String>) -> Self {
        self.ops.push(WriteOp::DeleteReservations {
            timer_id: timer_id.into(),
        });
        self
    }

    pub fn append_log(mut self, log: TimerLog) -> Self {
        self.ops.push(WriteOp::AppendLog(log));
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Distinct live timer ids written by this batch, in first-touch order.
    pub fn touched_timers(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.ops.iter().filter_map(WriteOp::touched_timer) {
            if !ids.iter().any(|seen| seen == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }
}

/// Remote document database holding timer documents.
///
/// Implementations must be safe to share behind an `Arc`; the sync layer
/// never locks documents, it relies on `sync_version` comparison only.
pub trait DocumentStore: Send + Sync {
    /// Read `timers/{id}`; `Ok(None)` when it does not exist.
    fn get(&self, id: &str) -> Result<Option<TimerState>, StoreError>;

    /// Live timers owned by `user_id`, most recently updated first.
    fn query_by_user(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TimerState>, StoreError>;

    /// Live timer of `user_id` created with `key`, if any.
    fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<TimerState>, StoreError>;

    fn reservations_for(&self, timer_id: &str) -> Result<Vec<SlotReservation>, StoreError>;

    fn logs_for_timer(&self, timer_id: &str) -> Result<Vec<TimerLog>, StoreError>;

    /// Commit every op in the batch, or none of them.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Push subscription on `timers/{id}`. The current snapshot is delivered
    /// right away, then one snapshot per change.
    fn subscribe(&self, id: &str, callback: SnapshotCallback)
        -> Result<SubscriptionId, StoreError>;

    /// Release a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, subscription: SubscriptionId);

    /// Single-document write.
    fn put(&self, state: &TimerState) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().put(state.clone()))
    }

    /// Single-document create; `StoreError::AlreadyExists` when taken.
    fn create(&self, state: &TimerState) -> Result<(), StoreError> {
        self.commit(WriteBatch::new().create(state.clone()))
    }
}
