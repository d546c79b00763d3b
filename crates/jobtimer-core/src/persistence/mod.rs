//! Timer persistence adapter.
//!
//! `TimerPersistence` owns the local view of every timer this instance has
//! touched and mediates all writes to the document store:
//!
//! - optimistic updates are applied locally first and queued for retry
//!   when the store rejects them
//! - non-optimistic updates read the stored copy, detect divergence and
//!   resolve it before writing
//! - completion archives the session and removes the live document in one
//!   atomic batch
//!
//! Conflicts never surface as errors; they are resolved here and reported
//! through [`Event::ConflictResolved`].

mod listener;

pub use listener::ListenerHandle;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PersistenceError, Result, StoreError, ValidationError};
use crate::events::Event;
use crate::storage::Config;
use crate::store::{DocumentStore, SnapshotCallback, WriteBatch};
use crate::sync::{
    conflict_reasons, detect_conflict, new_session_id, resolve_conflict, ConflictPolicy,
    Resolution, ResolutionStrategy, RetryOutcome, RetryPolicy, RetryQueue, SyncState, SyncStatus,
};
use crate::timer::{
    timer_id, CompletionData, NewTimer, SlotReservation, TimerLog, TimerState, TimerUpdate,
};

/// Policy knobs for one persistence instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceOptions {
    pub strategy: ResolutionStrategy,
    pub conflict: ConflictPolicy,
    pub retry: RetryPolicy,
    /// Written into new timers that do not name a device.
    pub device_id: String,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::default(),
            conflict: ConflictPolicy::default(),
            retry: RetryPolicy::default(),
            device_id: String::new(),
        }
    }
}

impl PersistenceOptions {
    pub fn from_config(config: &Config, device_id: impl Into<String>) -> Self {
        Self {
            strategy: config.sync.strategy,
            conflict: config.sync.conflict_policy(),
            retry: config.sync.retry_policy(),
            device_id: device_id.into(),
        }
    }
}

/// Result of one `process_retries` pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryReport {
    pub succeeded: Vec<String>,
    pub rescheduled: Vec<String>,
    pub exhausted: Vec<String>,
    /// Entries dropped because the live timer no longer exists.
    pub dropped: Vec<String>,
}

impl RetryReport {
    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty()
            && self.rescheduled.is_empty()
            && self.exhausted.is_empty()
            && self.dropped.is_empty()
    }
}

/// Suffixed ids tried when a generated id is already taken.
const MAX_ID_ATTEMPTS: u32 = 1024;

#[derive(Debug, Clone)]
struct LocalEntry {
    state: TimerState,
    sync: SyncState,
}

impl LocalEntry {
    fn clean(state: TimerState) -> Self {
        Self {
            state,
            sync: SyncState::Clean,
        }
    }
}

pub struct TimerPersistence {
    store: Arc<dyn DocumentStore>,
    options: PersistenceOptions,
    local: HashMap<String, LocalEntry>,
    /// Idempotency key -> timer id, for keys seen by this instance.
    /// Keys from other instances are found through the store.
    idempotency: HashMap<String, String>,
    retry: RetryQueue,
    listeners: Vec<ListenerHandle>,
    events: Arc<Mutex<Vec<Event>>>,
}

impl TimerPersistence {
    pub fn new(store: Arc<dyn DocumentStore>, options: PersistenceOptions) -> Self {
        let retry = RetryQueue::new(options.retry);
        Self {
            store,
            options,
            local: HashMap::new(),
            idempotency: HashMap::new(),
            retry,
            listeners: Vec::new(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Use a pre-loaded retry queue, e.g. one restored from disk.
    pub fn with_retry_queue(mut self, queue: RetryQueue) -> Self {
        self.retry = queue;
        self
    }

    pub fn options(&self) -> &PersistenceOptions {
        &self.options
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Create a timer document with `sync_version = 1` and return its id.
    ///
    /// A repeated idempotency key returns the id of the live timer created
    /// with it, by any instance sharing the store, without writing again.
    /// Ids that collide with a live timer get a numeric suffix; an existing
    /// document is never overwritten.
    ///
    /// # Errors
    /// `ValidationError` for a bad allocation, `PersistenceError::InitializeFailed`
    /// when the store rejects the write. No id is cached on failure.
    pub fn initialize_timer(&mut self, new: NewTimer) -> Result<String> {
        if let Some(key) = &new.idempotency_key {
            if let Some(existing) = self.replayed_timer(&new.user_id, key)? {
                return Ok(existing);
            }
        }
        if !new.allocated_hours.is_finite() || new.allocated_hours <= 0.0 {
            return Err(ValidationError::InvalidValue {
                field: "allocated_hours".into(),
                message: format!("must be a positive number, got {}", new.allocated_hours),
            }
            .into());
        }

        let now = Utc::now();
        let base_id = timer_id(
            &new.user_id,
            &new.project_id,
            &new.job_card_id,
            now.timestamp_millis(),
        );
        let idempotency_key = new
            .idempotency_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let device_id = if new.device_id.is_empty() {
            self.options.device_id.clone()
        } else {
            new.device_id.clone()
        };
        let allocated_secs = (new.allocated_hours * 3600.0).round() as i64;

        let mut state = TimerState {
            id: base_id.clone(),
            user_id: new.user_id,
            project_id: new.project_id,
            job_card_id: new.job_card_id,
            job_card_title: new.job_card_title,
            start_time: new.start_running.then_some(now),
            time_remaining: new.time_remaining.unwrap_or(allocated_secs),
            allocated_hours: new.allocated_hours,
            is_running: new.start_running,
            is_paused: false,
            pause_count: 0,
            pause_history: Vec::new(),
            device_id,
            session_id: new_session_id(),
            sync_version: 1,
            last_updated: now,
            idempotency_key: idempotency_key.clone(),
        };

        let mut attempt = 0;
        loop {
            match self.store.create(&state) {
                Ok(()) => break,
                Err(StoreError::AlreadyExists(_)) if attempt + 1 < MAX_ID_ATTEMPTS => {
                    attempt += 1;
                    state.id = format!("{base_id}_{attempt}");
                    debug!(timer_id = %state.id, attempt, "timer id taken, trying suffix");
                }
                Err(source) => {
                    error!(timer_id = %state.id, error = %source, "timer initialization failed");
                    return Err(PersistenceError::InitializeFailed { source }.into());
                }
            }
        }

        let id = state.id.clone();
        info!(timer_id = %id, user_id = %state.user_id, "timer initialized");
        self.emit(Event::TimerInitialized {
            timer_id: id.clone(),
            user_id: state.user_id.clone(),
            project_id: state.project_id.clone(),
            at: now,
        });
        self.idempotency.insert(idempotency_key, id.clone());
        self.local.insert(id.clone(), LocalEntry::clean(state));
        Ok(id)
    }

    /// Write a partial update.
    ///
    /// Optimistic writes go out immediately at `last_known_local + 1`; on
    /// failure the local state keeps the new value, the timer turns dirty
    /// and the write is queued for retry. Non-optimistic writes read the
    /// stored copy first and resolve any conflict before writing.
    ///
    /// Returns whether the store accepted the write.
    ///
    /// # Errors
    /// `PersistenceError::NotFound` when the timer does not exist, or the
    /// store error when no base state could be read at all.
    pub fn update_timer(
        &mut self,
        id: &str,
        update: TimerUpdate,
        optimistic: bool,
    ) -> Result<bool> {
        if optimistic {
            self.update_optimistic(id, &update)
        } else {
            self.update_checked(id, &update)
        }
    }

    fn update_optimistic(&mut self, id: &str, update: &TimerUpdate) -> Result<bool> {
        let now = Utc::now();
        let base = match self.local.get(id) {
            Some(entry) => entry.state.clone(),
            None => self
                .store
                .get(id)?
                .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?,
        };

        let mut next = base.with_update(update);
        next.sync_version = base.sync_version + 1;
        next.last_updated = update.last_updated.unwrap_or(now);

        match self.store.put(&next) {
            Ok(()) => {
                debug!(timer_id = %id, sync_version = next.sync_version, "optimistic write committed");
                self.retry.remove(id);
                self.emit(Event::TimerUpdated {
                    timer_id: id.to_string(),
                    sync_version: next.sync_version,
                    optimistic: true,
                    at: now,
                });
                self.local.insert(id.to_string(), LocalEntry::clean(next));
                Ok(true)
            }
            Err(err) => {
                self.queue_write(next, &err, now);
                Ok(false)
            }
        }
    }

    fn update_checked(&mut self, id: &str, update: &TimerUpdate) -> Result<bool> {
        let now = Utc::now();
        let current = match self.store.get(id) {
            Ok(Some(state)) => state,
            Ok(None) => return Err(PersistenceError::NotFound(id.to_string()).into()),
            Err(err) => {
                warn!(timer_id = %id, error = %err, "could not read timer before update");
                return Ok(false);
            }
        };

        // A dirty timer still owes the store its queued write; build on top
        // of it so the queued fields ride along with this update.
        let pending = match self.local.get(id) {
            Some(LocalEntry {
                sync: SyncState::Dirty { pending, .. },
                ..
            }) => Some(pending.with_update(update)),
            _ => None,
        };
        let reasons = match &pending {
            Some(combined) => {
                let mut as_update = TimerUpdate::from(combined);
                as_update.transition = update.transition;
                conflict_reasons(&current, &as_update, &self.options.conflict)
            }
            None => conflict_reasons(&current, update, &self.options.conflict),
        };

        let (next, resolution) = if reasons.is_empty() {
            let mut next = match &pending {
                Some(combined) => combined.clone(),
                None => current.with_update(update),
            };
            next.sync_version = current.sync_version + 1;
            next.last_updated = update.last_updated.unwrap_or(now);
            (next, None)
        } else {
            let mut incoming = match pending {
                Some(combined) => combined,
                None => self
                    .local
                    .get(id)
                    .map(|entry| &entry.state)
                    .unwrap_or(&current)
                    .with_update(update),
            };
            incoming.last_updated = update.last_updated.unwrap_or(now);
            let resolution = resolve_conflict(&current, &incoming, self.options.strategy);
            info!(
                timer_id = %id,
                kind = ?resolution.kind,
                reasons = reasons.len(),
                sync_version = resolution.resolved.sync_version,
                "conflict resolved before write"
            );
            (resolution.resolved.clone(), Some((resolution, reasons)))
        };

        match self.store.put(&next) {
            Ok(()) => {
                if let Some((resolution, reasons)) = resolution {
                    self.emit(Event::ConflictResolved {
                        timer_id: id.to_string(),
                        kind: resolution.kind,
                        reasons,
                        sync_version: next.sync_version,
                        at: now,
                    });
                }
                self.emit(Event::TimerUpdated {
                    timer_id: id.to_string(),
                    sync_version: next.sync_version,
                    optimistic: false,
                    at: now,
                });
                self.retry.remove(id);
                self.local.insert(id.to_string(), LocalEntry::clean(next));
                Ok(true)
            }
            Err(err) => {
                warn!(timer_id = %id, error = %err, "checked write rejected");
                Ok(false)
            }
        }
    }

    /// Archive the session and remove the live timer atomically.
    ///
    /// Writes the `TimerLog`, deletes the timer's slot reservations and
    /// deletes the live document in one batch. On failure nothing changes
    /// and `false` is returned.
    ///
    /// # Errors
    /// `PersistenceError::NotFound` when the timer does not exist.
    pub fn complete_timer(&mut self, id: &str, data: CompletionData) -> Result<bool> {
        let now = Utc::now();
        let stored = match self.store.get(id) {
            Ok(Some(state)) => state,
            Ok(None) => return Err(PersistenceError::NotFound(id.to_string()).into()),
            Err(err) => {
                warn!(timer_id = %id, error = %err, "could not read timer before completion");
                return Ok(false);
            }
        };
        let state = match self.local.get(id) {
            Some(entry) if entry.state.sync_version > stored.sync_version => &entry.state,
            _ => &stored,
        };

        let log = TimerLog::from_completion(state, &data, now);
        let log_id = log.id.clone();
        let batch = WriteBatch::new()
            .append_log(log)
            .delete_reservations(id)
            .delete(id);

        if let Err(err) = self.store.commit(batch) {
            warn!(timer_id = %id, error = %err, "completion batch rejected");
            return Ok(false);
        }

        info!(timer_id = %id, log_id = %log_id, reason = ?data.reason, "timer completed");
        self.local.remove(id);
        if self.retry.remove(id).is_some() {
            debug!(timer_id = %id, "dropped pending retry for completed timer");
        }
        self.emit(Event::TimerCompleted {
            timer_id: id.to_string(),
            log_id,
            reason: data.reason,
            at: now,
        });
        Ok(true)
    }

    /// Hold a time slot for a live timer. Reservations are removed when
    /// the timer completes.
    ///
    /// # Errors
    /// Validation error for an empty range, `NotFound` for an unknown
    /// timer, or the store error.
    pub fn reserve_slot(
        &mut self,
        id: &str,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<SlotReservation> {
        if ends_at <= starts_at {
            return Err(ValidationError::InvalidValue {
                field: "ends_at".into(),
                message: "must be after starts_at".into(),
            }
            .into());
        }
        let state = self
            .store
            .get(id)?
            .ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;

        let reservation = SlotReservation {
            id: Uuid::new_v4().to_string(),
            timer_id: state.id,
            user_id: state.user_id,
            starts_at,
            ends_at,
        };
        self.store
            .commit(WriteBatch::new().put_reservation(reservation.clone()))?;
        debug!(timer_id = %id, reservation = %reservation.id, "slot reserved");
        Ok(reservation)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Read the stored timer; `None` when it does not exist.
    pub fn get_timer(&self, id: &str) -> Result<Option<TimerState>> {
        Ok(self.store.get(id)?)
    }

    /// Live timers for a user, most recently updated first.
    pub fn get_active_timers(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TimerState>> {
        Ok(self.store.query_by_user(user_id, limit)?)
    }

    /// Locally held value, including optimistic values not yet committed.
    pub fn local_state(&self, id: &str) -> Option<&TimerState> {
        self.local.get(id).map(|entry| &entry.state)
    }

    pub fn sync_state(&self, id: &str) -> Option<&SyncState> {
        self.local.get(id).map(|entry| &entry.sync)
    }

    pub fn pending_retries(&self) -> usize {
        self.retry.len()
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry
    }

    pub fn sync_status(&self, now: DateTime<Utc>) -> SyncStatus {
        let mut dirty_timers: Vec<String> = self
            .local
            .iter()
            .filter(|(_, entry)| entry.sync.is_dirty())
            .map(|(id, _)| id.clone())
            .collect();
        dirty_timers.sort();
        SyncStatus {
            pending_retries: self.retry.len(),
            dirty_timers,
            active_listeners: self.listeners.iter().filter(|l| l.is_active()).count(),
            next_retry_at: self.retry.time_until_next(now).map(|d| now + d),
        }
    }

    /// Take every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *events)
    }

    // ── Listeners ───────────────────────────────────────────────────────

    /// Subscribe to pushed snapshots of one timer.
    ///
    /// `on_update` receives `None` once the timer is deleted. Transport
    /// errors go to `on_error` and are recorded as `ListenerError` events.
    ///
    /// # Errors
    /// `PersistenceError::ListenFailed` when the store refuses the
    /// subscription.
    pub fn listen_to_timer<U, E>(
        &mut self,
        id: &str,
        on_update: U,
        on_error: E,
    ) -> Result<ListenerHandle>
    where
        U: Fn(Option<TimerState>) + Send + Sync + 'static,
        E: Fn(StoreError) + Send + Sync + 'static,
    {
        self.listeners.retain(ListenerHandle::is_active);

        let active = Arc::new(AtomicBool::new(true));
        let handle = ListenerHandle::new(id, Arc::clone(&active), Arc::clone(&self.store));
        let events = Arc::clone(&self.events);
        let timer = id.to_string();

        let callback: SnapshotCallback = Arc::new(move |snapshot| {
            if !active.load(std::sync::atomic::Ordering::SeqCst) {
                return;
            }
            match snapshot {
                Ok(state) => on_update(state),
                Err(err) => {
                    warn!(timer_id = %timer, error = %err, "listener error");
                    events
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(Event::ListenerError {
                            timer_id: timer.clone(),
                            error: err.to_string(),
                            at: Utc::now(),
                        });
                    on_error(err);
                }
            }
        });

        let subscription = self.store.subscribe(id, callback).map_err(|source| {
            PersistenceError::ListenFailed {
                id: id.to_string(),
                source,
            }
        })?;
        handle.attach(subscription);
        debug!(timer_id = %id, "listener attached");
        self.listeners.push(handle.clone());
        Ok(handle)
    }

    /// Reconcile a snapshot pushed by the store with the local view.
    ///
    /// A clean local timer simply adopts newer snapshots. A dirty one is
    /// checked against the snapshot; on conflict the resolution is written
    /// back (or queued when the write fails) and returned.
    pub fn reconcile_remote(&mut self, remote: &TimerState) -> Option<Resolution> {
        let now = Utc::now();
        let entry = self.local.get_mut(&remote.id)?;
        let pending = match &entry.sync {
            SyncState::Clean => {
                if remote.sync_version >= entry.state.sync_version {
                    entry.state = remote.clone();
                }
                return None;
            }
            SyncState::Dirty { pending, .. } => pending.as_ref().clone(),
        };

        let as_update = TimerUpdate::from(&pending);
        if !detect_conflict(remote, &as_update, &self.options.conflict) {
            return None;
        }

        let reasons = conflict_reasons(remote, &as_update, &self.options.conflict);
        let resolution = resolve_conflict(remote, &pending, self.options.strategy);
        let resolved = resolution.resolved.clone();
        info!(
            timer_id = %remote.id,
            kind = ?resolution.kind,
            sync_version = resolved.sync_version,
            "remote snapshot reconciled"
        );
        self.emit(Event::ConflictResolved {
            timer_id: remote.id.clone(),
            kind: resolution.kind,
            reasons,
            sync_version: resolved.sync_version,
            at: now,
        });

        match self.store.put(&resolved) {
            Ok(()) => {
                self.retry.remove(&remote.id);
                self.emit(Event::TimerUpdated {
                    timer_id: remote.id.clone(),
                    sync_version: resolved.sync_version,
                    optimistic: false,
                    at: now,
                });
                self.local
                    .insert(remote.id.clone(), LocalEntry::clean(resolved));
            }
            Err(err) => self.queue_write(resolved, &err, now),
        }
        Some(resolution)
    }

    // ── Retry ───────────────────────────────────────────────────────────

    /// Retry every queued write that is due at `now`.
    ///
    /// A queued value older than the stored copy is resolved against it
    /// before being written again.
    pub fn process_retries(&mut self, now: DateTime<Utc>) -> RetryReport {
        let mut report = RetryReport::default();

        for entry in self.retry.take_due(now) {
            let id = entry.timer_id.clone();
            let attempt = entry.attempts + 1;

            let outcome = match self.store.get(&id) {
                Ok(None) => {
                    warn!(timer_id = %id, "queued write for a timer that no longer exists");
                    self.local.remove(&id);
                    report.dropped.push(id);
                    continue;
                }
                Ok(Some(stored)) => {
                    let next = if stored.sync_version >= entry.state.sync_version {
                        resolve_conflict(&stored, &entry.state, self.options.strategy).resolved
                    } else {
                        entry.state.clone()
                    };
                    self.store.put(&next).map(|()| next)
                }
                Err(err) => Err(err),
            };

            match outcome {
                Ok(written) => {
                    info!(timer_id = %id, attempt, sync_version = written.sync_version, "retry succeeded");
                    self.emit(Event::RetrySucceeded {
                        timer_id: id.clone(),
                        attempts: attempt,
                        sync_version: written.sync_version,
                        at: now,
                    });
                    self.local.insert(id.clone(), LocalEntry::clean(written));
                    report.succeeded.push(id);
                }
                Err(err) => match self.retry.record_failure(entry, err.to_string(), now) {
                    RetryOutcome::Scheduled { attempt, at } => {
                        debug!(timer_id = %id, attempt, next = %at, "retry rescheduled");
                        report.rescheduled.push(id);
                    }
                    RetryOutcome::Superseded => {
                        debug!(timer_id = %id, "failed retry superseded by newer write");
                    }
                    RetryOutcome::Exhausted(dropped) => {
                        error!(
                            timer_id = %id,
                            attempts = dropped.attempts,
                            error = %dropped.last_error,
                            "retries exhausted, write dropped"
                        );
                        self.emit(Event::RetryExhausted {
                            timer_id: id.clone(),
                            attempts: dropped.attempts,
                            last_error: dropped.last_error,
                            at: now,
                        });
                        report.exhausted.push(id);
                    }
                },
            }
        }

        report
    }

    /// Release every listener and persist the retry queue.
    pub fn shutdown(&mut self) {
        for listener in self.listeners.drain(..) {
            listener.unsubscribe();
        }
        if let Err(err) = self.retry.persist() {
            warn!(error = %err, "failed to persist retry queue");
        }
        info!(pending = self.retry.len(), "persistence shut down");
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn replayed_timer(&mut self, user_id: &str, key: &str) -> Result<Option<String>> {
        if let Some(existing) = self.idempotency.get(key) {
            info!(timer_id = %existing, "initialize replayed, returning existing timer");
            return Ok(Some(existing.clone()));
        }
        let found = self
            .store
            .find_by_idempotency_key(user_id, key)
            .map_err(|source| PersistenceError::InitializeFailed { source })?;
        let Some(state) = found else {
            return Ok(None);
        };
        info!(timer_id = %state.id, "initialize replayed from store, returning existing timer");
        let id = state.id.clone();
        self.idempotency.insert(key.to_string(), id.clone());
        self.local
            .entry(id.clone())
            .or_insert_with(|| LocalEntry::clean(state));
        Ok(Some(id))
    }

    fn queue_write(&mut self, state: TimerState, err: &StoreError, now: DateTime<Utc>) {
        let id = state.id.clone();
        let next_attempt_at = self.retry.enqueue(state.clone(), err.to_string(), now);
        warn!(
            timer_id = %id,
            sync_version = state.sync_version,
            error = %err,
            retry_at = %next_attempt_at,
            "write failed, queued for retry"
        );
        let entry = self
            .local
            .entry(id.clone())
            .or_insert_with(|| LocalEntry::clean(state.clone()));
        entry.state = state.clone();
        entry.sync.mark_dirty(state, now);
        self.emit(Event::WriteQueued {
            timer_id: id,
            error: err.to_string(),
            next_attempt_at,
            at: now,
        });
    }

    fn emit(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl Drop for TimerPersistence {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.unsubscribe();
        }
    }
}
