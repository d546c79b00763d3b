//! SQLite-backed document store.
//!
//! Documents are stored as JSON next to the columns the queries need:
//! - `timers` -- live timer documents (`timers/{id}`)
//! - `timer_logs` -- completed-session archives (`timerLogs/{autoId}`)
//! - `slot_reservations` -- ephemeral holds owned by a live timer
//!
//! Batches run inside one SQL transaction. Subscriptions are served by an
//! in-process change feed fed from this handle's own commits.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use super::{
    log_path, reservation_path, timer_path, ChangeFeed, DocumentStore, SnapshotCallback,
    SubscriptionId, WriteBatch, WriteOp,
};
use crate::error::{CoreError, StoreError};
use crate::storage::data_dir;
use crate::timer::{SlotReservation, TimerLog, TimerState};

pub struct SqliteStore {
    conn: Mutex<Connection>,
    feed: ChangeFeed,
}

impl SqliteStore {
    /// Open the store at `~/.config/jobtimer/jobtimer.db`.
    ///
    /// # Errors
    /// Returns an error if the data directory or database cannot be opened.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join("jobtimer.db");
        Self::open_at(&path)
    }

    /// Open (and migrate) the database file at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(StoreError::from)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database.
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, CoreError> {
        migrate(&conn).map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
            feed: ChangeFeed::new(),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".into()))
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS timers (
            id           TEXT PRIMARY KEY,
            user_id      TEXT NOT NULL,
            sync_version INTEGER NOT NULL,
            last_updated TEXT NOT NULL,
            doc          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS timer_logs (
            id           TEXT PRIMARY KEY,
            timer_id     TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            doc          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS slot_reservations (
            id        TEXT PRIMARY KEY,
            timer_id  TEXT NOT NULL,
            starts_at TEXT NOT NULL,
            doc       TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_timers_user_updated ON timers(user_id, last_updated);
        CREATE INDEX IF NOT EXISTS idx_timer_logs_timer ON timer_logs(timer_id);
        CREATE INDEX IF NOT EXISTS idx_slot_reservations_timer ON slot_reservations(timer_id);",
    )
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn sortable(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn encode<T: serde::Serialize>(path: &str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, doc: &str) -> Result<T, StoreError> {
    serde_json::from_str(doc).map_err(|e| StoreError::Malformed {
        path: path.to_string(),
        message: e.to_string(),
    })
}

fn apply_op(tx: &Transaction<'_>, op: &WriteOp) -> Result<(), StoreError> {
    let path = op.path();
    match op {
        WriteOp::Create(state) => {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO timers (id, user_id, sync_version, last_updated, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    state.id,
                    state.user_id,
                    state.sync_version as i64,
                    sortable(&state.last_updated),
                    encode(&path, state)?,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::AlreadyExists(path));
            }
        }
        WriteOp::Put(state) => {
            tx.execute(
                "INSERT INTO timers (id, user_id, sync_version, last_updated, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    user_id = excluded.user_id,
                    sync_version = excluded.sync_version,
                    last_updated = excluded.last_updated,
                    doc = excluded.doc",
                params![
                    state.id,
                    state.user_id,
                    state.sync_version as i64,
                    sortable(&state.last_updated),
                    encode(&path, state)?,
                ],
            )?;
        }
        WriteOp::Delete(id) => {
            let removed = tx.execute("DELETE FROM timers WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(StoreError::WriteRejected(format!("{path} does not exist")));
            }
        }
        WriteOp::PutReservation(r) => {
            tx.execute(
                "INSERT OR REPLACE INTO slot_reservations (id, timer_id, starts_at, doc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![r.id, r.timer_id, sortable(&r.starts_at), encode(&path, r)?],
            )?;
        }
        WriteOp::DeleteReservations { timer_id } => {
            tx.execute(
                "DELETE FROM slot_reservations WHERE timer_id = ?1",
                params![timer_id],
            )?;
        }
        WriteOp::AppendLog(log) => {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO timer_logs (id, timer_id, completed_at, doc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    log.id,
                    log.timer_id,
                    sortable(&log.completed_at),
                    encode(&path, log)?,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::WriteRejected(format!("{path} already exists")));
            }
        }
    }
    Ok(())
}

fn read_timer(conn: &Connection, id: &str) -> Result<Option<TimerState>, StoreError> {
    let doc: Option<String> = conn
        .query_row("SELECT doc FROM timers WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?;
    doc.map(|d| decode(&timer_path(id), &d)).transpose()
}

impl DocumentStore for SqliteStore {
    fn get(&self, id: &str) -> Result<Option<TimerState>, StoreError> {
        let conn = self.conn()?;
        read_timer(&conn, id)
    }

    fn find_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<TimerState>, StoreError> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT id, doc FROM timers
                 WHERE user_id = ?1 AND json_extract(doc, '$.idempotencyKey') = ?2
                 LIMIT 1",
                params![user_id, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(id, doc)| decode(&timer_path(&id), &doc)).transpose()
    }

    fn query_by_user(
        &self,
        user_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<TimerState>, StoreError> {
        let conn = self.conn()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(
            "SELECT id, doc FROM timers
             WHERE user_id = ?1
             ORDER BY last_updated DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut timers = Vec::new();
        for row in rows {
            let (id, doc) = row?;
            timers.push(decode(&timer_path(&id), &doc)?);
        }
        Ok(timers)
    }

    fn reservations_for(&self, timer_id: &str) -> Result<Vec<SlotReservation>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, doc FROM slot_reservations WHERE timer_id = ?1 ORDER BY starts_at",
        )?;
        let rows = stmt.query_map(params![timer_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut found = Vec::new();
        for row in rows {
            let (id, doc) = row?;
            found.push(decode(&reservation_path(&id), &doc)?);
        }
        Ok(found)
    }

    fn logs_for_timer(&self, timer_id: &str) -> Result<Vec<TimerLog>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, doc FROM timer_logs WHERE timer_id = ?1 ORDER BY completed_at",
        )?;
        let rows = stmt.query_map(params![timer_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut logs = Vec::new();
        for row in rows {
            let (id, doc) = row?;
            logs.push(decode(&log_path(&id), &doc)?);
        }
        Ok(logs)
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let touched = batch.touched_timers();
        let snapshots = {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            for op in batch.ops() {
                // Dropping `tx` on error rolls the whole batch back.
                apply_op(&tx, op)?;
            }
            tx.commit()?;
            debug!(ops = batch.len(), "sqlite batch committed");

            let mut snapshots = Vec::with_capacity(touched.len());
            for id in touched {
                let snapshot = read_timer(&conn, &id)?;
                snapshots.push((id, snapshot));
            }
            snapshots
        };

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
        let current = self.get(id)?;
        let subscription = self.feed.subscribe(id, callback.clone());
        callback(Ok(current));
        Ok(subscription)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.feed.unsubscribe(subscription);
    }
}
