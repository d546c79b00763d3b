//! Core error types for jobtimer-core.
//!
//! Conflicts are deliberately absent from this hierarchy: they are resolved
//! by the sync layer before a write proceeds and never reach callers.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for jobtimer-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Timer persistence errors
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// Document store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Undo/redo errors
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Errors surfaced by the timer persistence API.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The initial document write was rejected; no id was allocated.
    #[error("Failed to initialize timer: {source}")]
    InitializeFailed {
        #[source]
        source: StoreError,
    },

    /// No live timer document exists for the id.
    #[error("Timer not found: {0}")]
    NotFound(String),

    /// Subscribing to a timer document failed.
    #[error("Failed to listen to timer {id}: {source}")]
    ListenFailed {
        id: String,
        #[source]
        source: StoreError,
    },
}

/// Errors raised by a document store backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Backend could not be reached (network, closed connection).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Backend rejected the write.
    #[error("Write rejected: {0}")]
    WriteRejected(String),

    /// A create-only write found a document already at the path.
    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    /// Stored document could not be decoded.
    #[error("Malformed document {path}: {message}")]
    Malformed { path: String, message: String },

    /// Query or statement failure.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Locked)
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Home/config directory could not be determined or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Running and paused flags both set
    #[error("Timer {0} is both running and paused")]
    RunningAndPaused(String),

    /// Pause bookkeeping out of step
    #[error("Timer {id}: pause_count {count} does not match {history} pause history entries")]
    PauseCountMismatch {
        id: String,
        count: u32,
        history: usize,
    },

    /// Transition not allowed from the current status
    #[error("Invalid transition: cannot {action} a {status} timer")]
    InvalidTransition { action: String, status: String },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Undo/redo handler errors.
#[derive(Error, Debug)]
pub enum HistoryError {
    /// Action payload is missing data the reversal needs.
    #[error("Action {action_id} is missing '{field}' in its data")]
    MissingData { action_id: String, field: String },

    /// The project editor rejected the reversal.
    #[error("Editor failed to apply action {action_id}: {message}")]
    EditorFailed { action_id: String, message: String },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
                {
                    StoreError::Locked
                } else {
                    StoreError::QueryFailed(err.to_string())
                }
            }
            _ => StoreError::QueryFailed(err.to_string()),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for CoreError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        CoreError::Custom(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
