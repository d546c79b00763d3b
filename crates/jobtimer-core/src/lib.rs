//! # Jobtimer Core Library
//!
//! Persistence, synchronization and conflict resolution for job timers.
//! A headless CLI binary drives the same library the apps embed.
//!
//! ## Architecture
//!
//! - **Timer model**: `TimerState` documents plus a local state machine
//!   (`LocalTimer`) that produces partial updates
//! - **Store**: the `DocumentStore` boundary, with in-memory and SQLite
//!   backends
//! - **Sync**: conflict detection, resolution strategies and the retry queue
//! - **Persistence**: `TimerPersistence`, which ties the above together
//! - **History**: per-project undo/redo of project edits
//! - **Notify**: timer alerts behind sink and preference-store traits
//!
//! ## Key Components
//!
//! - [`TimerPersistence`]: optimistic writes, listeners, completion
//! - [`resolve_conflict`]: last-write-wins, merge and local-wins strategies
//! - [`UndoRedoService`]: bounded undo/redo stacks
//! - [`Config`]: application configuration management

pub mod error;
pub mod events;
pub mod history;
pub mod notify;
pub mod persistence;
pub mod storage;
pub mod store;
pub mod sync;
pub mod timer;

pub use error::{
    ConfigError, CoreError, HistoryError, PersistenceError, StoreError, ValidationError,
};
pub use events::Event;
pub use history::{ActionData, ActionType, HistoryAction, NewAction, ProjectEditor, UndoRedoService};
pub use notify::{
    FilePreferenceStore, MemoryPreferenceStore, NotificationKind, NotificationPreferences,
    NotificationSink, PreferenceStore, TimerNotifier, TracingSink,
};
pub use persistence::{ListenerHandle, PersistenceOptions, RetryReport, TimerPersistence};
pub use storage::{data_dir, Config};
pub use store::{DocumentStore, MemoryStore, SqliteStore, WriteBatch};
pub use sync::{
    detect_conflict, resolve_conflict, ConflictPolicy, ResolutionKind, ResolutionStrategy,
    RetryPolicy, RetryQueue, SyncState,
};
pub use timer::{
    CompletionData, CompletionReason, LocalTimer, NewTimer, PauseReason, TimerState, TimerStatus,
    TimerUpdate,
};
