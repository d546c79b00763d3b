//! Timer synchronization layer.
//!
//! Detects and resolves conflicts between local and stored timer documents
//! and buffers failed writes for retry. All coordination is optimistic:
//! documents are compared by `sync_version`, never locked.

pub mod conflict;
pub mod device_id;
pub mod resolver;
pub mod retry;
pub mod types;

#[cfg(test)]
mod retry_tests;

pub use conflict::{
    conflict_reasons, detect_conflict, ConflictPolicy, ConflictReason,
    DEFAULT_DRIFT_THRESHOLD_SECS,
};
pub use device_id::{
    get_or_create_device_id, get_or_create_device_id_at, new_session_id, resolve_device_id,
    DeviceIdError,
};
pub use resolver::{
    merge_pause_history, resolve_conflict, Resolution, ResolutionKind, ResolutionStrategy,
};
pub use retry::{PendingWrite, RetryOutcome, RetryPolicy, RetryQueue};
pub use types::{SyncState, SyncStatus};
