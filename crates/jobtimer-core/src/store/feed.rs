//! In-process change feed shared by the store backends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::{Snapshot, SnapshotCallback, SubscriptionId};

#[derive(Default)]
pub struct ChangeFeed {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, (String, SnapshotCallback)>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, doc_id: &str, callback: SnapshotCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, (doc_id.to_string(), callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver a snapshot to every subscriber of `doc_id`.
    ///
    /// Callbacks run after the lock is released so they may unsubscribe.
    pub fn publish(&self, doc_id: &str, snapshot: Snapshot) {
        let targets: Vec<SnapshotCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(id, _)| id == doc_id)
            .map(|(_, cb)| cb.clone())
            .collect();
        for callback in targets {
            callback(snapshot.clone());
        }
    }
}
