//! Push-listener handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::store::{DocumentStore, SubscriptionId};

struct ListenerInner {
    timer_id: String,
    /// Checked by the store callback before every delivery.
    active: Arc<AtomicBool>,
    subscription: Mutex<Option<SubscriptionId>>,
    store: Arc<dyn DocumentStore>,
}

/// Handle to a live timer subscription.
///
/// Clones share the same subscription. `unsubscribe` may be called any
/// number of times; after the first call no further snapshot reaches the
/// callbacks, including snapshots the store is delivering concurrently.
#[derive(Clone)]
pub struct ListenerHandle {
    inner: Arc<ListenerInner>,
}

impl ListenerHandle {
    pub(crate) fn new(
        timer_id: &str,
        active: Arc<AtomicBool>,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            inner: Arc::new(ListenerInner {
                timer_id: timer_id.to_string(),
                active,
                subscription: Mutex::new(None),
                store,
            }),
        }
    }

    pub(crate) fn attach(&self, subscription: SubscriptionId) {
        let mut slot = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(subscription);
    }

    pub fn timer_id(&self) -> &str {
        &self.inner.timer_id
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop delivery and release the store subscription.
    pub fn unsubscribe(&self) {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = subscription {
            self.inner.store.unsubscribe(id);
        }
        tracing::debug!(timer_id = %self.inner.timer_id, "listener released");
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("timer_id", &self.inner.timer_id)
            .field("active", &self.is_active())
            .finish()
    }
}
