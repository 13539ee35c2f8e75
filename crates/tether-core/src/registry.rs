//! Event-name keyed subscription registry.
//!
//! Subscriptions are independent of the connection and survive reconnects.
//! Dispatch is synchronous and follows registration order.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{trace, warn};

/// Callback invoked with the payload of a matching inbound event.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identifies one registration for later removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

type Handlers = Vec<(SubscriptionId, EventCallback)>;

/// Cloneable handle to a shared subscription map.
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: Arc<RwLock<HashMap<String, Handlers>>>,
    next_id: Arc<AtomicU64>,
}

impl EventRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `event`. Returns the id used to unsubscribe.
    pub fn subscribe<F>(&self, event: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let event = event.into();
        trace!(event, %id, "subscribe");
        self.handlers
            .write()
            .entry(event)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a registration. Returns `false` if it was not present.
    pub fn unsubscribe(&self, event: &str, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sid, _)| *sid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            let _ = handlers.remove(event);
        }
        removed
    }

    /// Invoke every callback registered for `event`, in registration order.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking callback is logged and does not stop the
    /// remaining ones. Returns the number of callbacks invoked.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let callbacks: Vec<EventCallback> = match self.handlers.read().get(event) {
            Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };
        for callback in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                warn!(event, "event callback panicked");
            }
        }
        callbacks.len()
    }

    /// Number of callbacks registered for `event`.
    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one registration.
    pub fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("events", &self.events())
            .finish_non_exhaustive()
    }
}
