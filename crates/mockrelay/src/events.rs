//! In-process event bus.
//!
//! Decouples store mutation from control-plane broadcast: stores emit onto a
//! closed set of topics and never see the transport. Delivery is synchronous
//! and at-most-once per registered handler per emit; a failing handler is
//! logged and never blocks delivery to the rest.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// The closed set of bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The mock rule table changed (create/update/delete/import/toggle).
    MockConfigChanged,
    /// A request record was appended to the ledger.
    RequestRecorded,
    /// The settings table changed.
    SettingsChanged,
    /// The request ledger was emptied.
    LedgerCleared,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    pub payload: Value,
}

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: HashMap<Topic, Vec<(SubscriptionId, Handler)>>,
}

/// Cheap-to-clone handle to the shared bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<RwLock<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner
            .handlers
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = self.inner.write();
        let mut removed = false;
        for handlers in inner.handlers.values_mut() {
            let before = handlers.len();
            handlers.retain(|(hid, _)| *hid != id);
            removed |= handlers.len() != before;
        }
        removed
    }

    /// Deliver an event to every handler registered for its topic.
    pub fn emit(&self, topic: Topic, payload: Value) {
        // Snapshot so handlers may subscribe/unsubscribe without deadlock.
        let handlers: Vec<Handler> = {
            let inner = self.inner.read();
            inner
                .handlers
                .get(&topic)
                .map(|hs| hs.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        let event = Event { topic, payload };
        for handler in handlers {
            if let Err(e) = handler(&event) {
                warn!(?topic, error = %e, "event handler failed");
            }
        }
    }
}
