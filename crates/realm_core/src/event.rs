//! Publish/subscribe event bus.
//!
//! The bus carries typed, timestamped [`Event`]s between systems and out to
//! the transport layer. Dispatch is synchronous fan-out: [`EventBus::emit`]
//! returns once every current subscriber of the event's kind has run. A
//! bounded history of emitted events is kept for diagnostics.
//!
//! Handler failures (errors or panics) are caught and logged; they never
//! propagate to the emitter or stop delivery to the remaining subscribers.

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{trace, warn};
use uuid::Uuid;

/// Built-in event kinds emitted by the core.
pub mod kinds {
    /// An entity was added to the store.
    pub const ENTITY_ADDED: &str = "entity:added";
    /// An entity was removed from the store.
    pub const ENTITY_REMOVED: &str = "entity:removed";
    /// A component was attached to a stored entity.
    pub const COMPONENT_ADDED: &str = "component:added";
    /// A component was detached from a stored entity.
    pub const COMPONENT_REMOVED: &str = "component:removed";
    /// A system hook failed.
    pub const SYSTEM_ERROR: &str = "system:error";
    pub const SYSTEM_REGISTERED: &str = "system:registered";
    pub const SYSTEM_UNREGISTERED: &str = "system:unregistered";
    /// A system exceeded its consecutive failure budget and was disabled.
    pub const SYSTEM_DISABLED: &str = "system:disabled";
    /// A tick took longer than the configured tick interval.
    pub const TICK_OVERRUN: &str = "tick:overrun";
    /// Subscribing to this kind receives every event.
    pub const WILDCARD: &str = "*";
}

/// Default number of events retained in the history ring.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// An immutable notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind, e.g. `"entity:added"`.
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    /// Who emitted the event (a system name or `"scheduler"`).
    pub source: Option<String>,
    pub id: Option<Uuid>,
}

impl Event {
    /// Create an event stamped with the current time and a fresh id.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
            source: None,
            id: Some(Uuid::new_v4()),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// A subscriber callback.
pub type Handler = Box<dyn FnMut(&Event) -> anyhow::Result<()> + Send>;

struct Subscription {
    id: SubscriptionId,
    /// System that owns the subscription; `None` for external subscribers.
    owner: Option<String>,
    handler: Handler,
}

/// In-process publish/subscribe registry with a bounded history.
pub struct EventBus {
    subscribers: HashMap<String, Vec<Subscription>>,
    history: VecDeque<Event>,
    capacity: usize,
    next_id: u64,
}

impl EventBus {
    /// Create a bus that retains at most `capacity` events of history.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: HashMap::new(),
            history: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_id: 1,
        }
    }

    /// Subscribe to events of `kind` (or [`kinds::WILDCARD`] for all).
    pub fn subscribe<F>(&mut self, kind: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: FnMut(&Event) -> anyhow::Result<()> + Send + 'static,
    {
        self.insert_subscription(kind.into(), None, Box::new(handler))
    }

    /// Subscribe on behalf of a system so the subscription can be torn down
    /// with [`EventBus::unsubscribe_owner`].
    pub(crate) fn subscribe_owned(
        &mut self,
        owner: &str,
        kind: impl Into<String>,
        handler: Handler,
    ) -> SubscriptionId {
        self.insert_subscription(kind.into(), Some(owner.to_string()), handler)
    }

    fn insert_subscription(
        &mut self,
        kind: String,
        owner: Option<String>,
        handler: Handler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        trace!(kind, ?owner, "subscribed");
        self.subscribers.entry(kind).or_default().push(Subscription {
            id,
            owner,
            handler,
        });
        id
    }

    /// Remove one subscription. Returns `true` if it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for subs in self.subscribers.values_mut() {
            let before = subs.len();
            subs.retain(|sub| sub.id != id);
            removed |= subs.len() != before;
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Remove every subscription owned by `owner`. Returns how many were removed.
    pub fn unsubscribe_owner(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for subs in self.subscribers.values_mut() {
            let before = subs.len();
            subs.retain(|sub| sub.owner.as_deref() != Some(owner));
            removed += before - subs.len();
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Drop every subscription.
    pub fn clear_subscriptions(&mut self) {
        self.subscribers.clear();
    }

    /// Number of subscribers for `kind` (wildcard subscribers not included).
    #[must_use]
    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.subscribers.get(kind).map_or(0, Vec::len)
    }

    /// Record `event` in the history and deliver it to the subscribers of its
    /// kind, then to wildcard subscribers. Returns the number of handlers that
    /// completed without error.
    pub fn emit(&mut self, event: Event) -> usize {
        let mut delivered = 0;
        let wildcard = (event.kind != kinds::WILDCARD).then_some(kinds::WILDCARD);
        for key in std::iter::once(event.kind.as_str()).chain(wildcard) {
            let Some(subs) = self.subscribers.get_mut(key) else {
                continue;
            };
            for sub in subs.iter_mut() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| (sub.handler)(&event)));
                match outcome {
                    Ok(Ok(())) => delivered += 1,
                    Ok(Err(err)) => warn!(
                        kind = event.kind,
                        owner = sub.owner.as_deref().unwrap_or("external"),
                        error = %format!("{err:#}"),
                        "event handler failed"
                    ),
                    Err(_) => warn!(
                        kind = event.kind,
                        owner = sub.owner.as_deref().unwrap_or("external"),
                        "event handler panicked"
                    ),
                }
            }
        }

        if self.capacity > 0 {
            if self.history.len() == self.capacity {
                self.history.pop_front();
            }
            self.history.push_back(event);
        }
        delivered
    }

    /// Convenience for `emit(Event::new(kind, payload).with_source(source))`.
    pub fn publish(&mut self, kind: &str, payload: Value, source: &str) -> usize {
        self.emit(Event::new(kind, payload).with_source(source))
    }

    /// Retained events, oldest first.
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &Event> {
        self.history.iter()
    }

    /// Retained events of one kind, oldest first.
    pub fn history_of<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.history.iter().filter(move |event| event.kind == kind)
    }

    /// Number of retained events.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("kinds", &self.subscribers.keys().collect::<Vec<_>>())
            .field("history_len", &self.history.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
