// crates/core/src/live/registry.rs
//! Handler registry for the live channel: tag and wildcard subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use fedwatch_types::LiveMessage;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// A message handler. Runs on the connection's supervisor task; must not block.
pub type Handler = Arc<dyn Fn(&LiveMessage) -> anyhow::Result<()> + Send + Sync>;

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Exactly one message tag, e.g. `prediction`.
    Kind(String),
    /// Every dispatched message.
    Wildcard,
}

impl Topic {
    pub fn kind(kind: impl Into<String>) -> Self {
        Topic::Kind(kind.into())
    }
}

impl From<&str> for Topic {
    /// `"*"` is the wildcard.
    fn from(s: &str) -> Self {
        if s == "*" {
            Topic::Wildcard
        } else {
            Topic::Kind(s.to_string())
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Kind(k) => f.write_str(k),
            Topic::Wildcard => f.write_str("*"),
        }
    }
}

#[derive(Default)]
struct Entries {
    next_id: u64,
    by_topic: HashMap<Topic, Vec<(u64, Handler)>>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<Entries>,
}

impl Registry {
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn insert(self: &Arc<Self>, topic: Topic, handler: Handler) -> Subscription {
        let mut entries = self.write();
        entries.next_id += 1;
        let id = entries.next_id;
        entries
            .by_topic
            .entry(topic.clone())
            .or_default()
            .push((id, handler));
        Subscription {
            id,
            topic,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, topic: &Topic, id: u64) -> bool {
        let mut entries = self.write();
        let Some(list) = entries.by_topic.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(entry, _)| *entry != id);
        let removed = list.len() != before;
        if list.is_empty() {
            entries.by_topic.remove(topic);
        }
        removed
    }

    /// Handlers for `kind` plus wildcard handlers, in registration order.
    /// A copy, so handlers may (un)subscribe while being called.
    pub(crate) fn handlers_for(&self, kind: &str) -> Vec<Handler> {
        let entries = self.read();
        let mut matched: Vec<(u64, Handler)> = Vec::new();
        if let Some(list) = entries.by_topic.get(&Topic::Kind(kind.to_string())) {
            matched.extend(list.iter().cloned());
        }
        if let Some(list) = entries.by_topic.get(&Topic::Wildcard) {
            matched.extend(list.iter().cloned());
        }
        matched.sort_by_key(|(id, _)| *id);
        matched.into_iter().map(|(_, h)| h).collect()
    }

    pub(crate) fn clear(&self) {
        self.write().by_topic.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.read().by_topic.values().map(Vec::len).sum()
    }

    /// Deliver `msg` to every matching handler.
    ///
    /// Checks `gate` before each handler so a teardown from inside a handler
    /// stops the rest. An `Err` or a panic in one handler is logged and does
    /// not affect the others. Returns how many handlers ran.
    ///
    /// A cancel from another thread does not wait: a handler that already
    /// passed the gate runs to completion, but no handler starts after the
    /// cancel is visible. Blocking here would deadlock a teardown issued
    /// from inside a handler.
    pub(crate) fn dispatch(&self, msg: &LiveMessage, gate: &CancellationToken) -> usize {
        let mut delivered = 0;
        for handler in self.handlers_for(&msg.kind) {
            if gate.is_cancelled() {
                break;
            }
            delivered += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(msg))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(kind = %msg.kind, error = %e, "live handler failed"),
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".into());
                    error!(kind = %msg.kind, %reason, "live handler panicked");
                }
            }
        }
        delivered
    }
}

/// Handle returned by [`super::LiveChannel::subscribe`].
///
/// Dropping it keeps the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    topic: Topic,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove the handler. Returns false if it was already gone (for example
    /// after the channel was shut down).
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(&self.topic, self.id),
            None => false,
        }
    }
}
