//! Event dispatcher
//!
//! Typed publish/subscribe registry mapping push event names to handlers.
//! Handlers for one event run in registration order. A handler that returns
//! an error or panics is logged and skipped; the remaining handlers still run
//! and `dispatch` itself never fails.
//!
//! `clear()` drops every handler and starts a new generation. Subscriptions
//! from an earlier generation stay inert: their disposers become no-ops and
//! they are never called again, so closures from a superseded session cannot
//! touch state.

use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, warn};

/// Callback type for push events
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    generation: u64,
    next_id: u64,
    handlers: HashMap<String, Vec<Entry>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Summary of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that completed successfully
    pub handled: usize,
    /// Handlers that returned an error or panicked
    pub failed: usize,
}

/// Registry of event handlers
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event`
    ///
    /// Multiple handlers per event are allowed. The returned `Subscription`
    /// removes this handler when disposed.
    pub fn subscribe<F>(&self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let event = event.into();
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        let generation = registry.generation;
        registry.handlers.entry(event.clone()).or_default().push(Entry {
            id,
            handler: Arc::new(handler),
        });
        debug!("Subscribed handler {} to '{}'", id, event);

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event,
            id,
            generation,
        }
    }

    /// Deliver `payload` to every handler registered for `event`
    ///
    /// The registry lock is released before handlers run, so a handler may
    /// subscribe or unsubscribe without deadlocking.
    pub fn dispatch(&self, event: &str, payload: &Value) -> DispatchReport {
        let handlers: Vec<(u64, Handler)> = {
            let registry = lock(&self.registry);
            match registry.handlers.get(event) {
                Some(entries) => entries.iter().map(|e| (e.id, e.handler.clone())).collect(),
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            debug!("No handler for '{}', event dropped", event);
        }

        let mut report = DispatchReport::default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => report.handled += 1,
                Ok(Err(e)) => {
                    warn!("Handler {} for '{}' failed: {:#}", id, event, e);
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Handler {} for '{}' panicked", id, event);
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Drop every handler and invalidate all outstanding subscriptions
    pub fn clear(&self) {
        let mut registry = lock(&self.registry);
        registry.generation += 1;
        registry.handlers.clear();
        debug!("Dispatcher cleared, generation {}", registry.generation);
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        lock(&self.registry)
            .handlers
            .get(event)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Current generation; bumped by every `clear()`
    pub fn generation(&self) -> u64 {
        lock(&self.registry).generation
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventDispatcher")
            .field("generation", &registry.generation)
            .field("events", &registry.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Disposer for one registered handler
///
/// `unsubscribe` may be called any number of times; only the first call on a
/// live subscription has an effect.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
    generation: u64,
}

impl Subscription {
    /// Remove the handler from the dispatcher
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if registry.generation != self.generation {
            return;
        }
        if let Some(entries) = registry.handlers.get_mut(&self.event) {
            entries.retain(|e| e.id != self.id);
            if entries.is_empty() {
                registry.handlers.remove(&self.event);
            }
        }
    }

    /// Whether the handler is still registered
    pub fn is_active(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let registry = lock(&registry);
        registry.generation == self.generation
            && registry
                .handlers
                .get(&self.event)
                .is_some_and(|entries| entries.iter().any(|e| e.id == self.id))
    }

    /// Event name this subscription listens to
    pub fn event(&self) -> &str {
        &self.event
    }
}
