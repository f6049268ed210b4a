//! Event-name → handler bindings.
//!
//! The registry is local bookkeeping only; the [`Client`](crate::Client)
//! mirrors every change on the server with `SUBSCRIBE` / `UNSUBSCRIBE`
//! commands before touching it, so a binding is active here only while the
//! server is known to be sending that event.
//!
//! Handlers run inline on the dispatcher task. A handler that blocks holds
//! up every later frame, command responses included; one that needs to do
//! real work should hand the payload to its own task. Delivery order per
//! event name follows arrival order.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{AppError, Result};

/// Error type a handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Push-event callback: receives the event's `data` object.
pub type EventHandler = Arc<dyn Fn(Value) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Callback for failures that have no caller to return to: handler errors,
/// handler panics and unsolicited in-session `ERROR` replies.
pub type ErrorHandler = Arc<dyn Fn(&AppError, &ErrorContext) + Send + Sync>;

/// Where an out-of-band failure came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    /// Event being delivered, or `ERROR` for an unmatched error reply.
    pub event: String,
    /// The payload that was being processed.
    pub data: Value,
}

/// One installed binding.
#[derive(Clone)]
pub struct EventSubscription {
    /// Uppercase event name.
    pub event: String,
    /// Arguments sent with the `SUBSCRIBE` command.
    pub args: Value,
    /// Callback for matching dispatches.
    pub handler: EventHandler,
}

impl std::fmt::Debug for EventSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscription")
            .field("event", &self.event)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

/// Wrap a closure as an [`EventHandler`].
#[must_use]
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(Value) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Normalize an event name to the uppercase wire form.
///
/// # Errors
///
/// Returns [`AppError::ArgumentError`] for a blank name.
pub fn normalize_event_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::ArgumentError("event name must not be empty".into()));
    }
    Ok(trimmed.to_uppercase())
}

/// Event bindings keyed by uppercase name; at most one per name.
#[derive(Debug, Default)]
pub struct EventRegistry {
    bindings: RwLock<HashMap<String, EventSubscription>>,
}

impl EventRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `subscription`, returning the binding it replaced.
    pub async fn insert(&self, subscription: EventSubscription) -> Option<EventSubscription> {
        let event = subscription.event.clone();
        let previous = self.bindings.write().await.insert(event.clone(), subscription);
        debug!(event, replaced = previous.is_some(), "event registry: binding installed");
        previous
    }

    /// Remove the binding for `event`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::EventNotFound`] if nothing is bound.
    pub async fn remove(&self, event: &str) -> Result<EventSubscription> {
        let removed = self.bindings.write().await.remove(event);
        removed.ok_or_else(|| AppError::EventNotFound(event.to_owned()))
    }

    /// Current binding for `event`.
    pub async fn get(&self, event: &str) -> Option<EventSubscription> {
        self.bindings.read().await.get(event).cloned()
    }

    /// Handler for `event`, if bound.
    pub async fn handler_for(&self, event: &str) -> Option<EventHandler> {
        self.bindings
            .read()
            .await
            .get(event)
            .map(|s| Arc::clone(&s.handler))
    }

    /// Whether `event` is bound.
    pub async fn contains(&self, event: &str) -> bool {
        self.bindings.read().await.contains_key(event)
    }

    /// Bound event names, sorted.
    pub async fn events(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
