//! In-process event dispatcher.
//!
//! Listeners subscribe to an event name (or a `prefix.*` wildcard) and receive
//! the event name plus a typed payload. The router fires `router.matched`
//! with a [`RouteMatched`] payload for every matched request.

use crate::logging::{debug, trace};
use crate::request::Request;
use crate::route::BoundRoute;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// An event listener: `(event_name, payload)`.
pub type Listener = Arc<dyn Fn(&str, &dyn Any) + Send + Sync>;

/// Payload of `router.matched`.
#[derive(Clone, Debug)]
pub struct RouteMatched {
    pub route: BoundRoute,
    pub request: Arc<Request>,
}

#[derive(Clone)]
struct Registered {
    priority: i32,
    listener: Listener,
}

#[derive(Default)]
struct Listeners {
    exact: HashMap<String, Vec<Registered>>,
    /// Keyed by prefix: `"router."` for `"router.*"`
    wildcards: Vec<(String, Registered)>,
}

/// The event dispatcher. Clones share listeners.
#[derive(Clone, Default)]
pub struct Dispatcher {
    listeners: Arc<RwLock<Listeners>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen<F>(&self, event: &str, listener: F)
    where
        F: Fn(&str, &dyn Any) + Send + Sync + 'static,
    {
        self.listen_with_priority(event, listener, 0);
    }

    /// Higher priorities run first; equal priorities run in registration order.
    pub fn listen_with_priority<F>(&self, event: &str, listener: F, priority: i32)
    where
        F: Fn(&str, &dyn Any) + Send + Sync + 'static,
    {
        let registered = Registered {
            priority,
            listener: Arc::new(listener),
        };
        let mut listeners = self.listeners.write();
        match event.strip_suffix('*') {
            Some(prefix) => listeners.wildcards.push((prefix.to_string(), registered)),
            None => listeners
                .exact
                .entry(event.to_string())
                .or_default()
                .push(registered),
        }
        debug!(event, priority, "Event listener registered");
    }

    /// Listen only for payloads of type `T`.
    pub fn listen_for<T, F>(&self, event: &str, listener: F)
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.listen(event, move |_, payload| {
            if let Some(payload) = payload.downcast_ref::<T>() {
                listener(payload);
            }
        });
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        let listeners = self.listeners.read();
        listeners.exact.get(event).is_some_and(|l| !l.is_empty())
            || listeners
                .wildcards
                .iter()
                .any(|(prefix, _)| event.starts_with(prefix.as_str()))
    }

    /// Remove every listener of an event name (exact or wildcard).
    pub fn forget(&self, event: &str) {
        let mut listeners = self.listeners.write();
        match event.strip_suffix('*') {
            Some(prefix) => listeners.wildcards.retain(|(p, _)| p != prefix),
            None => {
                listeners.exact.remove(event);
            }
        }
    }

    /// Call every listener of `event` with `payload`.
    pub fn fire(&self, event: &str, payload: &dyn Any) {
        let listeners = self.listeners_for(event);
        trace!(event, listeners = listeners.len(), "Firing event");
        for listener in listeners {
            listener(event, payload);
        }
    }

    fn listeners_for(&self, event: &str) -> Vec<Listener> {
        let listeners = self.listeners.read();
        let mut matching: Vec<&Registered> = listeners
            .exact
            .get(event)
            .into_iter()
            .flatten()
            .chain(
                listeners
                    .wildcards
                    .iter()
                    .filter(|(prefix, _)| event.starts_with(prefix.as_str()))
                    .map(|(_, registered)| registered),
            )
            .collect();
        // Stable: registration order within a priority.
        matching.sort_by(|a, b| b.priority.cmp(&a.priority));
        matching.into_iter().map(|r| r.listener.clone()).collect()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read();
        f.debug_struct("Dispatcher")
            .field("events", &listeners.exact.keys().collect::<Vec<_>>())
            .field("wildcards", &listeners.wildcards.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_priority_and_wildcards() {
        let events = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        events.listen("user.created", move |name, _| log.lock().push(format!("exact:{}", name)));
        let log = seen.clone();
        events.listen("user.*", move |name, _| log.lock().push(format!("wild:{}", name)));
        let log = seen.clone();
        events.listen_with_priority("user.created", move |_, _| log.lock().push("first".into()), 10);

        events.fire("user.created", &());
        assert_eq!(
            *seen.lock(),
            vec!["first", "exact:user.created", "wild:user.created"]
        );

        assert!(events.has_listeners("user.deleted"));
        assert!(!events.has_listeners("order.created"));
    }

    #[test]
    fn test_typed_listener() {
        let events = Dispatcher::new();
        let total = Arc::new(Mutex::new(0u32));
        let sum = total.clone();
        events.listen_for::<u32, _>("tick", move |n| *sum.lock() += n);

        events.fire("tick", &5u32);
        events.fire("tick", &"not a number");
        assert_eq!(*total.lock(), 5);
    }

    #[test]
    fn test_forget() {
        let events = Dispatcher::new();
        events.listen("a", |_, _| {});
        events.listen("b.*", |_, _| {});
        events.forget("a");
        events.forget("b.*");
        assert!(!events.has_listeners("a"));
        assert!(!events.has_listeners("b.c"));
    }
}
