// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle and message events.
//!
//! Subscriber lists are copy-on-write: `subscribe`/`unsubscribe` swap in a
//! new list, `raise` invokes a snapshot taken with one atomic load. A handler
//! added or removed during delivery only affects later deliveries.
//!
//! # Thread Safety
//!
//! Handlers run on the thread that raised the event: the caller's thread for
//! lifecycle events, a connection worker for message events. They must be
//! `Send + Sync` and should not block.

use crate::endpoint::EndpointDescriptor;
use crate::message::Message;
use arc_swap::ArcSwap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Event handler callback.
pub type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Token returned by [`EventHandlers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Copy-on-write list of subscribers for one event.
pub struct EventHandlers<T> {
    handlers: ArcSwap<Vec<(SubscriptionId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> EventHandlers<T> {
    pub fn new() -> Self {
        Self {
            handlers: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handler: Handler<T> = Arc::new(handler);
        self.handlers.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push((id, Arc::clone(&handler)));
            next
        });
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let previous = self.handlers.rcu(|current| {
            current
                .iter()
                .filter(|(sid, _)| *sid != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|(sid, _)| *sid == id)
    }

    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.load().is_empty()
    }

    /// Invoke every subscriber of the current snapshot.
    pub fn raise(&self, args: &T) {
        let snapshot = self.handlers.load_full();
        for (_, handler) in snapshot.iter() {
            handler(args);
        }
    }

    /// Like [`raise`](Self::raise), but a panicking handler is logged and
    /// does not stop delivery to the others.
    pub fn raise_guarded(&self, args: &T, event: &str) {
        let snapshot = self.handlers.load_full();
        for (id, handler) in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| handler(args))).is_err() {
                tracing::error!("{} handler {:?} panicked", event, id);
            }
        }
    }
}

impl<T> Default for EventHandlers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventHandlers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// State carried by lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    Created,
    Opening,
    Opened,
    Closing,
    Closed,
    Aborting,
    Aborted,
    Restarting,
    Restarted,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity of a listener: its service type and first base address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerIdentity {
    pub service_type: String,
    pub base_address: Option<String>,
}

impl fmt::Display for ListenerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base_address {
            Some(addr) => write!(f, "{} at {}", self.service_type, addr),
            None => f.write_str(&self.service_type),
        }
    }
}

/// Lifecycle transition of one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub listener: ListenerIdentity,
    pub state: HostState,
}

/// A message crossing an endpoint boundary.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    /// `None` for the reply side of a one-way operation.
    pub message: Option<Message>,
    pub message_id: Uuid,
    pub is_one_way: bool,
    pub endpoint: Arc<EndpointDescriptor>,
    /// `None` on the client side.
    pub listener: Option<ListenerIdentity>,
}

/// Lifecycle events raised by a host manager.
#[derive(Debug, Default)]
pub struct HostEvents {
    pub created: EventHandlers<HostEvent>,
    pub opening: EventHandlers<HostEvent>,
    pub opened: EventHandlers<HostEvent>,
    pub closing: EventHandlers<HostEvent>,
    pub closed: EventHandlers<HostEvent>,
    pub aborting: EventHandlers<HostEvent>,
    pub aborted: EventHandlers<HostEvent>,
    pub restarting: EventHandlers<HostEvent>,
    pub restarted: EventHandlers<HostEvent>,
    pub receiving_request: EventHandlers<MessageEvent>,
    pub sending_reply: EventHandlers<MessageEvent>,
}

impl HostEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe one handler to every lifecycle event.
    pub fn subscribe_lifecycle<F>(&self, handler: F)
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        for handlers in self.lifecycle() {
            let h = Arc::clone(&handler);
            handlers.subscribe(move |e| h(e));
        }
    }

    pub(crate) fn raise_state(&self, listener: &ListenerIdentity, state: HostState) {
        let handlers = match state {
            HostState::Created => &self.created,
            HostState::Opening => &self.opening,
            HostState::Opened => &self.opened,
            HostState::Closing => &self.closing,
            HostState::Closed => &self.closed,
            HostState::Aborting => &self.aborting,
            HostState::Aborted => &self.aborted,
            HostState::Restarting => &self.restarting,
            HostState::Restarted => &self.restarted,
        };
        handlers.raise_guarded(
            &HostEvent {
                listener: listener.clone(),
                state,
            },
            &state.to_string(),
        );
    }

    fn lifecycle(&self) -> [&EventHandlers<HostEvent>; 9] {
        [
            &self.created,
            &self.opening,
            &self.opened,
            &self.closing,
            &self.closed,
            &self.aborting,
            &self.aborted,
            &self.restarting,
            &self.restarted,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_subscribe_raise_unsubscribe() {
        let events: EventHandlers<u32> = EventHandlers::new();
        let sum = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&sum);
        let id = events.subscribe(move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
        });
        events.raise(&5);
        assert_eq!(sum.load(Ordering::SeqCst), 5);

        assert!(events.unsubscribe(id));
        assert!(!events.unsubscribe(id));
        events.raise(&5);
        assert_eq!(sum.load(Ordering::SeqCst), 5);
        assert!(events.is_empty());
    }

    #[test]
    fn test_subscribe_during_raise_uses_snapshot() {
        let events: Arc<EventHandlers<()>> = Arc::new(EventHandlers::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let ev = Arc::clone(&events);
        let c = Arc::clone(&calls);
        events.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            let c2 = Arc::clone(&c);
            ev.subscribe(move |_| {
                c2.fetch_add(100, Ordering::SeqCst);
            });
        });

        events.raise(&());
        // The handler added during delivery was not part of the snapshot.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn test_raise_guarded_survives_panic() {
        let events: EventHandlers<()> = EventHandlers::new();
        let hit = Arc::new(AtomicUsize::new(0));
        events.subscribe(|_| panic!("boom"));
        let h = Arc::clone(&hit);
        events.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        events.raise_guarded(&(), "Test");
        assert_eq!(hit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_subscribe() {
        let events: Arc<EventHandlers<()>> = Arc::new(EventHandlers::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let ev = Arc::clone(&events);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        ev.subscribe(|_| {});
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(events.len(), 400);
    }

    #[test]
    fn test_lifecycle_dispatch() {
        let events = HostEvents::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        events.subscribe_lifecycle(move |e| s.lock().push(e.state));

        let id = ListenerIdentity {
            service_type: "Demo.Calc".into(),
            base_address: Some("http://localhost:1/x".into()),
        };
        events.raise_state(&id, HostState::Opening);
        events.raise_state(&id, HostState::Aborted);
        assert_eq!(*seen.lock(), vec![HostState::Opening, HostState::Aborted]);
        assert_eq!(id.to_string(), "Demo.Calc at http://localhost:1/x");
    }
}
