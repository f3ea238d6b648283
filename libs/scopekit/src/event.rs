//! Synchronous event handlers with drop-to-unsubscribe guards.
//!
//! All window and navigation events are raised on the thread that performs the
//! operation, in the order the operations happen. `emit` snapshots the handler
//! list first, so a handler may subscribe, unsubscribe or trigger further
//! events without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Handlers<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Handler<E>)>>,
}

/// A multicast event.
pub struct Event<E> {
    inner: Arc<Handlers<E>>,
}

impl<E: 'static> Event<E> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Handlers {
                next_id: AtomicU64::new(1),
                entries: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a handler. It stays registered until the returned guard drops.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.entries.lock().push((id, Arc::new(handler)));

        let weak: Weak<Handlers<E>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(handlers) = weak.upgrade() {
                    handlers.entries.lock().retain(|(h, _)| *h != id);
                }
            })),
        }
    }

    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Handler<E>> = self
            .inner
            .entries
            .lock()
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in snapshot {
            handler(event);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Drop every handler.
    pub fn clear(&self) {
        self.inner.entries.lock().clear();
    }
}

impl<E: 'static> Default for Event<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Event<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("handlers", &self.inner.entries.lock().len())
            .finish()
    }
}

/// Guard returned by [`Event::subscribe`].
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Keep the handler registered for as long as the event itself lives.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handlers_receive_events_until_guard_drops() {
        let event = Event::<u32>::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let s = seen.clone();
        let sub = event.subscribe(move |v| {
            s.fetch_add(*v as usize, Ordering::SeqCst);
        });
        event.emit(&2);
        event.emit(&3);
        assert_eq!(seen.load(Ordering::SeqCst), 5);

        drop(sub);
        event.emit(&10);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        assert_eq!(event.handler_count(), 0);
    }

    #[test]
    fn detached_subscription_survives() {
        let event = Event::<()>::new();
        event.subscribe(|_| {}).detach();
        assert_eq!(event.handler_count(), 1);
        event.clear();
        assert_eq!(event.handler_count(), 0);
    }

    #[test]
    fn handler_may_unsubscribe_others_while_emitting() {
        let event = Arc::new(Event::<()>::new());
        let victim = Arc::new(Mutex::new(Some(event.subscribe(|_| {}))));

        let v = victim.clone();
        let _killer = event.subscribe(move |_| {
            v.lock().take();
        });

        event.emit(&());
        assert_eq!(event.handler_count(), 1);
    }
}
