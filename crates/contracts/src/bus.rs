//! EventBus - typed, synchronous publish/subscribe
//!
//! Subscribers run in subscription order on the publishing thread. Each
//! subscription is owned by a [`Subscription`] handle; dropping the handle
//! removes the subscriber.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Typed event bus with ordered, synchronous delivery.
pub struct EventBus<T> {
    subscribers: Arc<Mutex<Subscribers<T>>>,
}

impl<T: 'static> EventBus<T> {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register `callback`; it stays registered while the handle lives.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut subs = self.subscribers.lock();
            let id = subs.next_id;
            subs.next_id += 1;
            subs.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Subscribers<T>>> = Arc::downgrade(&self.subscribers);
        Subscription::new(move || {
            if let Some(subs) = weak.upgrade() {
                subs.lock().entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver `event` to every current subscriber, in order.
    ///
    /// The subscriber list is snapshotted first, so callbacks may subscribe
    /// or unsubscribe without deadlocking.
    pub fn publish(&self, event: &T) {
        let snapshot: Vec<Callback<T>> = self
            .subscribers
            .lock()
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(event);
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().entries.len()
    }
}

impl<T: 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.lock().entries.len())
            .finish()
    }
}

/// Handle owning a subscription; disposes it on drop.
pub struct Subscription {
    dispose: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Handle that runs `dispose` exactly once
    pub fn new<F>(dispose: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            dispose: Some(Box::new(dispose)),
        }
    }

    /// Handle that aborts a forwarding task when disposed
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self::new(move || task.abort())
    }

    /// Dispose now
    pub fn dispose(mut self) {
        self.run_dispose();
    }

    fn run_dispose(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.dispose.is_some())
            .finish()
    }
}
