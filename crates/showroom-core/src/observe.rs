//! Synchronous observer registry.
//!
//! Each state owner keeps an [`Observers`] list and notifies it inline, in the
//! order changes happen. Nothing is queued or coalesced: a subscriber sees
//! every value exactly once, in order. Subscribing returns a
//! [`SubscriptionId`] that is the handle for unsubscribing.

use std::fmt;

/// Handle returned by [`Observers::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// Ordered list of subscriber callbacks for values of type `T`.
pub struct Observers<T> {
    next_id: u64,
    subscribers: Vec<(SubscriptionId, Callback<T>)>,
}

impl<T> Observers<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { next_id: 0, subscribers: Vec::new() }
    }

    /// Register a callback. Callbacks run in subscription order.
    pub fn subscribe(&mut self, callback: impl FnMut(&T) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if the handle was already removed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sub, _)| *sub != id);
        self.subscribers.len() != before
    }

    /// Deliver `value` to every subscriber.
    pub fn notify(&mut self, value: &T) {
        for (_, callback) in &mut self.subscribers {
            callback(value);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("subscribers", &self.subscribers.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn delivers_in_order_to_all() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut observers = Observers::new();

        let a = Arc::clone(&seen);
        observers.subscribe(move |v: &u32| a.lock().unwrap().push(("a", *v)));
        let b = Arc::clone(&seen);
        observers.subscribe(move |v: &u32| b.lock().unwrap().push(("b", *v)));

        observers.notify(&1);
        observers.notify(&2);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let seen = Arc::new(Mutex::new(0));
        let mut observers = Observers::new();

        let counter = Arc::clone(&seen);
        let id = observers.subscribe(move |_: &()| *counter.lock().unwrap() += 1);

        observers.notify(&());
        assert!(observers.unsubscribe(id));
        assert!(!observers.unsubscribe(id));
        observers.notify(&());

        assert_eq!(*seen.lock().unwrap(), 1);
        assert!(observers.is_empty());
    }
}
