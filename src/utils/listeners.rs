//! Observer registry keyed by opaque subscription tokens
//!
//! Listeners are plain synchronous callbacks. The registry also remembers the
//! last published value so that a new subscriber can atomically obtain a
//! snapshot together with its registration: every value published after
//! `subscribe` returns is delivered to the callback, every value published
//! before is reflected in the snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

/// Opaque handle returned by [`Listeners::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Inner<T> {
    current: Option<T>,
    callbacks: BTreeMap<ListenerId, Callback<T>>,
}

/// Registry of listeners for values of type `T`
pub struct Listeners<T> {
    next_id: AtomicU64,
    inner: Mutex<Inner<T>>,
    /// Held for a whole publish so listeners see values in store order
    publishing: ReentrantMutex<()>,
}

impl<T: Clone> Listeners<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            inner: Mutex::new(Inner {
                current: None,
                callbacks: BTreeMap::new(),
            }),
            publishing: ReentrantMutex::new(()),
        }
    }

    /// Register a callback, returning its token and the latest published value
    pub fn subscribe<F>(&self, callback: F) -> (ListenerId, Option<T>)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.inner.lock();
        inner.callbacks.insert(id, Arc::new(callback));
        (id, inner.current.clone())
    }

    /// Remove a callback. Returns false if the token was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.lock().callbacks.remove(&id).is_some()
    }

    /// Store `value` as the latest one and deliver it to every listener
    ///
    /// Concurrent publishers are serialized: every listener sees values in
    /// the order they were stored, and the last one delivered is `current`.
    /// Callbacks run outside the registry lock, so a callback may publish or
    /// (un)subscribe on the same registry.
    pub fn publish(&self, value: T) {
        let _publishing = self.publishing.lock();
        let callbacks: Vec<Callback<T>> = {
            let mut inner = self.inner.lock();
            inner.current = Some(value.clone());
            inner.callbacks.values().cloned().collect()
        };

        for callback in callbacks {
            callback(&value);
        }
    }

    /// Deliver `value` without remembering it
    ///
    /// Unlike [`Listeners::publish`], concurrent notifications may interleave.
    pub fn notify(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self.inner.lock().callbacks.values().cloned().collect();
        for callback in callbacks {
            callback(value);
        }
    }

    /// Latest published value
    pub fn current(&self) -> Option<T> {
        self.inner.lock().current.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().callbacks.is_empty()
    }
}

impl<T: Clone> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_receives_published_values() {
        let listeners = Listeners::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let (_, snapshot) = listeners.subscribe(move |v| sink.lock().push(*v));
        assert_eq!(snapshot, None);

        listeners.publish(1);
        listeners.publish(2);
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(listeners.current(), Some(2));
    }

    #[test]
    fn test_concurrent_publishers_keep_store_order() {
        let listeners = Arc::new(Listeners::<u32>::new());
        let last = Arc::new(Mutex::new(None));

        let sink = last.clone();
        listeners.subscribe(move |v| {
            std::thread::yield_now();
            *sink.lock() = Some(*v);
        });

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let listeners = listeners.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        listeners.publish(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*last.lock(), listeners.current());
    }

    #[test]
    fn test_callback_may_publish() {
        let listeners = Arc::new(Listeners::<u32>::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&listeners);
        let sink = seen.clone();
        listeners.subscribe(move |v| {
            sink.lock().push(*v);
            if *v == 1 {
                if let Some(listeners) = weak.upgrade() {
                    listeners.publish(2);
                }
            }
        });

        listeners.publish(1);
        assert_eq!(*seen.lock(), vec![1, 2]);
        assert_eq!(listeners.current(), Some(2));
    }

    #[test]
    fn test_snapshot_reflects_earlier_publish() {
        let listeners = Listeners::<u32>::new();
        listeners.publish(7);

        let (_, snapshot) = listeners.subscribe(|_| {});
        assert_eq!(snapshot, Some(7));
    }

    #[test]
    fn test_unsubscribe_by_token() {
        let listeners = Listeners::<u32>::new();
        let (a, _) = listeners.subscribe(|_| {});
        let (b, _) = listeners.subscribe(|_| {});
        assert_ne!(a, b);
        assert_eq!(listeners.len(), 2);

        assert!(listeners.unsubscribe(a));
        assert!(!listeners.unsubscribe(a));
        assert_eq!(listeners.len(), 1);

        assert!(listeners.unsubscribe(b));
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_notify_does_not_store() {
        let listeners = Listeners::<u32>::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        listeners.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        listeners.notify(&3);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(listeners.current(), None);
    }

    #[test]
    fn test_callback_may_reenter_registry() {
        let listeners = Arc::new(Listeners::<u32>::new());
        let inner = listeners.clone();
        listeners.subscribe(move |v| {
            if *v == 1 {
                inner.publish(2);
            }
        });

        listeners.publish(1);
        assert_eq!(listeners.current(), Some(2));
    }
}
