//! Append-only observer lists for cross-component notifications.

use std::sync::{Arc, Mutex};

/// A set of callbacks invoked with a shared event value.
///
/// Callbacks are registered once at wiring time and never removed. The
/// interior lock is held only while the list is cloned; callbacks run
/// outside the lock so an observer may re-enter the notifying component.
pub struct ObserverSet<T: ?Sized> {
    observers: Mutex<Vec<Arc<dyn Fn(&T) + Send + Sync>>>,
}

impl<T: ?Sized> Default for ObserverSet<T> {
    fn default() -> Self {
        ObserverSet {
            observers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> ObserverSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn add(&self, f: impl Fn(&T) + Send + Sync + 'static) {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .push(Arc::new(f));
    }

    /// Invoke every registered callback with `value`.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<_> = self
            .observers
            .lock()
            .expect("observer list lock poisoned")
            .clone();
        for observer in snapshot {
            observer(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .is_empty()
    }
}
