//! The observer set: a copy-on-write, lock-free collection of callbacks
//! attached to a [`crate::path::Path`].
//!
//! `add`/`remove` clone-splice-install a new `Arc<[ObserverEntry<T>]>`.
//! Dispatch takes a single `load()` as its snapshot and iterates it to
//! completion regardless of concurrent `add`/`remove` racing in -- this is
//! what gives a single dispatch cycle a consistent observer set without
//! ever blocking a writer on a reader or vice versa.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::cell::Versioned;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registered observer, used by [`ObserverSet::remove`] to
/// target exactly one occurrence even when two observers wrap
/// indistinguishable closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        ObserverId(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct ObserverEntry<T> {
    id: ObserverId,
    callback: Arc<dyn Fn(&Versioned<T>) + Send + Sync>,
}

impl<T> Clone for ObserverEntry<T> {
    fn clone(&self) -> Self {
        ObserverEntry {
            id: self.id,
            callback: self.callback.clone(),
        }
    }
}

/// A lock-free, copy-on-write set of observer callbacks.
pub struct ObserverSet<T> {
    entries: ArcSwap<Vec<ObserverEntry<T>>>,
}

impl<T> ObserverSet<T> {
    /// An empty observer set.
    pub fn new() -> Self {
        ObserverSet {
            entries: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Register a callback, returning an id that can later be passed to
    /// [`remove`](Self::remove). The new observer is guaranteed to see the
    /// *next* write; it may or may not see a dispatch already in flight.
    pub fn add(&self, callback: impl Fn(&Versioned<T>) + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId::next();
        let callback: Arc<dyn Fn(&Versioned<T>) + Send + Sync> = Arc::new(callback);
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            next.push(ObserverEntry {
                id,
                callback: callback.clone(),
            });
            Arc::new(next)
        });
        id
    }

    /// Remove a single occurrence of `id`. A dispatch already iterating a
    /// snapshot that captured this observer may still deliver to it once
    /// more; no subsequent write will.
    pub fn remove(&self, id: ObserverId) {
        self.entries.rcu(|current| {
            let mut next = (**current).clone();
            if let Some(pos) = next.iter().position(|e| e.id == id) {
                next.remove(pos);
            }
            Arc::new(next)
        });
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: ObserverId) -> bool {
        self.entries.load().iter().any(|e| e.id == id)
    }

    /// Number of currently-registered observers.
    pub fn size(&self) -> usize {
        self.entries.load().len()
    }

    /// Deliver `value` to a consistent snapshot of the current observers.
    /// A panicking observer is caught, logged, and does not prevent the
    /// remaining observers in the snapshot from being dispatched to.
    pub fn dispatch(&self, value: &Versioned<T>, debug_label: &str) {
        let snapshot = self.entries.load_full();
        for entry in snapshot.iter() {
            Self::deliver(entry, value, debug_label);
        }
    }

    /// Deliver `value` to exactly one observer, identified by `id`, if it
    /// is still registered. Used for the one-shot catch-up replay a
    /// newly-added observer receives when it did not itself trigger
    /// activation.
    pub fn dispatch_to(&self, id: ObserverId, value: &Versioned<T>, debug_label: &str) {
        let snapshot = self.entries.load();
        if let Some(entry) = snapshot.iter().find(|e| e.id == id) {
            Self::deliver(entry, value, debug_label);
        }
    }

    fn deliver(entry: &ObserverEntry<T>, value: &Versioned<T>, debug_label: &str) {
        let callback = &entry.callback;
        let result = catch_unwind(AssertUnwindSafe(|| callback(value)));
        if result.is_err() {
            log::error!(
                "observer panicked while handling a dispatch on `{}` (observer id {:?})",
                debug_label,
                entry.id
            );
        }
    }
}

impl<T> Default for ObserverSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
