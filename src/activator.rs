//! Reference-counted activation demand.
//!
//! Mirrors the shape of [`crate::runtime`]'s revision counter: the demand
//! count is a free-running `AtomicI32` so most `incr`/`decr` calls and all
//! `is_active` reads never touch a lock. Only the two transition edges
//! (0 -> 1, 1 -> 0) take a short-held mutex, and only so that `on_activate`
//! and `on_deactivate` of the *same* node can never run concurrently with
//! each other -- not to protect the counter's arithmetic, which is already
//! atomic.

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

/// Tracks how many downstream consumers currently demand a node's value,
/// and drives the node's activation lifecycle hooks at the 0<->1 edges.
pub struct Activator {
    label: String,
    count: AtomicI32,
    transition: Mutex<()>,
    on_activate: Box<dyn Fn() + Send + Sync>,
    on_deactivate: Box<dyn Fn() + Send + Sync>,
}

impl Activator {
    /// Build an inert activator. `on_activate` runs exactly once per
    /// 0->1 transition, `on_deactivate` exactly once per 1->0 transition.
    /// `label` is used only for diagnostics (logging, debug assertions).
    pub fn new(
        label: impl Into<String>,
        on_activate: impl Fn() + Send + Sync + 'static,
        on_deactivate: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Activator {
            label: label.into(),
            count: AtomicI32::new(0),
            transition: Mutex::new(()),
            on_activate: Box::new(on_activate),
            on_deactivate: Box::new(on_deactivate),
        }
    }

    /// Register one unit of downstream demand. Returns `true` if this
    /// call caused the 0->1 transition (and thus ran `on_activate`).
    pub fn incr(&self) -> bool {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(previous >= 0, "activator count went negative");
        if previous == 0 {
            // Only the thread that observed 0 here can have caused this
            // transition, since `fetch_add` is atomic; the lock below
            // only serializes against a concurrent 1->0 deactivation that
            // is still unwinding on another thread.
            let _guard = self.transition.lock();
            log::debug!("`{}`: activating (demand 0 -> 1)", self.label);
            (self.on_activate)();
            if crate::context::debug_mode() {
                debug_assert!(
                    self.is_active(),
                    "`{}`: demand should be positive immediately after a 0->1 transition",
                    self.label
                );
            }
            true
        } else {
            false
        }
    }

    /// Release one unit of downstream demand. Returns `true` if this call
    /// caused the 1->0 transition (and thus ran `on_deactivate`).
    pub fn decr(&self) -> bool {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous >= 1, "activator decremented below zero");
        if previous == 1 {
            let _guard = self.transition.lock();
            log::debug!("`{}`: deactivating (demand 1 -> 0)", self.label);
            (self.on_deactivate)();
            if crate::context::debug_mode() {
                debug_assert!(
                    !self.is_active(),
                    "`{}`: demand should be zero immediately after a 1->0 transition",
                    self.label
                );
            }
            true
        } else {
            false
        }
    }

    /// Whether at least one unit of downstream demand is currently held.
    pub fn is_active(&self) -> bool {
        self.count.load(Ordering::Acquire) > 0
    }

    /// The raw demand count, for diagnostics and invariant assertions.
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn first_incr_activates_last_decr_deactivates() {
        let activations = Arc::new(AtomicUsize::new(0));
        let deactivations = Arc::new(AtomicUsize::new(0));
        let a = activations.clone();
        let d = deactivations.clone();
        let activator = Activator::new(
            "test",
            move || {
                a.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                d.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(!activator.is_active());
        activator.incr();
        assert!(activator.is_active());
        activator.incr();
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        activator.decr();
        assert!(activator.is_active());
        activator.decr();
        assert!(!activator.is_active());
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_incr_decr_never_tears_a_transition() {
        use std::thread;
        let busy = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));
        let b = busy.clone();
        let m = max_concurrent.clone();
        let activator = Arc::new(Activator::new(
            "test",
            move || {
                let now = b.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                thread::yield_now();
                b.fetch_sub(1, Ordering::SeqCst);
            },
            move || {},
        ));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let activator = activator.clone();
            handles.push(thread::spawn(move || {
                activator.incr();
                activator.decr();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1);
    }
}
