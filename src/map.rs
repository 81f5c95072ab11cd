//! `map`: a `Path<U>` whose value is a pure function of exactly one
//! parent's value.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::observer::ObserverId;
use crate::path::{Path, PathOptions};

impl<T: Clone + Send + Sync + 'static> Path<T> {
    /// Derive a node whose value is `f` applied to this node's value,
    /// transporting this node's version forward.
    pub fn map<U, F>(&self, f: F) -> Path<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.map_with_options(f, PathOptions::default())
    }

    /// Like [`map`](Self::map), with explicit equality/exclude-in/
    /// exclude-out configuration on the derived node.
    pub fn map_with_options<U, F>(&self, f: F, options: PathOptions<U>) -> Path<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.map_hooked(f, options, None)
    }

    /// Like [`map`](Self::map), additionally invoking `hook` with
    /// `(accepted, previous, candidate)` on every CAS attempt the
    /// resulting node makes. The hook must never be allowed to fail
    /// propagation even if it panics.
    pub fn open_map<U, F>(
        &self,
        f: F,
        hook: impl Fn(bool, Option<&U>, &U) + Send + Sync + 'static,
    ) -> Path<U>
    where
        U: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        self.map_hooked(f, PathOptions::default(), Some(Arc::new(hook)))
    }

    fn map_hooked<U, F>(
        &self,
        f: F,
        options: PathOptions<U>,
        hook: Option<Arc<dyn Fn(bool, Option<&U>, &U) + Send + Sync>>,
    ) -> Path<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&T) -> U + Send + Sync + 'static,
    {
        let parent = self.clone();
        let f: Arc<dyn Fn(&T) -> U + Send + Sync> = Arc::new(f);
        let subscription: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));
        let label = format!("{}.map", parent.label());
        Path::new_cyclic(label, options, move |weak_self| {
            let on_activate = {
                let parent = parent.clone();
                let f = f.clone();
                let weak = weak_self.clone();
                let subscription = subscription.clone();
                let hook = hook.clone();
                move || {
                    parent.incr();
                    let f_for_write = f.clone();
                    let weak_for_write = weak.clone();
                    let hook_for_write = hook.clone();
                    let id = parent.subscribe_raw(move |versioned| {
                        if let Some(inner) = weak_for_write.upgrade() {
                            let mapped = f_for_write(versioned.value());
                            inner.propagate_hooked(
                                versioned.version(),
                                mapped,
                                hook_for_write.as_deref(),
                            );
                        }
                    });
                    *subscription.lock() = Some(id);
                    // Safe to re-derive even if the subscription above
                    // already delivered this same version: `propagate`
                    // drops any write whose parent version the node has
                    // already caught up to.
                    if let Some(current) = parent.load_versioned() {
                        if let Some(inner) = weak.upgrade() {
                            let mapped = f(current.value());
                            inner.propagate_hooked(current.version(), mapped, hook.as_deref());
                        }
                    }
                }
            };
            let on_deactivate = {
                let parent = parent.clone();
                let subscription = subscription.clone();
                move || {
                    if let Some(id) = subscription.lock().take() {
                        parent.unsubscribe_raw(id);
                    }
                    parent.decr();
                }
            };
            (on_activate, on_deactivate)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::input::In;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn map_transforms_and_seeds_on_activation() {
        let source = In::consume_default(3);
        let doubled = source.path().map(|x: &i32| x * 2);
        let seen = Arc::new(AtomicI32::new(0));
        let seen2 = seen.clone();
        let id = doubled.add(move |v| seen2.store(*v, Ordering::SeqCst));
        assert_eq!(seen.load(Ordering::SeqCst), 6);

        source.accept(5).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 10);

        doubled.remove(id);
        assert!(!doubled.is_active());
        assert!(!source.path().is_active());
    }

    #[test]
    fn open_map_reports_every_cas_attempt() {
        let source: In<i32> = In::consume_default(3);
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hook_attempts = attempts.clone();
        let doubled = source.path().open_map(
            |x: &i32| x * 2,
            move |accepted, prev, next| {
                hook_attempts
                    .lock()
                    .unwrap()
                    .push((accepted, prev.copied(), *next));
            },
        );
        let _id = doubled.add(|_| {});
        source.accept(3).unwrap(); // equal write: dropped by the input itself
        source.accept(5).unwrap();

        let seen = attempts.lock().unwrap().clone();
        assert_eq!(seen, vec![(true, None, 6), (true, Some(6), 10)]);
    }
}
