//! `Link`: a `Path<T>` whose parent can be rebound at runtime.
//!
//! Binding is tracked independently of activation: `bind`/`unbind` may be
//! called while the link has no observers at all, in which case they only
//! record which parent to subscribe to the next time the link activates.
//! If the link is currently active, `bind`/`unbind` additionally perform
//! the live subscribe/unsubscribe immediately, so that "after `bind(p)`
//! returns, writes to `p` are delivered" holds unconditionally.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cell::Version;
use crate::path::{Path, PathInner, PathOptions};

fn raw_ptr<U>(path: &Path<U>) -> *const () {
    Arc::as_ptr(&path.inner) as *const ()
}

/// A live subscription to the currently-bound parent. Tearing it down
/// unsubscribes and releases the parent's activation demand.
struct LiveHandle {
    teardown: Box<dyn FnOnce() + Send + Sync>,
}

type SubscribeFn<T> = dyn Fn(&Weak<PathInner<T>>) -> LiveHandle + Send + Sync;

struct ParentBinding<T> {
    ptr: *const (),
    subscribe: Arc<SubscribeFn<T>>,
}

// The raw pointer is only ever compared for identity, never
// dereferenced; the `Path<U>` it was taken from is kept alive separately
// by the closure captured in `subscribe`.
unsafe impl<T> Send for ParentBinding<T> {}
unsafe impl<T> Sync for ParentBinding<T> {}

/// A node whose parent-of-its-value can be swapped at runtime.
pub struct Link<T> {
    path: Path<T>,
    weak_self: Weak<PathInner<T>>,
    current: Arc<Mutex<Option<ParentBinding<T>>>>,
    live: Arc<Mutex<Option<LiveHandle>>>,
}

impl<T: Clone + PartialEq + Send + Sync + 'static> Link<T> {
    /// A link with no initial value; its cell stays uninitialized until
    /// the first bind delivers one.
    pub fn new() -> Link<T> {
        Link::build(None)
    }

    /// A link pre-seeded with `seed`, visible immediately to observers
    /// even before any `bind`.
    pub fn with_seed(seed: T) -> Link<T> {
        Link::build(Some(seed))
    }

    fn build(seed: Option<T>) -> Link<T> {
        let current: Arc<Mutex<Option<ParentBinding<T>>>> = Arc::new(Mutex::new(None));
        let live: Arc<Mutex<Option<LiveHandle>>> = Arc::new(Mutex::new(None));
        let weak_slot: Arc<Mutex<Option<Weak<PathInner<T>>>>> = Arc::new(Mutex::new(None));
        let path = Path::new_cyclic("link", PathOptions::default(), {
            let current = current.clone();
            let live = live.clone();
            let weak_slot = weak_slot.clone();
            move |weak_self| {
                *weak_slot.lock() = Some(weak_self.clone());
                let on_activate = {
                    let current = current.clone();
                    let live = live.clone();
                    let weak = weak_self.clone();
                    move || {
                        if let Some(binding) = current.lock().as_ref() {
                            let handle = (binding.subscribe)(&weak);
                            *live.lock() = Some(handle);
                        }
                    }
                };
                let on_deactivate = {
                    let live = live.clone();
                    move || {
                        if let Some(handle) = live.lock().take() {
                            (handle.teardown)();
                        }
                    }
                };
                (on_activate, on_deactivate)
            }
        });
        if let Some(seed) = seed {
            path.inner_force_advance(seed);
        }
        let weak_self = weak_slot
            .lock()
            .take()
            .expect("new_cyclic's builder always runs exactly once");
        Link {
            path,
            weak_self,
            current,
            live,
        }
    }

    /// The underlying node.
    pub fn path(&self) -> &Path<T> {
        &self.path
    }

    /// Whether a parent is currently bound (regardless of whether the
    /// link itself is active).
    pub fn is_bound(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Bind to `parent`, whose values are used as-is. A no-op if already
    /// bound to this exact parent.
    pub fn bind(&self, parent: Path<T>) {
        self.bind_lift(parent, |v: &T| v.clone());
    }

    /// Bind to `parent`, lifting its values through `lift` before they
    /// are written into this link's cell. A no-op if already bound to
    /// this exact parent.
    pub fn bind_lift<U, F>(&self, parent: Path<U>, lift: F)
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(&U) -> T + Send + Sync + 'static,
    {
        let new_ptr = raw_ptr(&parent);
        let mut current = self.current.lock();
        if let Some(existing) = current.as_ref() {
            if existing.ptr == new_ptr {
                log::debug!("`{}`: bind to already-bound parent, no-op", self.path.label());
                return;
            }
        }

        log::debug!("`{}`: binding to a new parent", self.path.label());
        {
            let mut live = self.live.lock();
            if let Some(handle) = live.take() {
                (handle.teardown)();
            }
        }

        let lift = Arc::new(lift);
        let subscribe: Arc<SubscribeFn<T>> = Arc::new(move |weak: &Weak<PathInner<T>>| {
            parent.incr();
            // `propagate` compares a node's own accumulated version against
            // an incoming version number, which only holds when a node has
            // exactly one parent for its whole lifetime. A Link's cell
            // outlives any single binding, so each (re)bind instead tracks
            // its own delivery-order guard, scoped to this one live
            // subscription, and writes through `force_advance` -- gated by
            // `equality` to keep the usual dedup-on-equal-value behavior --
            // rather than by a version CAS against the parent's numbering.
            let last_seen: Arc<Mutex<Version>> = Arc::new(Mutex::new(0));
            let deliver: Arc<dyn Fn(Version, &U) + Send + Sync> = {
                let weak = weak.clone();
                let lift = lift.clone();
                let last_seen = last_seen.clone();
                Arc::new(move |version: Version, value: &U| {
                    {
                        let mut last = last_seen.lock();
                        if version <= *last {
                            return;
                        }
                        *last = version;
                    }
                    if let Some(inner) = weak.upgrade() {
                        let lifted = lift(value);
                        if let Some(existing) = inner.cell.load() {
                            if (inner.equality)(existing.value(), &lifted) {
                                return;
                            }
                        }
                        let path_view = Path {
                            inner: inner.clone(),
                        };
                        let v = path_view.inner_force_advance(lifted);
                        path_view.inner_dispatch(&v);
                    }
                })
            };
            let id = {
                let deliver = deliver.clone();
                parent.subscribe_raw(move |versioned_u| {
                    deliver(versioned_u.version(), versioned_u.value());
                })
            };
            if let Some(current_u) = parent.load_versioned() {
                deliver(current_u.version(), current_u.value());
            }
            let parent_for_teardown = parent.clone();
            LiveHandle {
                teardown: Box::new(move || {
                    parent_for_teardown.unsubscribe_raw(id);
                    parent_for_teardown.decr();
                }),
            }
        });

        *current = Some(ParentBinding {
            ptr: new_ptr,
            subscribe: subscribe.clone(),
        });
        drop(current);

        // `on_activate` only consults `current` at the moment a node's
        // demand count crosses 0->1; a bind arriving while the link is
        // already active has no such edge to ride, so it must establish
        // the live subscription itself.
        if self.path.is_active() {
            let handle = subscribe(&self.weak_self);
            *self.live.lock() = Some(handle);
        }
    }

    /// Release the current binding, if any. The cell retains its last
    /// value but stops updating.
    pub fn unbind(&self) {
        if self.current.lock().take().is_some() {
            log::debug!("`{}`: unbinding", self.path.label());
            if let Some(handle) = self.live.lock().take() {
                (handle.teardown)();
            }
        }
    }

    /// Release the current binding only if it is bound to `parent`.
    pub fn unbind_if<U>(&self, parent: &Path<U>) {
        let ptr = raw_ptr(parent);
        let mut current = self.current.lock();
        let matches = current.as_ref().map(|b| b.ptr == ptr).unwrap_or(false);
        if matches {
            current.take();
            log::debug!("`{}`: unbinding (matched parent)", self.path.label());
            if let Some(handle) = self.live.lock().take() {
                (handle.teardown)();
            }
        }
    }
}
