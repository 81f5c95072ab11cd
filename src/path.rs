//! `Path<T>`: a node with a versioned cell, an observer set, and an
//! activator, lazily built and torn down as downstream demand arrives and
//! departs.
//!
//! Kind-specific behavior (In, Map, SwitchMap, Join, Link) lives entirely
//! in the `on_activate`/`on_deactivate` closures handed to the
//! [`crate::activator::Activator`] at construction time and in the
//! write path each kind drives -- there is no tagged enum of operator
//! variants; a `Path<T>` genuinely does not know which kind built it.

use std::sync::{Arc, Weak};

use crate::activator::Activator;
use crate::cell::{CasOutcome, Version, Versioned, VersionedCell};
use crate::error::{ReactiveError, Result};
use crate::observer::{ObserverId, ObserverSet};

pub(crate) struct PathInner<T> {
    pub(crate) label: String,
    pub(crate) cell: VersionedCell<T>,
    pub(crate) observers: ObserverSet<T>,
    pub(crate) activator: Activator,
    pub(crate) equality: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    pub(crate) exclude_in: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
    pub(crate) exclude_out: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
}

/// A node in the dataflow graph. Cheap to clone (an `Arc` underneath);
/// clones refer to the same underlying node.
pub struct Path<T> {
    pub(crate) inner: Arc<PathInner<T>>,
}

impl<T> Clone for Path<T> {
    fn clone(&self) -> Self {
        Path {
            inner: self.inner.clone(),
        }
    }
}

/// A narrow façade over a [`Path`], returned by
/// [`Path::get_publisher`], exposing only `add`/`remove`/`is_active` --
/// not `map`, `switch_map`, or any of the other operator constructors.
pub struct Publisher<T> {
    path: Path<T>,
    held_eager: bool,
}

impl<T: Send + Sync + 'static> Publisher<T> {
    /// Register an observer; see [`Path::add`].
    pub fn add(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> ObserverId {
        self.path.add(observer)
    }

    /// Deregister an observer; see [`Path::remove`].
    pub fn remove(&self, id: ObserverId) {
        self.path.remove(id)
    }

    /// Whether the underlying node currently has at least one unit of
    /// downstream demand.
    pub fn is_active(&self) -> bool {
        self.path.is_active()
    }
}

impl<T> Drop for Publisher<T> {
    fn drop(&mut self) {
        if self.held_eager {
            self.path.decr();
        }
    }
}

/// Per-node configuration accepted by the builder methods on `Path`.
pub struct PathOptions<T> {
    pub(crate) equality: Box<dyn Fn(&T, &T) -> bool + Send + Sync>,
    pub(crate) exclude_in: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
    pub(crate) exclude_out: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
}

impl<T: PartialEq> Default for PathOptions<T> {
    fn default() -> Self {
        PathOptions {
            equality: Box::new(|a: &T, b: &T| a == b),
            exclude_in: None,
            exclude_out: None,
        }
    }
}

impl<T> PathOptions<T> {
    /// Start from a custom equality predicate instead of `PartialEq`.
    pub fn with_equality(equality: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        PathOptions {
            equality: Box::new(equality),
            exclude_in: None,
            exclude_out: None,
        }
    }

    /// Inputs for which the node refuses to advance its version.
    pub fn exclude_in(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.exclude_in = Some(Box::new(predicate));
        self
    }

    /// Outputs for which the node updates its cell silently (observers
    /// are not fired).
    pub fn exclude_out(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.exclude_out = Some(Box::new(predicate));
        self
    }
}

impl<T: Send + Sync + 'static> Path<T> {
    /// Build a node whose activation lifecycle is driven by
    /// `build_hooks`, which receives a `Weak` back-reference to the node
    /// being constructed (for subscribing to parents and propagating
    /// writes back into `self` without a reference cycle).
    pub(crate) fn new_cyclic<FA, FD>(
        label: impl Into<String>,
        options: PathOptions<T>,
        build_hooks: impl FnOnce(&Weak<PathInner<T>>) -> (FA, FD),
    ) -> Path<T>
    where
        FA: Fn() + Send + Sync + 'static,
        FD: Fn() + Send + Sync + 'static,
    {
        let label = label.into();
        let inner = Arc::new_cyclic(|weak| {
            let (on_activate, on_deactivate) = build_hooks(weak);
            let activator = Activator::new(label.clone(), on_activate, on_deactivate);
            PathInner {
                label,
                cell: VersionedCell::new(),
                observers: ObserverSet::new(),
                activator,
                equality: options.equality,
                exclude_in: options.exclude_in,
                exclude_out: options.exclude_out,
            }
        });
        Path { inner }
    }

    /// A node with no parents and no activation side effects -- the shape
    /// `In` sources are built on top of.
    pub(crate) fn leaf(label: impl Into<String>, options: PathOptions<T>) -> Path<T> {
        Path::new_cyclic(label, options, |_weak| ((|| {}), (|| {})))
    }

    /// The node's debug label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Whether the node currently has at least one unit of downstream
    /// demand (an observer, a getter, or an active child path).
    pub fn is_active(&self) -> bool {
        self.inner.activator.is_active()
    }

    /// Register an observer. If this is the first unit of downstream
    /// demand the node activates (subscribing to its parents and seeding
    /// its cell) before this call returns; otherwise the node is already
    /// active and the new observer instead receives a one-shot replay of
    /// the current cached value, if any.
    pub fn add(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> ObserverId {
        let id = self
            .inner
            .observers
            .add(move |v: &Versioned<T>| observer(v.value()));
        let version_before = self.inner.cell.version();
        self.inner.activator.incr();
        // `on_activate` (for a derived node with a live parent) may have
        // already delivered a fresh value to every current observer,
        // including this one, via its own `propagate`/`dispatch` call --
        // in which case the cell's version moved and no further catch-up
        // is needed. Otherwise (a leaf node's inert `on_activate`, an
        // already-active node, or `on_activate` rejecting a stale parent
        // write) the version is unchanged and any existing cached value
        // must be replayed to this observer explicitly.
        if self.inner.cell.version() == version_before {
            if let Some(current) = self.inner.cell.load() {
                self.inner
                    .observers
                    .dispatch_to(id, &current, &self.inner.label);
            }
        }
        id
    }

    /// Deregister an observer. If this was the last unit of downstream
    /// demand the node deactivates (unsubscribing from its parents).
    pub fn remove(&self, id: ObserverId) {
        self.inner.observers.remove(id);
        self.inner.activator.decr();
    }

    /// A thin façade over this node exposing only `add`/`remove`/
    /// `is_active`, without the rest of `Path`'s operator surface
    /// (`map`, `switch_map`, ...). When `eager` is `true`, the returned
    /// publisher itself holds one unit of downstream demand -- activating
    /// the node immediately, even before any observer is added -- until
    /// the publisher is dropped.
    pub fn get_publisher(&self, eager: bool) -> Publisher<T> {
        if eager {
            self.inner.activator.incr();
        }
        Publisher {
            path: self.clone(),
            held_eager: eager,
        }
    }

    /// Read the current value, failing with `Uninitialized` if the node
    /// has never produced one.
    pub fn get_cache(&self) -> Result<T>
    where
        T: Clone,
    {
        self.inner
            .cell
            .load()
            .map(|v| v.value().clone())
            .ok_or_else(|| ReactiveError::Uninitialized {
                label: self.inner.label.clone(),
            })
    }

    /// The current version, `0` if the node has never produced a value.
    pub fn version(&self) -> Version {
        self.inner.cell.version()
    }

    /// Register one unit of raw downstream demand without an observer
    /// callback -- used by `Getter` and by derived nodes subscribing to
    /// their parents.
    pub(crate) fn incr(&self) -> bool {
        self.inner.activator.incr()
    }

    /// Release one unit of raw downstream demand.
    pub(crate) fn decr(&self) -> bool {
        self.inner.activator.decr()
    }

    /// Subscribe a raw callback that receives every write this node ever
    /// makes, tagged with its version. Does not itself affect demand;
    /// callers that need activation should also call `incr`/`decr`.
    pub(crate) fn subscribe_raw(
        &self,
        callback: impl Fn(&Versioned<T>) + Send + Sync + 'static,
    ) -> ObserverId {
        self.inner.observers.add(callback)
    }

    /// Deregister a raw subscription registered via `subscribe_raw`.
    pub(crate) fn unsubscribe_raw(&self, id: ObserverId) {
        self.inner.observers.remove(id);
    }

    /// A snapshot of the current versioned value, if any.
    pub(crate) fn load_versioned(&self) -> Option<Arc<Versioned<T>>> {
        self.inner.cell.load()
    }

    /// Whether `value` is rejected by this node's `exclude_in` predicate.
    pub(crate) fn inner_exclude_in(&self, value: &T) -> bool {
        self.inner
            .exclude_in
            .as_ref()
            .map_or(false, |predicate| predicate(value))
    }

    /// Whether `value` should update the cell without notifying
    /// observers, per this node's `exclude_out` predicate.
    pub(crate) fn inner_exclude_out(&self, value: &T) -> bool {
        self.inner
            .exclude_out
            .as_ref()
            .map_or(false, |predicate| predicate(value))
    }

    /// Unconditionally install `value`, bypassing the equality predicate.
    pub(crate) fn inner_force_advance(&self, value: T) -> Arc<Versioned<T>>
    where
        T: Clone,
    {
        self.inner.cell.force_advance(value)
    }

    /// Attempt a version-guarded, equality-checked write directly against
    /// this node's own cell (used by `In`, which has no parent to
    /// propagate from).
    pub(crate) fn inner_cas_advance(&self, expected_version: Version, value: T) -> CasOutcome<T>
    where
        T: Clone,
    {
        self.inner
            .cell
            .cas_advance(expected_version, value, &*self.inner.equality)
    }

    /// Dispatch a freshly-written versioned value to observers, honoring
    /// `exclude_out`.
    pub(crate) fn inner_dispatch(&self, versioned: &Versioned<T>) {
        if self.inner_exclude_out(versioned.value()) {
            return;
        }
        self.inner.observers.dispatch(versioned, &self.inner.label);
    }
}

impl<T: Clone + Send + Sync + 'static> PathInner<T> {
    /// Apply an incoming value from a parent write at `parent_version`,
    /// advancing this node's own version monotonically and dispatching to
    /// observers on acceptance. Used by Map and by SwitchMap's currently-
    /// bound inner subscription.
    ///
    /// A rejection can mean two different things: the equality predicate
    /// judged the candidate unchanged (nothing to do), or a concurrent
    /// writer (a sibling parent, for multi-parent nodes) already advanced
    /// the cell past this write (stale, discard). The loop distinguishes
    /// the two by re-reading the version after a rejection.
    pub(crate) fn propagate(self: &Arc<Self>, parent_version: Version, value: T) {
        self.propagate_hooked(parent_version, value, None)
    }

    /// Like [`propagate`](Self::propagate), additionally invoking `hook`
    /// with `(accepted, previous_value, candidate_value)` on every CAS
    /// attempt -- used by `open_switch_map`/`open_map` to let tests and
    /// tracing observe every write attempt, successful or not. The hook
    /// must never be allowed to fail propagation even if it panics.
    pub(crate) fn propagate_hooked(
        self: &Arc<Self>,
        parent_version: Version,
        value: T,
        hook: Option<&(dyn Fn(bool, Option<&T>, &T) + Send + Sync)>,
    ) {
        if let Some(exclude_in) = &self.exclude_in {
            if exclude_in(&value) {
                log::trace!("`{}`: input excluded, write dropped", self.label);
                return;
            }
        }
        loop {
            let current = self.cell.load();
            let current_version = current.as_ref().map(|v| v.version()).unwrap_or(0);
            if current_version != 0 && current_version >= parent_version {
                log::trace!(
                    "`{}`: stale write (parent v{}, local v{}) dropped",
                    self.label,
                    parent_version,
                    current_version
                );
                return;
            }
            match self
                .cell
                .cas_advance(current_version, value.clone(), &*self.equality)
            {
                CasOutcome::Accepted(v) => {
                    log::trace!("`{}`: accepted write at v{}", self.label, v.version());
                    Self::run_hook(hook, true, current.as_deref().map(|c| c.value()), &value);
                    if let Some(exclude_out) = &self.exclude_out {
                        if exclude_out(v.value()) {
                            return;
                        }
                    }
                    self.observers.dispatch(&v, &self.label);
                    return;
                }
                CasOutcome::Rejected => {
                    let now = self.cell.version();
                    if now == current_version {
                        // Equality predicate rejected it, not a race.
                        Self::run_hook(hook, false, current.as_deref().map(|c| c.value()), &value);
                        return;
                    }
                    continue;
                }
            }
        }
    }

    fn run_hook(
        hook: Option<&(dyn Fn(bool, Option<&T>, &T) + Send + Sync)>,
        accepted: bool,
        previous: Option<&T>,
        candidate: &T,
    ) {
        if let Some(hook) = hook {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                hook(accepted, previous, candidate)
            }));
            if result.is_err() {
                log::error!("a cas observer hook panicked; propagation continues regardless");
            }
        }
    }
}
