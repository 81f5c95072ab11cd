//! `In`: a [`Path`] whose value is written by user input rather than by an
//! operator reacting to a parent.

use std::sync::Arc;

use crate::cell::CasOutcome;
use crate::context::{Context, ExecutorKind};
use crate::error::Result;
use crate::path::{Path, PathOptions};

/// Whether a write dispatches synchronously on the caller's thread or is
/// handed to the `work` executor pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Recomputation and dispatch happen on a worker thread.
    Back,
    /// Recomputation and dispatch happen synchronously on the caller.
    Front,
}

/// Whether an equal-to-current write still advances the version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualPolicy {
    /// Advance the version even when the new value is equal to the old
    /// one (observers re-fire).
    Continue,
    /// Drop writes the equality predicate judges unchanged (default).
    NonContinue,
}

/// An input source: the leaf of a dataflow graph where external writes
/// enter.
pub struct In<T> {
    path: Path<T>,
    context: Option<Arc<Context>>,
    dispatch: DispatchMode,
    equal_policy: EqualPolicy,
}

impl<T: Clone + Send + Sync + 'static> In<T> {
    /// Build an input with `FRONT` dispatch and `NON_CONT` (drop-equal)
    /// policy, with a custom configuration.
    pub fn new(label: impl Into<String>, options: PathOptions<T>) -> In<T> {
        In {
            path: Path::leaf(label, options),
            context: None,
            dispatch: DispatchMode::Front,
            equal_policy: EqualPolicy::NonContinue,
        }
    }

    /// A `FRONT`, `NON_CONT`, default-equality input pre-seeded with
    /// `initial`.
    pub fn consume_default(initial: T) -> In<T>
    where
        T: PartialEq,
    {
        let input = In::new("in", PathOptions::default());
        input.accept_initial(initial);
        input
    }

    /// Route writes through the given context's `work` pool instead of
    /// dispatching synchronously.
    pub fn with_back_dispatch(mut self, context: Arc<Context>) -> Self {
        self.dispatch = DispatchMode::Back;
        self.context = Some(context);
        self
    }

    /// Advance the version even on equal writes.
    pub fn with_continue_on_equal(mut self) -> Self {
        self.equal_policy = EqualPolicy::Continue;
        self
    }

    /// The underlying node, for `map`/`switch_map`/observer wiring.
    pub fn path(&self) -> &Path<T> {
        &self.path
    }

    fn accept_initial(&self, value: T) {
        // Seeding before any activation: the cell simply advances; the
        // value becomes the catch-up payload for the first observer.
        // There are no observers yet, so dispatch is a no-op.
        self.write_now(value);
    }

    /// Write `value`. Under `BACK` dispatch, the recompute/dispatch chain
    /// is submitted to the owning context's `work` pool and this call
    /// returns as soon as it has been enqueued (or fails with
    /// `ShutdownInProgress` if the pool has been shut down); under
    /// `FRONT` dispatch it runs synchronously before this call returns.
    pub fn accept(&self, value: T) -> Result<()> {
        self.submit(move || value)
    }

    /// Submit `produce` to run at write time -- synchronously on the
    /// caller under `FRONT`, or on whichever `work`-pool thread picks up
    /// the job under `BACK` -- and write whatever it returns.
    fn submit(&self, produce: impl FnOnce() -> T + Send + 'static) -> Result<()> {
        match self.dispatch {
            DispatchMode::Front => {
                self.write_now(produce());
                Ok(())
            }
            DispatchMode::Back => {
                let context = self
                    .context
                    .clone()
                    .expect("BACK dispatch requires a context");
                let path = self.path.clone();
                let equal_policy = self.equal_policy;
                context.spawn(ExecutorKind::Work, move || {
                    In::write_now_on(&path, produce(), equal_policy)
                })
            }
        }
    }

    /// Atomically read-modify-write: loops `f` against the current value
    /// until a `cas_advance` succeeds. `f` must tolerate being invoked
    /// more than once under contention. Panics if the input has never
    /// been written, mirroring `get_cache`'s `Uninitialized` contract.
    pub fn update(&self, f: impl Fn(&T) -> T) {
        loop {
            let current = self
                .path
                .load_versioned()
                .expect("In::update called before the input has ever been written");
            let next = f(current.value());
            if self.path.inner_exclude_in(&next) {
                return;
            }
            match self.path.inner_cas_advance(current.version(), next) {
                CasOutcome::Accepted(v) => {
                    self.path.inner_dispatch(&v);
                    return;
                }
                CasOutcome::Rejected => continue,
            }
        }
    }

    /// Like [`accept`](Self::accept), but `supplier` is called at write
    /// time -- on the `work`-pool thread that performs the write under
    /// `BACK` dispatch, not eagerly by the caller -- rather than the
    /// value being produced up front.
    pub fn compute(&self, supplier: impl Fn() -> T + Send + Sync + 'static) -> Result<()> {
        self.submit(move || supplier())
    }

    fn write_now(&self, value: T) {
        In::write_now_on(&self.path, value, self.equal_policy);
    }

    fn write_now_on(path: &Path<T>, value: T, equal_policy: EqualPolicy) {
        if path.inner_exclude_in(&value) {
            log::trace!("`{}`: input excluded, write dropped", path.label());
            return;
        }
        match equal_policy {
            EqualPolicy::Continue => {
                let v = path.inner_force_advance(value);
                path.inner_dispatch(&v);
            }
            EqualPolicy::NonContinue => {
                let expected_version = path.version();
                match path.inner_cas_advance(expected_version, value) {
                    CasOutcome::Accepted(v) => path.inner_dispatch(&v),
                    CasOutcome::Rejected => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_drops_equal_values_under_non_continue() {
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let input: In<i32> = In::consume_default(3);
        {
            let seen = seen.clone();
            input
                .path()
                .add(move |_| {
                    seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
        }
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        input.accept(3).unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
        input.accept(4).unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn continue_on_equal_re_fires() {
        let input: In<i32> = In::consume_default(3).with_continue_on_equal();
        let seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        {
            let seen = seen.clone();
            input
                .path()
                .add(move |_| {
                    seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                });
        }
        input.accept(3).unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn update_applies_a_pure_function() {
        let input: In<i32> = In::consume_default(10);
        input.update(|x| x + 5);
        assert_eq!(input.path().get_cache().unwrap(), 15);
    }

    #[test]
    fn compute_produces_the_value_lazily_at_write_time() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let input: In<i32> = In::consume_default(0);
        let calls_for_supplier = calls.clone();
        input
            .compute(move || {
                calls_for_supplier.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                42
            })
            .unwrap();
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(input.path().get_cache().unwrap(), 42);
    }

    #[test]
    fn compute_under_back_dispatch_runs_the_supplier_on_the_work_pool() {
        use crate::context::Context;
        let ctx = Context::new();
        let input: In<i32> = In::consume_default(0).with_back_dispatch(ctx);
        let caller_thread = std::thread::current().id();
        let (tx, rx) = std::sync::mpsc::channel();
        input
            .compute(move || {
                tx.send(std::thread::current().id()).unwrap();
                7
            })
            .unwrap();
        let supplier_thread = rx.recv().unwrap();
        assert_ne!(
            supplier_thread, caller_thread,
            "supplier must run at write time on the work pool, not eagerly on the caller"
        );
    }
}
