//! `Getter`: an imperative pull/peek handle over a [`Path`] that drives
//! activation the same way an observer would, plus one-shot delivery
//! helpers (`first`, `passive_next`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{ReactiveError, Result};
use crate::observer::ObserverId;
use crate::path::Path;

/// Tracks a pending one-shot registration so that whichever of "the
/// subscription fires" or "the getter deactivates" happens first wins,
/// and the loser is a no-op. `cancel()` returns `true` to the caller that
/// flips it, `false` to everyone after.
struct OneShotSlot {
    cancelled: AtomicBool,
    path_id: Mutex<Option<ObserverId>>,
}

impl OneShotSlot {
    fn new() -> Self {
        OneShotSlot {
            cancelled: AtomicBool::new(false),
            path_id: Mutex::new(None),
        }
    }

    fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct GetterShared<T> {
    path: Path<T>,
    active: AtomicBool,
    observer_id: Mutex<Option<ObserverId>>,
    one_shot: Mutex<Option<Arc<OneShotSlot>>>,
    // Serializes activate()/deactivate() bodies against each other and
    // against installing a new one-shot slot, the same way a Path's own
    // Activator serializes on_activate/on_deactivate.
    transition: Mutex<()>,
    last_seen: Mutex<Option<T>>,
    on_state_change: Option<Arc<dyn Fn(bool) + Send + Sync>>,
    cas_attempt: Option<Arc<dyn Fn(bool, Option<&T>, &T) + Send + Sync>>,
}

/// An imperative handle over a [`Path`]: `activate`/`deactivate` hold or
/// release one unit of downstream demand, `get`/`passive_get` peek the
/// cache, and `first`/`passive_next` deliver exactly one more value.
pub struct Getter<T> {
    shared: Arc<GetterShared<T>>,
}

impl<T> Clone for Getter<T> {
    fn clone(&self) -> Self {
        Getter {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Getter<T> {
    /// A getter with no instrumentation hooks.
    pub fn new(path: Path<T>) -> Getter<T> {
        Getter::with_hooks(path, None, None)
    }

    /// A getter reporting activation transitions and every accepted
    /// write it observes while active. Hooks must not mutate `path`.
    pub fn with_hooks(
        path: Path<T>,
        on_state_change: Option<Arc<dyn Fn(bool) + Send + Sync>>,
        cas_attempt: Option<Arc<dyn Fn(bool, Option<&T>, &T) + Send + Sync>>,
    ) -> Getter<T> {
        Getter {
            shared: Arc::new(GetterShared {
                path,
                active: AtomicBool::new(false),
                observer_id: Mutex::new(None),
                one_shot: Mutex::new(None),
                transition: Mutex::new(()),
                last_seen: Mutex::new(None),
                on_state_change,
                cas_attempt,
            }),
        }
    }

    /// The wrapped node.
    pub fn path(&self) -> &Path<T> {
        &self.shared.path
    }

    /// Whether this getter currently holds a unit of demand on its path.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Register this getter's internal observer, activating the path if
    /// it wasn't already. A no-op if already active.
    pub fn activate(&self) {
        let _guard = self.shared.transition.lock();
        if self.shared.active.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = self.shared.clone();
        let id = self.shared.path.add(move |v: &T| {
            if let Some(hook) = &shared.cas_attempt {
                let prev = shared.last_seen.lock().clone();
                hook(true, prev.as_ref(), v);
            }
            *shared.last_seen.lock() = Some(v.clone());
        });
        *self.shared.observer_id.lock() = Some(id);
        if let Some(hook) = &self.shared.on_state_change {
            hook(true);
        }
    }

    /// Deregister this getter's internal observer, deactivating the path
    /// if this was its last demand. Also cancels any pending `first`/
    /// `passive_next` registration -- "deactivate wins" over a racing
    /// one-shot delivery.
    pub fn deactivate(&self) {
        let _guard = self.shared.transition.lock();
        if !self.shared.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(slot) = self.shared.one_shot.lock().take() {
            if slot.cancel() {
                if let Some(id) = slot.path_id.lock().take() {
                    self.shared.path.remove(id);
                }
            }
        }
        if let Some(id) = self.shared.observer_id.lock().take() {
            self.shared.path.remove(id);
        }
        if let Some(hook) = &self.shared.on_state_change {
            hook(false);
        }
    }

    /// The current value, requiring `is_active()`.
    pub fn get(&self) -> Result<T> {
        if !self.is_active() {
            return Err(ReactiveError::Inactive {
                label: self.shared.path.label().to_string(),
            });
        }
        self.shared.path.get_cache()
    }

    /// The current value without activating; fails if the path has never
    /// been activated by anyone (version 0).
    pub fn passive_get(&self) -> Result<T> {
        if self.shared.path.version() == 0 {
            return Err(ReactiveError::Inactive {
                label: self.shared.path.label().to_string(),
            });
        }
        self.shared.path.get_cache()
    }

    /// Register a one-shot observer that auto-removes itself after its
    /// first delivery, or after losing a race with [`deactivate`](Self::deactivate).
    pub fn first(&self, consumer: impl Fn(&T) + Send + Sync + 'static) {
        let slot = Arc::new(OneShotSlot::new());
        {
            let _guard = self.shared.transition.lock();
            *self.shared.one_shot.lock() = Some(slot.clone());
        }
        let path_for_remove = self.shared.path.clone();
        let slot_cb = slot.clone();
        let id = self.shared.path.add(move |v: &T| {
            if !slot_cb.cancel() {
                return;
            }
            consumer(v);
            if let Some(id) = slot_cb.path_id.lock().take() {
                path_for_remove.remove(id);
            }
        });
        if slot.is_cancelled() {
            // Already fired synchronously above, or cancelled by a
            // racing deactivate() before the id below could be recorded.
            self.shared.path.remove(id);
        } else {
            *slot.path_id.lock() = Some(id);
        }
    }

    /// Like [`first`](Self::first), but fails synchronously instead of
    /// activating if the path has never been activated.
    pub fn passive_next(&self, consumer: impl Fn(&T) + Send + Sync + 'static) -> Result<()> {
        if !self.shared.path.is_active() {
            return Err(ReactiveError::Inactive {
                label: self.shared.path.label().to_string(),
            });
        }
        self.first(consumer);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::In;
    use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};

    #[test]
    fn activate_then_deactivate_round_trips_the_cache() {
        let source: In<i32> = In::consume_default(7);
        let getter = Getter::new(source.path().clone());
        assert!(getter.passive_get().is_err());

        getter.activate();
        assert_eq!(getter.get().unwrap(), 7);
        let before = getter.passive_get().unwrap();

        getter.deactivate();
        assert!(!source.path().is_active());
        let after = getter.passive_get().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn first_fires_once_and_then_stops() {
        let source: In<i32> = In::consume_default(1);
        let getter = Getter::new(source.path().clone());
        getter.activate();

        let seen = Arc::new(AtomicI32::new(0));
        {
            let seen = seen.clone();
            getter.first(move |v| {
                seen.fetch_add(*v, AtomicOrdering::SeqCst);
            });
        }
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);

        source.accept(2).unwrap();
        // The one-shot already fired and unsubscribed; it must not see
        // this second write.
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);

        getter.deactivate();
    }

    #[test]
    fn deactivate_wins_a_race_against_a_pending_first() {
        let source: In<i32> = In::consume_default(1);
        let getter = Getter::new(source.path().clone());
        getter.activate();

        let fired = Arc::new(AtomicBool::new(false));
        // No write happens before deactivate, so the one-shot is still
        // pending when deactivate runs; it must never fire afterward.
        {
            let fired = fired.clone();
            getter.first(move |_| fired.store(true, Ordering::SeqCst));
        }
        getter.deactivate();
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn passive_next_fails_on_a_never_activated_path() {
        let source: In<i32> = In::consume_default(1);
        // Nobody has ever observed this path, so it has never activated.
        let fresh: In<i32> = In::consume_default(1);
        let getter = Getter::new(fresh.path().clone());
        assert!(getter.passive_next(|_| {}).is_err());
        drop(source);
    }
}
