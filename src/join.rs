//! `Join`: a `Path<State>` whose value is folded from N parents, each with
//! its own reducer.
//!
//! Every parent is wired into a single shared `apply` closure that,
//! regardless of which parent's value it was built from, only ever needs
//! to know how to turn the *current* `State` into the *next* one. That
//! collapses the N differently-typed parents into one homogeneous
//! CAS-retry loop over `State` -- the same shape `Path::map` uses,
//! generalized to fold instead of transform.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::cell::CasOutcome;
use crate::observer::ObserverId;
use crate::path::{Path, PathInner, PathOptions};

type Apply<State> = Arc<dyn Fn(Arc<dyn Fn(&State) -> State + Send + Sync>) + Send + Sync>;
type ActivatePair = (
    Box<dyn Fn() + Send + Sync>,
    Box<dyn Fn() + Send + Sync>,
);

/// A single parent/reducer pair waiting to be wired into a `Join`.
pub struct JoinEntry<State> {
    setup: Box<dyn FnOnce(Apply<State>) -> ActivatePair + Send + Sync>,
}

/// Pair `parent` with `reducer` for inclusion in [`join`]'s entry list.
/// `reducer` is invoked with the join's current state and the parent's
/// newly-arrived value, and its return value becomes the join's next
/// state.
pub fn entry<State, P, R>(parent: Path<P>, reducer: R) -> JoinEntry<State>
where
    State: Send + Sync + 'static,
    P: Clone + Send + Sync + 'static,
    R: Fn(&State, &P) -> State + Send + Sync + 'static,
{
    let reducer = Arc::new(reducer);
    JoinEntry {
        setup: Box::new(move |apply: Apply<State>| {
            let sub_id: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));
            let activate = {
                let parent = parent.clone();
                let reducer = reducer.clone();
                let apply = apply.clone();
                let sub_id = sub_id.clone();
                move || {
                    parent.incr();
                    let id = {
                        let reducer = reducer.clone();
                        let apply = apply.clone();
                        parent.subscribe_raw(move |versioned_p| {
                            let value = versioned_p.value().clone();
                            let reducer = reducer.clone();
                            apply(Arc::new(move |state: &State| reducer(state, &value)));
                        })
                    };
                    *sub_id.lock() = Some(id);
                    if let Some(current) = parent.load_versioned() {
                        let value = current.value().clone();
                        let reducer = reducer.clone();
                        apply(Arc::new(move |state: &State| reducer(state, &value)));
                    }
                }
            };
            let deactivate = {
                let parent = parent.clone();
                let sub_id = sub_id.clone();
                move || {
                    if let Some(id) = sub_id.lock().take() {
                        parent.unsubscribe_raw(id);
                    }
                    parent.decr();
                }
            };
            (
                Box::new(activate) as Box<dyn Fn() + Send + Sync>,
                Box::new(deactivate) as Box<dyn Fn() + Send + Sync>,
            )
        }),
    }
}

/// Handle for writing directly into a `Join`'s state -- the
/// `Join.Updatable` variant. Direct writes race fairly with parent-driven
/// reductions: both go through the same CAS-retry loop over `State`.
pub struct JoinHandle<State> {
    apply: Apply<State>,
}

impl<State: Send + Sync + 'static> JoinHandle<State> {
    /// Fold `f` into the join's current state, identically to how a
    /// parent's reducer would.
    pub fn update(&self, f: impl Fn(&State) -> State + Send + Sync + 'static) {
        (self.apply)(Arc::new(f));
    }
}

/// Build a `Join` node: `seed` is the initial state, `predicate_invalid`
/// suppresses observer dispatch (without blocking the write itself) while
/// it returns `true` for the current state, and `entries` lists each
/// parent with the reducer that folds its values into the state.
pub fn join<State>(
    label: impl Into<String>,
    seed: State,
    predicate_invalid: impl Fn(&State) -> bool + Send + Sync + 'static,
    entries: Vec<JoinEntry<State>>,
) -> (Path<State>, JoinHandle<State>)
where
    State: Clone + PartialEq + Send + Sync + 'static,
{
    let label = label.into();
    let options = PathOptions::default().exclude_out(predicate_invalid);
    let entries = Arc::new(Mutex::new(Some(entries)));
    let apply_for_handle: Arc<Mutex<Option<Apply<State>>>> = Arc::new(Mutex::new(None));
    let path = Path::new_cyclic(label, options, {
        let apply_for_handle = apply_for_handle.clone();
        move |weak_self| {
            let apply: Apply<State> = {
                let weak = weak_self.clone();
                Arc::new(move |reducer: Arc<dyn Fn(&State) -> State + Send + Sync>| {
                    if let Some(inner) = weak.upgrade() {
                        apply_join_reduction(&inner, &*reducer);
                    }
                })
            };
            *apply_for_handle.lock() = Some(apply.clone());
            let pairs: Arc<Vec<ActivatePair>> = {
                let entries = entries
                    .lock()
                    .take()
                    .expect("join's entry list is only ever consumed once, at construction");
                Arc::new(
                    entries
                        .into_iter()
                        .map(|entry| (entry.setup)(apply.clone()))
                        .collect(),
                )
            };
            let on_activate = {
                let pairs = pairs.clone();
                move || {
                    for (activate, _) in pairs.iter() {
                        activate();
                    }
                }
            };
            let on_deactivate = {
                let pairs = pairs.clone();
                move || {
                    for (_, deactivate) in pairs.iter() {
                        deactivate();
                    }
                }
            };
            (on_activate, on_deactivate)
        }
    });
    path.inner_force_advance(seed);

    let apply = apply_for_handle
        .lock()
        .take()
        .expect("new_cyclic's builder always runs exactly once, installing `apply`");
    (path, JoinHandle { apply })
}

fn apply_join_reduction<State: Clone + Send + Sync + 'static>(
    inner: &Arc<PathInner<State>>,
    reducer: &dyn Fn(&State) -> State,
) {
    loop {
        let current = match inner.cell.load() {
            Some(v) => v,
            None => return,
        };
        let candidate = reducer(current.value());
        if (inner.equality)(current.value(), &candidate) {
            return;
        }
        match inner
            .cell
            .cas_advance(current.version(), candidate, &*inner.equality)
        {
            CasOutcome::Accepted(v) => {
                if let Some(exclude_out) = &inner.exclude_out {
                    if exclude_out(v.value()) {
                        return;
                    }
                }
                inner.observers.dispatch(&v, &inner.label);
                return;
            }
            CasOutcome::Rejected => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::In;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn join_folds_all_parents_and_direct_updates() {
        let a: In<i32> = In::consume_default(1);
        let b: In<i32> = In::consume_default(2);

        let (sum, handle) = join(
            "sum",
            0,
            |_state: &i32| false,
            vec![
                entry(a.path().clone(), |state: &i32, v: &i32| state + v),
                entry(b.path().clone(), |state: &i32, v: &i32| state + v),
            ],
        );

        let seen = Arc::new(AtomicI32::new(-1));
        {
            let seen = seen.clone();
            sum.add(move |v| seen.store(*v, Ordering::SeqCst));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 1 + 2);

        a.accept(5).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1 + 2 + 5);

        handle.update(|state| state + 100);
        assert_eq!(seen.load(Ordering::SeqCst), 1 + 2 + 5 + 100);
    }
}
