//! `switch_map`: a `Path<B>` whose parent-of-its-value is itself derived
//! from another parent, and which rebinds that inner parent every time
//! the outer value changes.
//!
//! State machine (per the design notes): `Idle -> Bound(inner, v_outer)`,
//! and a `Switching` edge that is not a persisted variant but the critical
//! section held by `state`'s mutex while the old inner is torn down and
//! the new one is subscribed. Inner deliveries are tagged with the outer
//! version that created the subscription; a delivery whose tag no longer
//! matches the live outer version is dropped, which is what makes the
//! outer always win a race against a stale inner.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cell::Version;
use crate::observer::ObserverId;
use crate::path::{Path, PathInner, PathOptions};

struct SwitchState<B> {
    outer_sub: Option<ObserverId>,
    inner: Option<(Path<B>, ObserverId)>,
    outer_version: Version,
}

impl<B> SwitchState<B> {
    fn new() -> Self {
        SwitchState {
            outer_sub: None,
            inner: None,
            outer_version: 0,
        }
    }
}

type Selector<A, B> = dyn Fn(&A) -> Path<B> + Send + Sync;
type CasHook<B> = dyn Fn(bool, Option<&B>, &B) + Send + Sync;

/// A sentinel node that never produces a value and holds no activation
/// side effects. Binding it as a `switch_map` inner means the switch
/// holds no live inner subscription.
pub fn get_dummy<B: Send + Sync + 'static>() -> Path<B> {
    Path::leaf("dummy", PathOptions::with_equality(|_: &B, _: &B| false))
}

impl<A: Clone + Send + Sync + 'static> Path<A> {
    /// Rebind the produced `Path<B>`'s source every time this node's
    /// value changes, tracking `g(current_value)`.
    pub fn switch_map<B, G>(&self, g: G) -> Path<B>
    where
        B: Clone + PartialEq + Send + Sync + 'static,
        G: Fn(&A) -> Path<B> + Send + Sync + 'static,
    {
        self.switch_map_hooked(g, PathOptions::default(), None)
    }

    /// Like [`switch_map`](Self::switch_map), additionally invoking `hook`
    /// with `(accepted, previous, candidate)` on every CAS attempt the
    /// resulting node makes -- the `open_switch_map` variant used for
    /// tracing and tests. The hook must never be allowed to fail
    /// propagation even if it panics.
    pub fn open_switch_map<B, G>(
        &self,
        g: G,
        hook: impl Fn(bool, Option<&B>, &B) + Send + Sync + 'static,
    ) -> Path<B>
    where
        B: Clone + PartialEq + Send + Sync + 'static,
        G: Fn(&A) -> Path<B> + Send + Sync + 'static,
    {
        self.switch_map_hooked(g, PathOptions::default(), Some(Arc::new(hook)))
    }

    fn switch_map_hooked<B>(
        &self,
        g: impl Fn(&A) -> Path<B> + Send + Sync + 'static,
        options: PathOptions<B>,
        hook: Option<Arc<CasHook<B>>>,
    ) -> Path<B>
    where
        B: Clone + Send + Sync + 'static,
    {
        let outer = self.clone();
        let g: Arc<Selector<A, B>> = Arc::new(g);
        let state: Arc<Mutex<SwitchState<B>>> = Arc::new(Mutex::new(SwitchState::new()));
        let label = format!("{}.switch_map", outer.label());
        let label_for_build = label.clone();
        Path::new_cyclic(label, options, move |weak_self| {
            let on_activate = {
                let outer = outer.clone();
                let g = g.clone();
                let state = state.clone();
                let weak = weak_self.clone();
                let hook = hook.clone();
                let label = label_for_build.clone();
                move || {
                    log::debug!("`{}`: switch_map activating, entering Idle", label);
                    outer.incr();
                    let outer_sub_id = {
                        let g = g.clone();
                        let state = state.clone();
                        let weak = weak.clone();
                        let hook = hook.clone();
                        let label = label.clone();
                        outer.subscribe_raw(move |versioned_a| {
                            perform_switch(
                                &weak,
                                &state,
                                &g,
                                versioned_a.version(),
                                versioned_a.value().clone(),
                                hook.clone(),
                                &label,
                            );
                        })
                    };
                    state.lock().outer_sub = Some(outer_sub_id);
                    if let Some(current_a) = outer.load_versioned() {
                        perform_switch(
                            &weak,
                            &state,
                            &g,
                            current_a.version(),
                            current_a.value().clone(),
                            hook.clone(),
                            &label,
                        );
                    }
                }
            };
            let on_deactivate = {
                let outer = outer.clone();
                let state = state.clone();
                let label = label_for_build.clone();
                move || {
                    let mut guard = state.lock();
                    if let Some(sub) = guard.outer_sub.take() {
                        outer.unsubscribe_raw(sub);
                    }
                    if let Some((old_inner, old_sub)) = guard.inner.take() {
                        old_inner.unsubscribe_raw(old_sub);
                        old_inner.decr();
                    }
                    guard.outer_version = 0;
                    drop(guard);
                    outer.decr();
                    log::debug!("`{}`: switch_map deactivated, back to Idle", label);
                }
            };
            (on_activate, on_deactivate)
        })
    }
}

/// Perform one outer-driven switch: tear down the old inner (if any),
/// select and bind the new one, and seed from its current value. Also
/// invoked, with the outer's currently-cached version, at activation time
/// to establish the initial binding.
fn perform_switch<A, B>(
    weak_self: &Weak<PathInner<B>>,
    state: &Arc<Mutex<SwitchState<B>>>,
    g: &Arc<Selector<A, B>>,
    outer_version: Version,
    outer_value: A,
    hook: Option<Arc<CasHook<B>>>,
    label: &str,
) where
    B: Clone + Send + Sync + 'static,
{
    let mut guard = state.lock();
    if guard.outer_version != 0 && guard.outer_version >= outer_version {
        // Superseded by a switch we already performed for a later (or
        // the same) outer version.
        log::trace!(
            "`{}`: outer v{} superseded by already-applied v{}, switch dropped",
            label,
            outer_version,
            guard.outer_version
        );
        return;
    }
    log::debug!(
        "`{}`: switch_map leaving Bound, entering Switching (outer v{})",
        label,
        outer_version
    );
    if let Some((old_inner, old_sub)) = guard.inner.take() {
        old_inner.unsubscribe_raw(old_sub);
        old_inner.decr();
    }
    let inner_new = g(&outer_value);
    inner_new.incr();

    let tag = outer_version;
    let sub_id = {
        let weak_for_inner = weak_self.clone();
        let state_for_inner = state.clone();
        let hook_for_inner = hook.clone();
        inner_new.subscribe_raw(move |versioned_b| {
            if let Some(inner) = weak_for_inner.upgrade() {
                let live = state_for_inner.lock().outer_version == tag;
                if !live {
                    return;
                }
                inner.propagate_hooked(
                    versioned_b.version(),
                    versioned_b.value().clone(),
                    hook_for_inner.as_deref(),
                );
            }
        })
    };

    if let Some(current_b) = inner_new.load_versioned() {
        if let Some(inner) = weak_self.upgrade() {
            inner.propagate_hooked(current_b.version(), current_b.value().clone(), hook.as_deref());
        }
    }

    guard.inner = Some((inner_new, sub_id));
    guard.outer_version = outer_version;
    log::debug!(
        "`{}`: switch_map entered Bound (outer v{})",
        label,
        outer_version
    );
}

#[cfg(test)]
mod tests {
    use super::get_dummy;
    use crate::input::In;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn three_source_product_switch_chain() {
        let a: In<i32> = In::consume_default(4);
        let b: In<i32> = In::consume_default(6);
        let c: In<i32> = In::consume_default(7);

        let b_path = b.path().clone();
        let c_path = c.path().clone();
        let r = a.path().switch_map(move |av| {
            let av = *av;
            let c_path = c_path.clone();
            b_path.switch_map(move |bv| {
                let product = av * bv;
                c_path.map(move |cv| product * cv)
            })
        });

        let seen = Arc::new(AtomicI32::new(0));
        {
            let seen = seen.clone();
            r.add(move |v| seen.store(*v, Ordering::SeqCst));
        }
        assert_eq!(seen.load(Ordering::SeqCst), 4 * 6 * 7);

        a.accept(7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7 * 6 * 7);

        b.accept(9).unwrap();
        c.accept(17).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7 * 9 * 17);
    }

    #[test]
    fn switching_to_a_dummy_emits_nothing_and_does_not_panic() {
        let s: In<i32> = In::consume_default(3);
        let p = s.path().switch_map(|x: &i32| {
            if *x == 3 {
                get_dummy::<i32>()
            } else {
                let leaf: In<i32> = In::consume_default(0);
                leaf.path().clone()
            }
        });
        let seen = Arc::new(AtomicI32::new(-1));
        {
            let seen = seen.clone();
            p.add(move |v| seen.store(*v, Ordering::SeqCst));
        }
        // Bound to the dummy from the start; no value has ever flowed.
        assert_eq!(seen.load(Ordering::SeqCst), -1);
        s.accept(4).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), -1);
    }
}
