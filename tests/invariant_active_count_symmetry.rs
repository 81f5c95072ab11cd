//! `active_count == 0 <=> no_upstream_subscriptions_held`, exercised
//! across a derived chain with more than one observer so the counter's
//! arithmetic (not just its 0/1 edges) is covered.

use reactive_paths::In;

#[test]
fn activation_and_deactivation_propagate_symmetrically_through_a_chain() {
    let src: In<i32> = In::consume_default(1);
    let doubled = src.path().map(|x: &i32| x * 2);
    let quadrupled = doubled.map(|x: &i32| x * 2);

    assert!(!src.path().is_active());
    assert!(!doubled.is_active());
    assert!(!quadrupled.is_active());

    let id1 = quadrupled.add(|_| {});
    assert!(quadrupled.is_active());
    assert!(doubled.is_active(), "activation must propagate to the immediate parent");
    assert!(src.path().is_active(), "activation must propagate transitively to the root");

    let id2 = quadrupled.add(|_| {});
    assert!(quadrupled.is_active());

    quadrupled.remove(id1);
    assert!(
        quadrupled.is_active(),
        "one remaining observer must keep the whole chain active"
    );
    assert!(doubled.is_active());
    assert!(src.path().is_active());

    quadrupled.remove(id2);
    assert!(!quadrupled.is_active(), "last observer removed must deactivate");
    assert!(!doubled.is_active(), "deactivation must propagate to the immediate parent");
    assert!(!src.path().is_active(), "deactivation must propagate transitively to the root");
}

#[test]
fn a_join_holds_every_parent_active_only_while_it_has_demand() {
    let a: In<i32> = In::consume_default(1);
    let b: In<i32> = In::consume_default(2);

    let (sum, _handle) = reactive_paths::join(
        "sum",
        0,
        |_state: &i32| false,
        vec![
            reactive_paths::entry(a.path().clone(), |state: &i32, v: &i32| state + v),
            reactive_paths::entry(b.path().clone(), |state: &i32, v: &i32| state + v),
        ],
    );

    assert!(!a.path().is_active());
    assert!(!b.path().is_active());

    let id = sum.add(|_| {});
    assert!(a.path().is_active());
    assert!(b.path().is_active());

    sum.remove(id);
    assert!(!a.path().is_active(), "join teardown must release every parent");
    assert!(!b.path().is_active());
}
