//! After `switch_map` settles (no switch in flight), it holds exactly one
//! inner subscription -- the current selector's pick -- and none of the
//! previously-selected candidates.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use reactive_paths::In;

#[test]
fn switch_map_holds_exactly_one_inner_active_after_quiescence() {
    let outer: In<i32> = In::consume_default(1);
    let a: In<i32> = In::consume_default(10);
    let b: In<i32> = In::consume_default(20);
    let c: In<i32> = In::consume_default(30);

    let a_path = a.path().clone();
    let b_path = b.path().clone();
    let c_path = c.path().clone();
    let switched = outer.path().switch_map(move |v: &i32| match v {
        1 => a_path.clone(),
        2 => b_path.clone(),
        _ => c_path.clone(),
    });

    let seen = Arc::new(AtomicI32::new(-1));
    {
        let seen = seen.clone();
        switched.add(move |v| seen.store(*v, Ordering::SeqCst));
    }
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    assert!(a.path().is_active(), "the currently-selected inner must be active");
    assert!(!b.path().is_active(), "an unselected candidate must never be active");
    assert!(!c.path().is_active());

    outer.accept(2).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 20);
    assert!(!a.path().is_active(), "the old inner must be released once switched away from");
    assert!(b.path().is_active());
    assert!(!c.path().is_active());

    outer.accept(3).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 30);
    assert!(!a.path().is_active());
    assert!(!b.path().is_active());
    assert!(c.path().is_active());

    outer.accept(1).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    assert!(a.path().is_active());
    assert!(!b.path().is_active());
    assert!(!c.path().is_active());
}
