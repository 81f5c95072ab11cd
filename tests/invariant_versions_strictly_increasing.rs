//! A node's version is a strictly increasing counter: every accepted
//! write bumps it, and no observer ever witnesses a version it has
//! already seen or one lower than that. Exercised both for a single
//! sequential writer across a `map` chain and for concurrent writers on
//! one node.

use std::sync::{Arc, Mutex};

use reactive_paths::In;

#[test]
fn versions_strictly_increase_across_a_sequential_map_chain() {
    let src: In<i32> = In::consume_default(0);
    let doubled = src.path().map(|x: &i32| x * 2);

    let mut last_src = src.path().version();
    let mut last_doubled = doubled.version();

    for i in 1..=10 {
        src.accept(i).unwrap();
        let now_src = src.path().version();
        let now_doubled = doubled.version();
        assert!(now_src > last_src, "source version must strictly increase on every accepted write");
        assert!(now_doubled > last_doubled, "derived version must strictly increase in lockstep");
        last_src = now_src;
        last_doubled = now_doubled;
    }
}

#[test]
fn concurrent_writers_never_deliver_a_version_out_of_order() {
    let src: In<i32> = In::consume_default(0);
    let mapped = src.path().map(|x: &i32| x * 5);

    let seen_versions: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen_versions = seen_versions.clone();
        let mapped_for_read = mapped.clone();
        mapped.add(move |_| {
            seen_versions.lock().unwrap().push(mapped_for_read.version());
        });
    }

    std::thread::scope(|scope| {
        for i in 1..=16i32 {
            let src = &src;
            scope.spawn(move || {
                src.update(|x| x + i);
            });
        }
    });

    let versions = seen_versions.lock().unwrap();
    assert!(versions.len() >= 16);
    let mut prev = 0u64;
    for &v in versions.iter() {
        assert!(v > prev, "dispatched versions must be strictly increasing: {} then {}", prev, v);
        prev = v;
    }
}
