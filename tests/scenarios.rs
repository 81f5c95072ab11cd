//! End-to-end scenarios over the public API, one per documented example.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use reactive_paths::{In, Link, PathOptions};

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
    let id = {
        let seen = seen.clone();
        r.add(move |v| seen.store(*v, Ordering::SeqCst))
    };
    assert_eq!(seen.load(Ordering::SeqCst), 168);

    a.accept(7).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 294);

    b.accept(9).unwrap();
    c.accept(17).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1071);

    r.remove(id);
    assert!(!r.is_active());
    assert!(!a.path().is_active());
    assert!(!b.path().is_active());
    assert!(!c.path().is_active());
}

#[test]
fn map_equal_drop_under_non_continue_and_continue() {
    let s: In<i32> = In::consume_default(3);
    let m = s.path().map(|x: &i32| x * 2);
    let seen = Arc::new(AtomicI32::new(-1));
    {
        let seen = seen.clone();
        m.add(move |v| seen.store(*v, Ordering::SeqCst));
    }
    assert_eq!(seen.load(Ordering::SeqCst), 6);

    s.accept(3).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 6, "equal write under NON_CONT must be dropped");

    let s2: In<i32> = In::consume_default(3).with_continue_on_equal();
    let m2 = s2.path().map(|x: &i32| x * 2);
    let seen2 = Arc::new(AtomicI32::new(-1));
    {
        let seen2 = seen2.clone();
        m2.add(move |v| seen2.store(*v, Ordering::SeqCst));
    }
    assert_eq!(seen2.load(Ordering::SeqCst), 6);
    s2.accept(3).unwrap();
    assert_eq!(seen2.load(Ordering::SeqCst), 6, "re-fire happens but value is unchanged");
}

#[test]
fn switch_to_dummy_emits_nothing() {
    let s: In<i32> = In::consume_default(3);
    let p = s.path().switch_map(|x: &i32| {
        if *x == 3 {
            reactive_paths::get_dummy::<i32>()
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
    assert_eq!(seen.load(Ordering::SeqCst), -1);
    s.accept(4).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), -1);
}

#[test]
fn exclude_in_and_exclude_out_combine_on_a_map_chain() {
    const AA: i32 = 1;
    const BB: i32 = 2;
    const CC: i32 = 3;
    const FF: i32 = 4;

    let a: In<i32> = In::new("a", PathOptions::default().exclude_in(|x: &i32| *x == BB));
    let b = a
        .path()
        .map_with_options(|s: &i32| s + AA, PathOptions::default().exclude_out(|s: &i32| *s == CC + AA));

    let seen = Arc::new(AtomicI32::new(-1));
    {
        let seen = seen.clone();
        b.add(move |v| seen.store(*v, Ordering::SeqCst));
    }

    a.accept(AA).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), AA + AA);

    a.accept(BB).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), AA + AA, "input excluded, no change");

    a.accept(CC).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), AA + AA, "output excluded, observer not fired");
    assert_eq!(b.get_cache().unwrap(), CC + AA, "cache still advances on an excluded output");

    a.accept(FF).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), FF + AA);
}

#[test]
fn link_rebind_sequence() {
    let link: Link<i32> = Link::with_seed(4);
    let src: In<i32> = In::consume_default(0);

    let seen = Arc::new(AtomicI32::new(-1));
    let _id = {
        let seen = seen.clone();
        link.path().add(move |v| seen.store(*v, Ordering::SeqCst))
    };
    assert_eq!(seen.load(Ordering::SeqCst), 4);

    link.bind(src.path().clone());
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    src.accept(5).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 5);

    link.unbind();
    src.accept(9).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 5, "unbound link must not see further writes");
    assert_eq!(link.path().get_cache().unwrap(), 5);

    link.bind(src.path().clone());
    assert_eq!(seen.load(Ordering::SeqCst), 9);
}

#[test]
fn twenty_threads_update_concurrently_and_observe_increasing_versions() {
    let u: In<i32> = In::consume_default(0);
    let mapped = u.path().map(|x: &i32| x * 5);

    let history: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let history = history.clone();
        mapped.add(move |v| history.lock().unwrap().push(*v));
    }

    std::thread::scope(|scope| {
        for i in 1..=20i32 {
            let u = &u;
            scope.spawn(move || {
                u.update(|x| x + i);
            });
        }
    });

    assert_eq!(u.path().get_cache().unwrap(), 210);
    assert_eq!(mapped.get_cache().unwrap(), 1050);

    let history = history.lock().unwrap();
    let mut prev = i32::MIN;
    for v in history.iter() {
        assert!(*v > prev, "dispatch order must be strictly increasing");
        prev = *v;
    }
}
