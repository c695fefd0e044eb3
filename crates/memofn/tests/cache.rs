// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end memoisation scenarios combining single-flight, TTL, and
//! eviction.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lifetree::testing::isolated_root;
use memofn::{CachedFnBuilder, CachedKeyFnBuilder};

/// Ten parallel callers observe one invocation; after the TTL a single
/// further invocation happens.
#[test]
fn single_flight_with_ttl() {
    let calls = Arc::new(AtomicU32::new(0));
    let counted = Arc::clone(&calls);
    let cached = CachedFnBuilder::new(move |_ctx| {
        thread::sleep(Duration::from_millis(100));
        Ok(counted.fetch_add(1, Ordering::SeqCst) + 1)
    })
    .with_ttl(Duration::from_millis(200))
    .build();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let cached = cached.clone();
            thread::spawn(move || {
                let ctx = isolated_root("caller").context();
                cached.call(&ctx).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    thread::sleep(Duration::from_millis(250));
    let ctx = isolated_root("late").context();
    assert_eq!(cached.call(&ctx).unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// The access pattern a, b, a, c with a two-entry bound evicts b.
#[test]
fn keyed_lru_end_to_end() {
    let ctx = isolated_root("t").context();
    let cached = CachedKeyFnBuilder::new(|_ctx, key: &String| Ok(key.len()))
        .with_max_entries(2)
        .build();

    for key in ["a", "b", "a", "c"] {
        cached.call(&ctx, &key.to_string()).unwrap();
    }
    cached.run_cleanup();

    assert_eq!(cached.len(), 2);
    assert!(cached.contains(&"a".to_string()));
    assert!(cached.contains(&"c".to_string()));
}

/// A cache outgrowing its bound is trimmed by the background janitor
/// without an explicit cleanup call.
#[test]
fn janitor_trims_in_background() {
    let ctx = isolated_root("t").context();
    let cached = CachedKeyFnBuilder::new(|_ctx, key: &u32| Ok(*key))
        .with_max_entries(4)
        .with_cleanup_interval(Duration::from_secs(1))
        .build();

    for key in 0..16 {
        cached.call(&ctx, &key).unwrap();
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while cached.len() > 4 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(cached.len(), 4);
}
