// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end scenarios exercising split reuse and concurrent access.

use std::sync::Arc;
use std::thread;

use bytebale::{SizedPool, UnsizedPool};

/// Two-tier split and return: an 8 KiB buffer is returned to the pool and
/// then handed out again as two adjacent non-aliasing 4 KiB halves.
#[test]
fn two_tier_split_and_return() {
    let pool = SizedPool::new();

    let b = pool.get_sized(8192);
    assert_eq!(b.capacity(), 8192, "fresh allocation at tier capacity");
    let base = b.as_ptr() as usize;
    pool.put(b);

    let b1 = pool.get_sized(4096);
    let b2 = pool.get_sized(4096);

    let p1 = b1.as_ptr() as usize;
    let p2 = b2.as_ptr() as usize;

    // Both point within the original 8 KiB region and do not alias.
    assert!(p1 >= base && p1 + 4096 <= base + 8192);
    assert!(p2 >= base && p2 + 4096 <= base + 8192);
    assert_eq!(p1 + 4096, p2);

    assert_eq!(pool.stats().non_pooled.count, 1, "no further allocations");
}

#[test]
fn contents_survive_roundtrip() {
    let pool = SizedPool::new();

    let mut buf = pool.get_sized(4096);
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte = (i % 251) as u8;
    }
    pool.put(buf);

    let buf = pool.get_sized(4096);
    for (i, byte) in buf.iter().enumerate() {
        assert_eq!(*byte, (i % 251) as u8);
    }
}

#[test]
fn concurrent_get_put() {
    let pool = Arc::new(SizedPool::new());

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for round in 0..200 {
                    let size = 2048 << (worker % 4);
                    let mut buf = pool.get_sized(size);
                    assert_eq!(buf.len(), size);
                    buf[0] = worker as u8;
                    buf[size - 1] = round as u8;
                    pool.put(buf);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn concurrent_unsized_roundtrips() {
    let pool = Arc::new(UnsizedPool::new());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..200 {
                    let mut buf = pool.get();
                    assert!(buf.is_empty());
                    buf.extend_from_slice(&[worker as u8; 64]);
                    pool.put(buf);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}
