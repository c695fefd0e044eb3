// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::stats::{self, PoolStats, StatsSnapshot};
use crate::{MIN_ALLOC_SIZE, UNSIZED_POOL_SIZE};

/// A pool of growable byte vectors.
///
/// Buffers come out empty with a capacity of at least
/// [`MIN_ALLOC_SIZE`][crate::MIN_ALLOC_SIZE] and may grow freely while in
/// use. Returning a buffer clears it and parks it for the next caller; when
/// the pool is full the buffer is dropped instead, which bounds retention to
/// [`UNSIZED_POOL_LIMIT`][crate::UNSIZED_POOL_LIMIT] worth of minimum-size
/// entries.
///
/// # Examples
///
/// ```
/// use bytebale::UnsizedPool;
///
/// let pool = UnsizedPool::new();
///
/// let mut buf = pool.get();
/// buf.extend_from_slice(b"payload");
/// pool.put(buf);
/// ```
#[derive(Debug)]
pub struct UnsizedPool {
    slots: ArrayQueue<Vec<u8>>,
    stats: Arc<PoolStats>,
}

impl UnsizedPool {
    /// Creates a new pool with empty slots.
    ///
    /// When the `BYTEBALE_POOL_STATS` environment variable is set, a
    /// background thread periodically logs this pool's counters.
    #[must_use]
    pub fn new() -> Self {
        let stats = Arc::new(PoolStats::default());
        stats::maybe_spawn_reporter("unsized", &stats);

        Self {
            slots: ArrayQueue::new(UNSIZED_POOL_SIZE),
            stats,
        }
    }

    /// Returns an empty buffer with capacity at least `MIN_ALLOC_SIZE`.
    #[must_use]
    pub fn get(&self) -> Vec<u8> {
        match self.slots.pop() {
            Some(buf) => {
                self.stats.add_reused(buf.capacity());
                buf
            }
            None => {
                self.stats.add_non_pooled(MIN_ALLOC_SIZE);
                Vec::with_capacity(MIN_ALLOC_SIZE)
            }
        }
    }

    /// Returns an empty buffer with capacity at least `min_capacity`.
    #[must_use]
    pub fn buffer(&self, min_capacity: usize) -> Vec<u8> {
        let mut buf = self.get();
        if buf.capacity() < min_capacity {
            buf.reserve(min_capacity);
        }
        buf
    }

    /// Clears the buffer and returns it to the pool.
    ///
    /// Buffers that shrank below the minimum capacity, or that arrive while
    /// the pool is full, are dropped; the call never blocks.
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();

        if buf.capacity() < MIN_ALLOC_SIZE {
            self.stats.add_dropped(buf.capacity());
            return;
        }

        if let Err(buf) = self.slots.push(buf) {
            self.stats.add_dropped(buf.capacity());
        }
    }

    /// Alias of [`put`][Self::put] for symmetry with [`buffer`][Self::buffer].
    pub fn put_buffer(&self, buf: Vec<u8>) {
        self.put(buf);
    }

    /// Returns a snapshot of this pool's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for UnsizedPool {
    fn default() -> Self {
        Self::new()
    }
}
