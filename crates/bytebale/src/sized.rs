// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use crate::buf::{Buf, Chunk};
use crate::stats::{self, PoolStats, StatsSnapshot};
use crate::tier::{Parked, Tier};
use crate::{alloc_size, pool_idx, tier_slots, LARGE_POOL_SLOTS, SIZED_POOLS, SMALL_POOL_SLOTS};

/// A pool of fixed-capacity buffers classified into size tiers.
///
/// Tier `i` serves capacities in `(1024 * 2^i, 1024 * 2^(i+1)]`; everything
/// smaller than the first tier lands in a small-buffer queue and everything
/// larger than the last tier in a large-buffer queue.
///
/// A request scans its target tier and the tiers above it. When a pooled
/// buffer is larger than requested and the slack is at least one tier wide,
/// the buffer is split: the caller receives the prefix and the remainder is
/// parked back into its own tier through a weak handle. Returning the prefix
/// later restores the full allocation when no other slice of it survives.
///
/// Every operation is non-blocking; cache misses simply allocate.
///
/// # Examples
///
/// ```
/// use bytebale::SizedPool;
///
/// let pool = SizedPool::new();
/// let buf = pool.get_sized(8192);
/// assert_eq!(buf.len(), 8192);
/// pool.put(buf);
/// ```
#[derive(Debug)]
pub struct SizedPool {
    tiers: [Tier; SIZED_POOLS],
    small: Tier,
    large: Tier,
    min: usize,
    max: usize,
    stats: Arc<PoolStats>,
}

impl SizedPool {
    /// Creates a new pool with empty tiers.
    ///
    /// When the `BYTEBALE_POOL_STATS` environment variable is set, a
    /// background thread periodically logs this pool's counters.
    #[must_use]
    pub fn new() -> Self {
        let stats = Arc::new(PoolStats::default());
        stats::maybe_spawn_reporter("sized", &stats);

        Self {
            tiers: std::array::from_fn(|i| Tier::new(tier_slots(i))),
            small: Tier::new(SMALL_POOL_SLOTS),
            large: Tier::new(LARGE_POOL_SLOTS),
            min: alloc_size(0),
            max: alloc_size(SIZED_POOLS - 1),
            stats,
        }
    }

    /// Returns a buffer of exactly `size` bytes, with capacity at least
    /// `size`.
    ///
    /// A request of zero bytes returns an empty buffer.
    #[must_use]
    pub fn get_sized(&self, size: usize) -> Buf {
        if size < self.min {
            return self.pull_or_grow(&self.small, size);
        }
        if size > self.max {
            return self.pull_or_grow(&self.large, size);
        }

        let target = pool_idx(size);
        for idx in target..SIZED_POOLS {
            while let Some((chunk, offset, cap)) = self.tiers[idx].pop(&self.stats) {
                if cap < size {
                    // Stale slot too small for this request; repark it where
                    // it belongs and move on to the next tier.
                    self.tier_for(cap)
                        .push(Parked::strong(chunk, offset, cap), &self.stats);
                    break;
                }

                self.stats.add_reused(size);

                let remaining = cap - size;
                if remaining >= self.min {
                    // Park the tail for reuse and hand out the prefix.
                    self.park_remainder(&chunk, offset + size, remaining);
                    return Buf::from_parts(chunk, offset, size, size);
                }
                return Buf::from_parts(chunk, offset, size, cap);
            }
        }

        // Cache miss. Allocate at the exact tier capacity so the buffer lands
        // back in the intended tier when released, avoiding misplacement in a
        // smaller tier.
        let capacity = alloc_size(target);
        self.stats.add_non_pooled(capacity);
        Buf::from_parts(Chunk::allocate(capacity), 0, size, capacity)
    }

    /// Returns a buffer to the pool.
    ///
    /// The buffer is classified by its full capacity: a split prefix whose
    /// sibling slices are all gone is restored to the capacity of the
    /// original allocation first. If the destination tier is full the buffer
    /// is dropped and the dropped counter advances; the call never blocks.
    pub fn put(&self, buf: Buf) {
        let (chunk, mut offset, mut cap) = buf.into_parts();

        // Sole survivor: no other slice of this chunk exists anywhere (no
        // strong holder, no parked remainder), so the whole allocation can
        // return to its original tier.
        if Arc::strong_count(&chunk) == 1 && Arc::weak_count(&chunk) == 0 {
            offset = 0;
            cap = chunk.capacity();
        }

        self.tier_for(cap)
            .push(Parked::strong(chunk, offset, cap), &self.stats);
    }

    /// Returns a snapshot of this pool's counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Small and large tiers have no size-class guarantee, so a pooled buffer
    /// may turn out too small; in that case it is dropped and a fresh buffer
    /// is allocated.
    fn pull_or_grow(&self, tier: &Tier, size: usize) -> Buf {
        if let Some((chunk, offset, cap)) = tier.pop(&self.stats) {
            if cap < size {
                self.stats.add_dropped(cap);
                self.stats.add_non_pooled(size);
                return Buf::from_parts(Chunk::allocate(size), 0, size, size);
            }
            self.stats.add_reused(cap);
            return Buf::from_parts(chunk, offset, size, cap);
        }

        self.stats.add_non_pooled(size);
        Buf::from_parts(Chunk::allocate(size), 0, size, size)
    }

    fn park_remainder(&self, chunk: &Arc<Chunk>, offset: usize, cap: usize) {
        if self
            .tier_for(cap)
            .push(Parked::weak(chunk, offset, cap), &self.stats)
        {
            self.stats.add_reused_remaining(cap);
        }
    }

    fn tier_for(&self, cap: usize) -> &Tier {
        if cap < self.min {
            return &self.small;
        }
        if cap <= self.max {
            let mut idx = pool_idx(cap);
            // e.g. cap=3000 maps to the 4096 tier, but cannot serve a 4096
            // request, so it goes one tier down. The `cap < self.min` check
            // has already failed, so idx > 0 whenever this triggers.
            if cap < alloc_size(idx) {
                idx -= 1;
            }
            return &self.tiers[idx];
        }
        &self.large
    }
}

impl Default for SizedPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(SizedPool: Send, Sync);

    #[test]
    fn get_sized_len_and_capacity() {
        let pool = SizedPool::new();
        for size in [0, 1, 100, 2048, 4096, 8192, 100_000, 3 * 1024 * 1024] {
            let buf = pool.get_sized(size);
            assert_eq!(buf.len(), size);
            assert!(buf.capacity() >= size);
        }
    }

    #[test]
    fn exact_match_reuses_memory() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(8192);
        let ptr = buf.as_ptr();
        pool.put(buf);

        let buf = pool.get_sized(8192);
        assert_eq!(buf.as_ptr(), ptr);
        assert_eq!(pool.stats().reused.count, 1);
    }

    #[test]
    fn split_yields_adjacent_halves() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(8192);
        let base = buf.as_ptr();
        pool.put(buf);

        let front = pool.get_sized(4096);
        let tail = pool.get_sized(4096);

        assert_eq!(front.as_ptr(), base);
        // SAFETY: Only computing an address for comparison.
        assert_eq!(tail.as_ptr(), unsafe { base.add(4096) });
    }

    #[test]
    fn small_remainder_is_not_split() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(8192);
        pool.put(buf);

        // The slack (1024) is below the smallest tier size, so the whole
        // buffer is handed out.
        let buf = pool.get_sized(7168);
        assert_eq!(buf.len(), 7168);
        assert_eq!(buf.capacity(), 8192);
        assert_eq!(pool.stats().reused_remaining.count, 0);
    }

    #[test]
    fn split_prefix_restores_full_capacity_when_alone() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(8192);
        let base = buf.as_ptr();
        pool.put(buf);

        // Split off a 6144-byte prefix; the 2048-byte remainder is parked.
        let front = pool.get_sized(6144);
        assert_eq!(front.capacity(), 6144);

        // Consume and drop the remainder so the prefix becomes the only
        // surviving slice.
        let tail = pool.get_sized(2048);
        drop(tail);

        pool.put(front);

        // The full allocation is available again.
        let buf = pool.get_sized(8192);
        assert_eq!(buf.as_ptr(), base);
        assert_eq!(buf.capacity(), 8192);
    }

    #[test]
    fn parked_remainder_blocks_restore() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(8192);
        pool.put(buf);

        let front = pool.get_sized(4096);
        // The remainder is still parked, so returning the prefix must not
        // resurrect the full range.
        pool.put(front);

        let a = pool.get_sized(4096);
        let b = pool.get_sized(4096);
        assert_eq!(pool.stats().non_pooled.count, 1, "both halves reused");
        assert_ne!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn reclaimed_remainder_allocates_fresh() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(8192);
        pool.put(buf);

        let front = pool.get_sized(4096);
        // Dropping the prefix without returning it releases the allocation;
        // the parked remainder slot is now dead.
        drop(front);

        let buf = pool.get_sized(4096);
        assert_eq!(buf.len(), 4096);

        let stats = pool.stats();
        assert_eq!(stats.reclaimed.count, 1);
        assert_eq!(stats.reclaimed.bytes, 4096);
        assert_eq!(stats.non_pooled.count, 2);
    }

    #[test]
    fn full_tier_drops_put() {
        let pool = SizedPool::new();

        // Tier 5 (64 KiB .. 128 KiB] holds 8 slots.
        let size = alloc_size(5);
        let bufs: Vec<_> = (0..9).map(|_| pool.get_sized(size)).collect();
        for buf in bufs {
            pool.put(buf);
        }

        let stats = pool.stats();
        assert_eq!(stats.dropped.count, 1);
        assert_eq!(stats.dropped.bytes, size as u64);
    }

    #[test]
    fn small_buffers_bypass_sized_tiers() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(100);
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.capacity(), 100);
        let ptr = buf.as_ptr();
        pool.put(buf);

        // A smaller request reuses the pooled small buffer.
        let buf = pool.get_sized(50);
        assert_eq!(buf.as_ptr(), ptr);
        assert_eq!(buf.len(), 50);
        assert_eq!(buf.capacity(), 100);
    }

    #[test]
    fn small_buffer_too_small_is_dropped() {
        let pool = SizedPool::new();

        let buf = pool.get_sized(100);
        pool.put(buf);

        let buf = pool.get_sized(200);
        assert_eq!(buf.len(), 200);

        let stats = pool.stats();
        assert_eq!(stats.dropped.count, 1);
        assert_eq!(stats.dropped.bytes, 100);
    }

    #[test]
    fn large_buffers_use_large_tier() {
        let pool = SizedPool::new();
        let size = alloc_size(SIZED_POOLS - 1) + 1;

        let buf = pool.get_sized(size);
        assert_eq!(buf.len(), size);
        let ptr = buf.as_ptr();
        pool.put(buf);

        let buf = pool.get_sized(size);
        assert_eq!(buf.as_ptr(), ptr);
    }

    #[test]
    fn zero_sized_request() {
        let pool = SizedPool::new();
        let buf = pool.get_sized(0);
        assert!(buf.is_empty());
    }

    #[test]
    fn misses_scan_higher_tiers() {
        let pool = SizedPool::new();

        // Park an 16 KiB buffer, then request 4 KiB: tier 1 is empty so the
        // scan reaches tier 3 and splits.
        let buf = pool.get_sized(16_384);
        let base = buf.as_ptr();
        pool.put(buf);

        let front = pool.get_sized(4096);
        assert_eq!(front.as_ptr(), base);
        assert_eq!(pool.stats().reused_remaining.count, 1);
    }
}
