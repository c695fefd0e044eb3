// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Tiered byte-buffer pools that recycle allocations across size classes.
//!
//! This crate provides two pools:
//!
//! - [`SizedPool`] - Hands out fixed-capacity [`Buf`] buffers classified into
//!   power-of-two size tiers. Oversized pooled buffers are split: the caller
//!   receives the requested prefix and the remainder is parked back into its
//!   own tier for later reuse.
//! - [`UnsizedPool`] - Hands out growable `Vec<u8>` buffers with a minimum
//!   starting capacity.
//!
//! # Reclamation
//!
//! Tier slots hold buffers in one of two ways. Buffers returned through
//! [`SizedPool::put`] transfer ownership into the tier; retention is bounded
//! by the fixed tier queue lengths. Split remainders are parked through a
//! weak handle instead: once the caller drops the last strong reference to
//! the parent allocation, the remainder is reclaimed automatically and a
//! later pop simply skips the dead slot. The pool never returns memory that
//! has been reclaimed and never causes unbounded retention.
//!
//! All operations are non-blocking and safe from parallel callers: a `get`
//! polls lock-free queues and falls back to a fresh allocation, and a `put`
//! into a full tier drops the buffer rather than blocking.
//!
//! # Statistics
//!
//! Every pool maintains relaxed atomic counters (reuse hits, non-pooled
//! allocations, dropped puts, parked remainders, weak-handle reclamations)
//! exposed via `stats()`. Setting the `BYTEBALE_POOL_STATS` environment
//! variable additionally starts a background reporter that logs the counters
//! of newly created pools every few seconds.
//!
//! # Examples
//!
//! ```
//! use bytebale::SizedPool;
//!
//! let pool = SizedPool::new();
//!
//! let mut buf = pool.get_sized(4096);
//! assert_eq!(buf.len(), 4096);
//! buf[..5].copy_from_slice(b"hello");
//!
//! pool.put(buf);
//!
//! // The next request of the same size reuses the allocation.
//! let buf = pool.get_sized(4096);
//! assert_eq!(&buf[..5], b"hello");
//! ```

mod buf;
mod sized;
mod stats;
mod tier;
mod unsized_pool;

pub use buf::Buf;
pub use sized::SizedPool;
pub use stats::{Counter, StatsSnapshot};
pub use unsized_pool::UnsizedPool;

const KB: usize = 1024;
const MB: usize = 1024 * KB;

/// Total memory budget of the unsized pool.
pub const UNSIZED_POOL_LIMIT: usize = 16 * MB;

/// Minimum capacity of buffers handed out by the unsized pool.
pub const MIN_ALLOC_SIZE: usize = 4 * KB;

/// Number of slots in the unsized pool queue.
pub const UNSIZED_POOL_SIZE: usize = UNSIZED_POOL_LIMIT / MIN_ALLOC_SIZE;

/// Number of sized tiers.
pub const SIZED_POOLS: usize = 11;

const SMALL_POOL_SLOTS: usize = UNSIZED_POOL_SIZE;
const LARGE_POOL_SLOTS: usize = 16;

/// Returns the allocation capacity of tier `idx`.
pub(crate) fn alloc_size(idx: usize) -> usize {
    1024 * (2 << idx)
}

/// Returns the index of the tier that guarantees a capacity greater than or
/// equal to the given size.
pub(crate) fn pool_idx(size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let bit_len = usize::BITS - (size - 1).leading_zeros();
    bit_len.saturating_sub(11).min(SIZED_POOLS as u32 - 1) as usize
}

/// Returns the queue length for a given tier index.
///
/// Smaller buffers (lower idx) are used more frequently, so they get longer
/// queues.
pub(crate) fn tier_slots(idx: usize) -> usize {
    (256 >> idx).max(8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_idx_boundaries() {
        let cases = [
            (0, 0),
            (1, 0),
            (100, 0),
            (2048, 0),
            (2049, 1),
            (4096, 1),
            (4097, 2),
            (8192, 2),
            (65_536, 5),
            (1024 * 1024, 9),
            (2 * 1024 * 1024, 10),
            (4 * 1024 * 1024, 10),
            (usize::MAX, 10),
        ];
        for (size, want) in cases {
            assert_eq!(pool_idx(size), want, "pool_idx({size})");
        }
    }

    #[test]
    fn alloc_size_matches_pool_idx() {
        for idx in 0..SIZED_POOLS {
            // alloc_size(idx) is the largest size that maps to idx.
            assert_eq!(pool_idx(alloc_size(idx)), idx);
            if idx < SIZED_POOLS - 1 {
                assert_eq!(pool_idx(alloc_size(idx) + 1), idx + 1);
            }
        }
    }

    #[test]
    fn tier_slots_floor() {
        assert_eq!(tier_slots(0), 256);
        assert_eq!(tier_slots(1), 128);
        assert_eq!(tier_slots(5), 8);
        assert_eq!(tier_slots(10), 8);
    }
}
