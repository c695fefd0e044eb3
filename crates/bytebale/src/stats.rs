// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Environment variable that enables the periodic stats reporter for newly
/// created pools.
pub(crate) const STATS_ENV: &str = "BYTEBALE_POOL_STATS";

const REPORT_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct CounterCell {
    count: AtomicU64,
    bytes: AtomicU64,
}

impl CounterCell {
    fn add(&self, bytes: usize) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn read(&self) -> Counter {
        Counter {
            count: self.count.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// An event count and the total bytes it covered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter {
    /// Number of events.
    pub count: u64,
    /// Total bytes across all events.
    pub bytes: u64,
}

/// A point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests satisfied by a fresh allocation.
    pub non_pooled: Counter,
    /// Requests satisfied from a tier.
    pub reused: Counter,
    /// Buffers dropped because their tier was full, or because a pooled
    /// buffer was too small for the request.
    pub dropped: Counter,
    /// Split remainders parked back into a tier.
    pub reused_remaining: Counter,
    /// Weak slots found dead on pop (the allocation was reclaimed).
    pub reclaimed: Counter,
}

/// Relaxed atomic counters shared by all handles of one pool.
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    non_pooled: CounterCell,
    reused: CounterCell,
    dropped: CounterCell,
    reused_remaining: CounterCell,
    reclaimed: CounterCell,
}

impl PoolStats {
    pub(crate) fn add_non_pooled(&self, bytes: usize) {
        self.non_pooled.add(bytes);
    }

    pub(crate) fn add_reused(&self, bytes: usize) {
        self.reused.add(bytes);
    }

    pub(crate) fn add_dropped(&self, bytes: usize) {
        self.dropped.add(bytes);
    }

    pub(crate) fn add_reused_remaining(&self, bytes: usize) {
        self.reused_remaining.add(bytes);
    }

    pub(crate) fn add_reclaimed(&self, bytes: usize) {
        self.reclaimed.add(bytes);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            non_pooled: self.non_pooled.read(),
            reused: self.reused.read(),
            dropped: self.dropped.read(),
            reused_remaining: self.reused_remaining.read(),
            reclaimed: self.reclaimed.read(),
        }
    }
}

fn reporting_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| std::env::var_os(STATS_ENV).is_some_and(|v| v != "0"))
}

/// Starts the periodic reporter thread for a pool when the stats flag is set.
pub(crate) fn maybe_spawn_reporter(name: &'static str, stats: &Arc<PoolStats>) {
    if !reporting_enabled() {
        return;
    }

    let stats = Arc::clone(stats);
    std::thread::Builder::new()
        .name(format!("{name}-stats"))
        .spawn(move || {
            loop {
                std::thread::sleep(REPORT_PERIOD);
                let s = stats.snapshot();
                tracing::info!(
                    pool = name,
                    reused_count = s.reused.count,
                    reused_bytes = s.reused.bytes,
                    dropped_count = s.dropped.count,
                    dropped_bytes = s.dropped.bytes,
                    non_pooled_count = s.non_pooled.count,
                    non_pooled_bytes = s.non_pooled.bytes,
                    reclaimed_count = s.reclaimed.count,
                    reclaimed_bytes = s.reclaimed.bytes,
                    "byte pool stats"
                );
            }
        })
        .expect("failed to spawn stats reporter thread");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = PoolStats::default();
        stats.add_reused(100);
        stats.add_reused(50);
        stats.add_dropped(10);

        let s = stats.snapshot();
        assert_eq!(s.reused, Counter { count: 2, bytes: 150 });
        assert_eq!(s.dropped, Counter { count: 1, bytes: 10 });
        assert_eq!(s.non_pooled, Counter::default());
    }
}
