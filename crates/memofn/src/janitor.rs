// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, tick, Receiver, Sender};
use parking_lot::Mutex;

/// Maximum number of registered states; exceeding it is a fail-fast panic.
pub(crate) const MAX_STATES: usize = 32;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// A cache state the janitor can trim. `cleanup` must be concurrency-safe.
pub(crate) trait CleanupState: Send + Sync + 'static {
    fn cleanup(&self);
}

struct Slot {
    state: Arc<dyn CleanupState>,
    cleanup_interval: Duration,
    last_cleanup: Mutex<Option<Instant>>,
    pending: AtomicBool,
}

struct Inner {
    slots: [OnceLock<Arc<Slot>>; MAX_STATES],
    count: AtomicUsize,
}

impl Inner {
    fn slot(&self, idx: usize) -> &Arc<Slot> {
        assert!(
            idx < self.count.load(Ordering::SeqCst).min(MAX_STATES),
            "invalid janitor state index: {idx}"
        );
        self.slots[idx].get().expect("registered slot is initialized")
    }

    fn cleanup_all(&self) {
        let count = self.count.load(Ordering::SeqCst).min(MAX_STATES);
        for idx in 0..count {
            let Some(slot) = self.slots[idx].get() else {
                continue;
            };
            if slot
                .pending
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // A signal-driven cleanup is in flight; it covers this round.
                continue;
            }
            run_throttled(slot);
            slot.pending.store(false, Ordering::SeqCst);
        }
    }
}

/// Trims registered cache states from a background thread.
///
/// The thread ticks once per second, sweeping all states, and additionally
/// services targeted cleanup signals. Per-state minimum intervals throttle
/// how often any one state is actually cleaned.
pub(crate) struct Janitor {
    inner: Arc<Inner>,
    tx: Sender<usize>,
}

impl Janitor {
    fn start() -> Self {
        let (tx, rx) = bounded(MAX_STATES);
        let inner = Arc::new(Inner {
            slots: [const { OnceLock::new() }; MAX_STATES],
            count: AtomicUsize::new(0),
        });

        let loop_inner = Arc::clone(&inner);
        thread::Builder::new()
            .name("memofn-janitor".into())
            .spawn(move || run_loop(&loop_inner, rx))
            .expect("failed to spawn janitor thread");

        Self { inner, tx }
    }

    /// Registers a state and returns its index. States cannot be removed.
    ///
    /// The interval is the minimum time between cleanups of this state and
    /// is clamped to at least the tick period.
    ///
    /// # Panics
    ///
    /// Panics when more than [`MAX_STATES`] states are registered.
    pub(crate) fn add(&self, state: Arc<dyn CleanupState>, cleanup_interval: Duration) -> usize {
        let idx = self.inner.count.fetch_add(1, Ordering::SeqCst);
        assert!(idx < MAX_STATES, "too many janitor states: {idx}");

        let slot = Arc::new(Slot {
            state,
            cleanup_interval: cleanup_interval.max(TICK_PERIOD),
            last_cleanup: Mutex::new(None),
            pending: AtomicBool::new(false),
        });
        self.inner.slots[idx]
            .set(slot)
            .unwrap_or_else(|_| unreachable!("each slot index is claimed once"));
        tracing::debug!(idx, "janitor state registered");
        idx
    }

    /// Requests an out-of-band cleanup of one state. Duplicate triggers
    /// while one is pending are coalesced.
    ///
    /// # Panics
    ///
    /// Panics on an index that was never returned by [`add`][Self::add].
    pub(crate) fn trigger(&self, idx: usize) {
        let slot = self.inner.slot(idx);
        if slot
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.tx.try_send(idx);
        }
    }

    #[cfg(test)]
    fn cleanup_all(&self) {
        self.inner.cleanup_all();
    }
}

fn run_loop(inner: &Arc<Inner>, rx: Receiver<usize>) {
    let ticker = tick(TICK_PERIOD);
    loop {
        crossbeam_channel::select! {
            recv(ticker) -> _ => inner.cleanup_all(),
            recv(rx) -> msg => {
                let Ok(idx) = msg else { return };
                let slot = Arc::clone(inner.slot(idx));
                run_throttled(&slot);
                slot.pending.store(false, Ordering::SeqCst);
            }
        }
    }
}

fn run_throttled(slot: &Arc<Slot>) {
    let mut last = slot.last_cleanup.lock();
    if let Some(prev) = *last {
        if prev.elapsed() < slot.cleanup_interval {
            // Cleaned recently; skip this round.
            return;
        }
    }
    slot.state.cleanup();
    *last = Some(Instant::now());
}

/// The process-wide janitor shared by every keyed cache with an entry bound.
pub(crate) fn janitor() -> &'static Janitor {
    static JANITOR: LazyLock<Janitor> = LazyLock::new(Janitor::start);
    &JANITOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockState {
        cleanups: AtomicUsize,
    }

    impl CleanupState for MockState {
        fn cleanup(&self) {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_assigns_sequential_indices() {
        let janitor = Janitor::start();
        let first = janitor.add(Arc::new(MockState::default()), Duration::from_secs(1));
        let second = janitor.add(Arc::new(MockState::default()), Duration::from_secs(1));
        assert_eq!((first, second), (0, 1));
    }

    #[test]
    #[should_panic(expected = "too many janitor states")]
    fn add_panics_on_overflow() {
        let janitor = Janitor::start();
        for _ in 0..=MAX_STATES {
            janitor.add(Arc::new(MockState::default()), Duration::from_secs(1));
        }
    }

    #[test]
    #[should_panic(expected = "invalid janitor state index")]
    fn trigger_panics_on_unknown_index() {
        let janitor = Janitor::start();
        janitor.trigger(7);
    }

    #[test]
    fn trigger_runs_cleanup() {
        let janitor = Janitor::start();
        let state = Arc::new(MockState::default());
        let idx = janitor.add(Arc::clone(&state) as Arc<dyn CleanupState>, Duration::ZERO);

        janitor.trigger(idx);

        let deadline = Instant::now() + Duration::from_secs(2);
        while state.cleanups.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(state.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_interval_throttles() {
        let janitor = Janitor::start();
        let state = Arc::new(MockState::default());
        let idx = janitor.add(
            Arc::clone(&state) as Arc<dyn CleanupState>,
            Duration::from_secs(60),
        );

        janitor.trigger(idx);
        let deadline = Instant::now() + Duration::from_secs(2);
        while state.cleanups.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        // Within the interval, both sweeps and triggers are skipped.
        janitor.cleanup_all();
        janitor.trigger(idx);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(state.cleanups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cleanup_all_sweeps_every_state() {
        let janitor = Janitor::start();
        let states: Vec<_> = (0..3).map(|_| Arc::new(MockState::default())).collect();
        for state in &states {
            janitor.add(Arc::clone(state) as Arc<dyn CleanupState>, Duration::ZERO);
        }

        janitor.cleanup_all();
        for state in &states {
            assert_eq!(state.cleanups.load(Ordering::SeqCst), 1);
        }
    }
}
