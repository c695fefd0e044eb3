// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use event_listener::{Event, Listener};

/// A concurrent set with counter semantics: waiters block until the set
/// drains to empty.
///
/// Used by tasks to track pending children and pending callbacks. Elements
/// are added and removed from arbitrary threads; `wait*` completes as soon as
/// the live count reaches zero.
#[derive(Debug, Default)]
pub struct Dependencies<T: Eq + Hash + Clone> {
    m: DashMap<T, ()>,
    count: AtomicI64,
    drained: Event,
}

impl<T: Eq + Hash + Clone> Dependencies<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            m: DashMap::new(),
            count: AtomicI64::new(0),
            drained: Event::new(),
        }
    }

    /// Adds an element; duplicates are ignored.
    pub fn add(&self, ele: T) {
        if self.m.insert(ele, ()).is_none() {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Removes an element, waking waiters if the set drained.
    pub fn delete(&self, ele: &T) {
        if self.m.remove(ele).is_some() && self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify(usize::MAX);
        }
    }

    /// Returns the number of live elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst).max(0) as usize
    }

    /// Returns `true` if no elements are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks until the set is empty.
    pub fn wait(&self) {
        loop {
            if self.is_empty() {
                return;
            }
            let listener = self.drained.listen();
            if self.is_empty() {
                return;
            }
            listener.wait();
        }
    }

    /// Blocks until the set is empty or the deadline passes. Returns `true`
    /// if the set drained.
    pub fn wait_deadline(&self, deadline: Instant) -> bool {
        loop {
            if self.is_empty() {
                return true;
            }
            let listener = self.drained.listen();
            if self.is_empty() {
                return true;
            }
            if listener.wait_deadline(deadline).is_none() && Instant::now() >= deadline {
                return self.is_empty();
            }
        }
    }

    /// Returns a point-in-time copy of the live elements.
    ///
    /// Iteration never holds internal locks, so elements may be added or
    /// removed while the copy is being consumed.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.m.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn add_delete_counts() {
        let deps = Dependencies::new();
        deps.add(1);
        deps.add(2);
        deps.add(2); // duplicate ignored
        assert_eq!(deps.len(), 2);

        deps.delete(&1);
        assert_eq!(deps.len(), 1);
        deps.delete(&1); // absent ignored
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn wait_returns_immediately_when_empty() {
        let deps: Dependencies<u32> = Dependencies::new();
        deps.wait();
        assert!(deps.wait_deadline(Instant::now()));
    }

    #[test]
    fn wait_unblocks_on_drain() {
        let deps = Arc::new(Dependencies::new());
        deps.add("a");
        deps.add("b");

        let waiter = {
            let deps = Arc::clone(&deps);
            thread::spawn(move || deps.wait())
        };

        thread::sleep(Duration::from_millis(20));
        deps.delete(&"a");
        deps.delete(&"b");

        waiter.join().unwrap();
    }

    #[test]
    fn wait_deadline_times_out() {
        let deps = Dependencies::new();
        deps.add(1);

        let start = Instant::now();
        let drained = deps.wait_deadline(Instant::now() + Duration::from_millis(50));
        assert!(!drained);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn snapshot_copies_elements() {
        let deps = Dependencies::new();
        deps.add(1);
        deps.add(2);
        let mut snap = deps.snapshot();
        snap.sort_unstable();
        assert_eq!(snap, vec![1, 2]);
    }
}
