// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::hash::Hash;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lifetree::Context;
use parking_lot::Mutex;
use pulse::Clock;

use crate::janitor::{janitor, CleanupState};
use crate::mru::{MruList, SlotId};
use crate::retry::run_with_retries;
use crate::{Backoff, Result};

type KeyedContextFn<T, K> = Arc<dyn Fn(&Context, &K) -> Result<T> + Send + Sync>;

/// Builds a memoising wrapper around a context function with one result per
/// key.
///
/// Like [`CachedFnBuilder`][crate::CachedFnBuilder], plus an optional
/// `max_entries` bound: when set, the cache keeps a recency list and the
/// process janitor trims the least-recently-used keys whenever the map
/// outgrows the bound.
///
/// # Examples
///
/// ```
/// use lifetree::testing::isolated_root;
/// use memofn::CachedKeyFnBuilder;
///
/// let ctx = isolated_root("docs").context();
/// let cached = CachedKeyFnBuilder::new(|_ctx, key: &u32| Ok(key * 10)).build();
///
/// assert_eq!(cached.call(&ctx, &3).unwrap(), 30);
/// ```
pub struct CachedKeyFnBuilder<T, K> {
    f: KeyedContextFn<T, K>,
    retries: u32,
    backoff: Backoff,
    ttl: Duration,
    max_entries: usize,
    cleanup_interval: Duration,
    clock: Clock,
}

impl<T, K> CachedKeyFnBuilder<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Starts a builder around the producing function.
    pub fn new(f: impl Fn(&Context, &K) -> Result<T> + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            retries: 0,
            backoff: Backoff::zero(),
            ttl: Duration::ZERO,
            max_entries: 0,
            cleanup_interval: Duration::from_secs(1),
            clock: Clock::new(),
        }
    }

    /// Retries failures up to `retries` times with exponential backoff.
    #[must_use]
    pub fn with_retries_exponential_backoff(mut self, retries: u32) -> Self {
        self.retries = retries;
        self.backoff = Backoff::exponential();
        self
    }

    /// Retries failures up to `retries` times with a constant wait.
    #[must_use]
    pub fn with_retries_constant_backoff(mut self, retries: u32, interval: Duration) -> Self {
        self.retries = retries;
        self.backoff = Backoff::constant(interval);
        self
    }

    /// Retries failures up to `retries` times without waiting.
    #[must_use]
    pub fn with_retries_zero_backoff(mut self, retries: u32) -> Self {
        self.retries = retries;
        self.backoff = Backoff::zero();
        self
    }

    /// Expires cached entries `ttl` after they were stored. Zero (the
    /// default) never expires.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Bounds the cache to roughly `max_entries` keys, evicting the least
    /// recently used ones from the janitor. Zero (the default) disables
    /// eviction.
    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the minimum time between janitor cleanups of this cache
    /// (clamped to at least one second).
    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Reads expiry time from the given clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the callable cache, registering it with the process janitor
    /// when an entry bound is configured.
    ///
    /// # Panics
    ///
    /// Panics if the janitor already holds
    /// [`MAX_JANITOR_STATES`][crate::MAX_JANITOR_STATES] registered caches.
    #[must_use]
    pub fn build(self) -> CachedKeyFn<T, K> {
        let state = Arc::new(KeyedState {
            f: self.f,
            retries: self.retries,
            ttl: self.ttl,
            max_entries: self.max_entries,
            clock: self.clock,
            backoff: Mutex::new(self.backoff),
            entries: DashMap::new(),
            mru: Mutex::new(MruList::new()),
            janitor_idx: OnceLock::new(),
        });

        if self.max_entries > 0 {
            let idx = janitor().add(
                Arc::clone(&state) as Arc<dyn CleanupState>,
                self.cleanup_interval,
            );
            let _ = state.janitor_idx.set(idx);
        }

        CachedKeyFn { state }
    }
}

/// A memoised context function with one result per key.
///
/// Callers of the same key are single-flight: one computes while the rest
/// block on the entry and receive the same outcome. Distinct keys proceed
/// independently. Both successes and failures are cached subject to the TTL;
/// a call aborted by cancellation leaves the entry untouched.
#[derive(Clone)]
pub struct CachedKeyFn<T, K> {
    state: Arc<KeyedState<T, K>>,
}

struct KeyedState<T, K> {
    f: KeyedContextFn<T, K>,
    retries: u32,
    ttl: Duration,
    max_entries: usize,
    clock: Clock,
    backoff: Mutex<Backoff>,
    entries: DashMap<K, Arc<CacheEntry<T>>>,
    mru: Mutex<MruList<K>>,
    janitor_idx: OnceLock<usize>,
}

struct CacheEntry<T> {
    slot: Mutex<EntrySlot<T>>,
}

struct EntrySlot<T> {
    value: Option<Result<T>>,
    expire_at: Option<Instant>,
    mru_id: Option<SlotId>,
}

impl<T> Default for CacheEntry<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(EntrySlot {
                value: None,
                expire_at: None,
                mru_id: None,
            }),
        }
    }
}

impl<T, K> CachedKeyFn<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Returns the cached result for `key`, computing (and retrying) it if
    /// absent or expired.
    ///
    /// # Errors
    ///
    /// Returns the producing function's error (cached subject to TTL), or
    /// [`Error::Cancelled`][crate::Error::Cancelled] when the context's task
    /// finished mid-retry.
    pub fn call(&self, ctx: &Context, key: &K) -> Result<T> {
        let state = &*self.state;

        let (entry, loaded) = match state.entries.entry(key.clone()) {
            dashmap::Entry::Occupied(occupied) => (Arc::clone(occupied.get()), true),
            dashmap::Entry::Vacant(vacant) => {
                let entry = Arc::new(CacheEntry::default());
                vacant.insert(Arc::clone(&entry));
                (entry, false)
            }
        };

        let mut slot = entry.slot.lock();

        if loaded && !state.expired(&slot) {
            if let Some(value) = &slot.value {
                let result = value.clone();
                if state.max_entries > 0 {
                    if let Some(id) = slot.mru_id {
                        state.mru.lock().move_to_front(id);
                    }
                }
                return result;
            }
        }

        let mut trigger_cleanup = false;
        if !loaded && state.max_entries > 0 {
            slot.mru_id = Some(state.mru.lock().push_front(key.clone()));
            if state.entries.len() > state.max_entries {
                trigger_cleanup = true;
            }
        }

        let result =
            run_with_retries(ctx, state.retries, &state.backoff, || (state.f)(ctx, key))?;

        slot.value = Some(result.clone());
        slot.expire_at = (state.ttl > Duration::ZERO).then(|| state.clock.instant() + state.ttl);

        // The compute may have taken a while; restore this key's recency.
        if state.max_entries > 0 {
            if let Some(id) = slot.mru_id {
                state.mru.lock().move_to_front(id);
            }
        }
        drop(slot);

        if trigger_cleanup {
            if let Some(&idx) = state.janitor_idx.get() {
                janitor().trigger(idx);
            }
        }

        result
    }

    /// Returns the number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.entries.is_empty()
    }

    /// Returns `true` if a result for `key` is currently cached.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.state.entries.contains_key(key)
    }

    /// Runs the janitor's eviction pass synchronously: drops least-recently
    /// used keys until the cache is back within its bound.
    pub fn run_cleanup(&self) {
        self.state.cleanup();
    }
}

impl<T, K> KeyedState<T, K> {
    fn expired(&self, slot: &EntrySlot<T>) -> bool {
        if self.ttl == Duration::ZERO {
            return false;
        }
        match slot.expire_at {
            None => false,
            Some(expire_at) => self.clock.instant() > expire_at,
        }
    }
}

impl<T, K> CleanupState for KeyedState<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn cleanup(&self) {
        if self.max_entries == 0 {
            return;
        }
        if self.entries.len() <= self.max_entries {
            return;
        }

        let mut mru = self.mru.lock();
        while mru.len() > self.max_entries {
            let Some(key) = mru.pop_back() else {
                break;
            };
            self.entries.remove(&key);
        }
    }
}
