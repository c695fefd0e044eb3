// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use lifetree::Context;
use parking_lot::Mutex;
use pulse::Clock;

use crate::retry::run_with_retries;
use crate::{Backoff, Result};

type ContextFn<T> = Arc<dyn Fn(&Context) -> Result<T> + Send + Sync>;

/// Builds a memoising wrapper around a context function with a single
/// result.
///
/// By default the result is cached forever and failures are not retried;
/// chain `with_*` calls to configure a TTL and a retry policy.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use lifetree::testing::isolated_root;
/// use memofn::CachedFnBuilder;
///
/// let ctx = isolated_root("docs").context();
/// let cached = CachedFnBuilder::new(|_ctx| Ok(21 * 2))
///     .with_ttl(Duration::from_secs(30))
///     .build();
///
/// assert_eq!(cached.call(&ctx).unwrap(), 42);
/// ```
pub struct CachedFnBuilder<T> {
    f: ContextFn<T>,
    retries: u32,
    backoff: Backoff,
    ttl: Duration,
    clock: Clock,
}

impl<T: Clone + Send + Sync + 'static> CachedFnBuilder<T> {
    /// Starts a builder around the producing function.
    pub fn new(f: impl Fn(&Context) -> Result<T> + Send + Sync + 'static) -> Self {
        Self {
            f: Arc::new(f),
            retries: 0,
            backoff: Backoff::zero(),
            ttl: Duration::ZERO,
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

    /// Expires the cached result `ttl` after it was stored. Zero (the
    /// default) never expires.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Reads expiry time from the given clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the callable cache.
    #[must_use]
    pub fn build(self) -> CachedFn<T> {
        CachedFn {
            state: Arc::new(SingleState {
                f: self.f,
                retries: self.retries,
                ttl: self.ttl,
                clock: self.clock,
                backoff: Mutex::new(self.backoff),
                cached: ArcSwapOption::empty(),
                flight: Mutex::new(()),
            }),
        }
    }
}

/// A memoised context function with a single result.
///
/// Cloning is cheap; every clone shares the cached value. Concurrent callers
/// are single-flight: one computes while the rest block and receive the same
/// outcome. Both successes and failures are cached subject to the TTL; a
/// call aborted by cancellation leaves the cache untouched.
#[derive(Clone)]
pub struct CachedFn<T> {
    state: Arc<SingleState<T>>,
}

struct SingleState<T> {
    f: ContextFn<T>,
    retries: u32,
    ttl: Duration,
    clock: Clock,
    backoff: Mutex<Backoff>,
    cached: ArcSwapOption<CachedValue<T>>,
    flight: Mutex<()>,
}

struct CachedValue<T> {
    result: Result<T>,
    expire_at: Option<Instant>,
}

impl<T: Clone + Send + Sync + 'static> CachedFn<T> {
    /// Returns the cached result, computing (and retrying) it if absent or
    /// expired.
    ///
    /// # Errors
    ///
    /// Returns the producing function's error (cached subject to TTL), or
    /// [`Error::Cancelled`][crate::Error::Cancelled] when the context's task
    /// finished mid-retry.
    pub fn call(&self, ctx: &Context) -> Result<T> {
        let state = &*self.state;

        // Fast path: lock-free read of a fresh cached value.
        if let Some(value) = state.cached.load_full() {
            if !state.expired(&value) {
                return value.result.clone();
            }
        }

        let _flight = state.flight.lock();
        if let Some(value) = state.cached.load_full() {
            if !state.expired(&value) {
                return value.result.clone();
            }
        }

        let result = run_with_retries(ctx, state.retries, &state.backoff, || (state.f)(ctx))?;

        let expire_at = (state.ttl > Duration::ZERO).then(|| state.clock.instant() + state.ttl);
        state.cached.store(Some(Arc::new(CachedValue {
            result: result.clone(),
            expire_at,
        })));
        result
    }
}

impl<T> SingleState<T> {
    fn expired(&self, value: &CachedValue<T>) -> bool {
        match value.expire_at {
            None => false,
            Some(expire_at) => self.clock.instant() > expire_at,
        }
    }
}
