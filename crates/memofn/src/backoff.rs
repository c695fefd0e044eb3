// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use crate::rnd::Rnd;

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MULTIPLIER: f64 = 1.5;
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// A retry wait policy.
///
/// `next()` returns the wait before the following attempt and advances the
/// policy state; `reset()` rewinds it to the initial interval.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use memofn::Backoff;
///
/// let mut backoff = Backoff::constant(Duration::from_millis(100));
/// assert_eq!(backoff.next(), Duration::from_millis(100));
/// assert_eq!(backoff.next(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Exponentially growing intervals with jitter.
    Exponential(ExponentialBackoff),
    /// The same interval before every attempt.
    Constant(Duration),
    /// No waiting between attempts.
    Zero,
}

impl Backoff {
    /// An exponential policy with default parameters (500 ms initial
    /// interval, multiplier 1.5, 60 s cap, randomization 0.5).
    #[must_use]
    pub fn exponential() -> Self {
        Self::Exponential(ExponentialBackoff::new())
    }

    /// A constant policy waiting `interval` before every attempt.
    #[must_use]
    pub fn constant(interval: Duration) -> Self {
        Self::Constant(interval)
    }

    /// A policy that never waits.
    #[must_use]
    pub fn zero() -> Self {
        Self::Zero
    }

    /// Returns the wait before the next attempt and advances the policy.
    pub fn next(&mut self) -> Duration {
        match self {
            Self::Exponential(exponential) => exponential.next(),
            Self::Constant(interval) => *interval,
            Self::Zero => Duration::ZERO,
        }
    }

    /// Rewinds the policy to its initial state.
    pub fn reset(&mut self) {
        if let Self::Exponential(exponential) = self {
            exponential.reset();
        }
    }
}

/// Exponentially growing retry intervals with symmetric jitter.
///
/// Each `next()` samples uniformly from
/// `[current * (1 - r), current * (1 + r)]` where `r` is the randomization
/// factor, then multiplies the current interval by the multiplier, capped at
/// the maximum interval.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    randomization_factor: f64,
    rnd: Rnd,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a policy with the default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
            rnd: Rnd::default(),
            current: DEFAULT_INITIAL_INTERVAL,
        }
    }

    /// Sets the first retry interval.
    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self.current = interval;
        self
    }

    /// Sets the growth factor applied after every attempt.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the interval cap.
    #[must_use]
    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Sets the jitter width as a fraction of the current interval; zero
    /// disables jitter.
    #[must_use]
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    fn next(&mut self) -> Duration {
        let current = self.current.as_secs_f64();
        let delta = self.randomization_factor * current;
        let jittered = (current - delta) + 2.0 * delta * self.rnd.next_f64();

        let next = current * self.multiplier;
        self.current = Duration::try_from_secs_f64(next)
            .unwrap_or(self.max_interval)
            .min(self.max_interval);

        Duration::try_from_secs_f64(jittered.max(0.0)).unwrap_or(self.max_interval)
    }

    fn reset(&mut self) {
        self.current = self.initial_interval;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ExponentialBackoff> for Backoff {
    fn from(exponential: ExponentialBackoff) -> Self {
        Self::Exponential(exponential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_exponential() -> ExponentialBackoff {
        // Rnd 0.5 lands exactly in the middle of the jitter window, so the
        // sequence is the undithered geometric progression.
        ExponentialBackoff::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_millis(500))
            .with_rnd(Rnd::new_fixed(0.5))
    }

    #[test]
    fn constant_and_zero() {
        let mut constant = Backoff::constant(Duration::from_millis(200));
        assert_eq!(constant.next(), Duration::from_millis(200));
        assert_eq!(constant.next(), Duration::from_millis(200));

        let mut zero = Backoff::zero();
        assert_eq!(zero.next(), Duration::ZERO);
    }

    #[test]
    fn exponential_growth_and_cap() {
        let mut backoff = Backoff::from(fixed_exponential());
        assert_eq!(backoff.next(), Duration::from_millis(100));
        assert_eq!(backoff.next(), Duration::from_millis(200));
        assert_eq!(backoff.next(), Duration::from_millis(400));
        // Capped from here on.
        assert_eq!(backoff.next(), Duration::from_millis(500));
        assert_eq!(backoff.next(), Duration::from_millis(500));
    }

    #[test]
    fn reset_rewinds_to_initial() {
        let mut backoff = Backoff::from(fixed_exponential());
        let first = backoff.next();
        let _ = backoff.next();
        backoff.reset();
        assert_eq!(backoff.next(), first);
    }

    #[test]
    fn jitter_stays_in_window() {
        let mut backoff = ExponentialBackoff::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_multiplier(1.0)
            .with_max_interval(Duration::from_secs(10));

        for _ in 0..100 {
            let delay = backoff.next();
            assert!(delay >= Duration::from_millis(500), "delay {delay:?}");
            assert!(delay <= Duration::from_millis(1500), "delay {delay:?}");
        }
    }

    #[test]
    fn low_and_high_jitter_bounds() {
        let mut low = fixed_exponential().with_rnd(Rnd::new_fixed(0.0));
        assert_eq!(low.next(), Duration::from_millis(50));

        let mut high = fixed_exponential().with_rnd(Rnd::new_fixed(1.0));
        assert_eq!(high.next(), Duration::from_millis(150));
    }
}
