// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, Instant, SystemTime};

#[cfg(any(feature = "test-util", test))]
use std::sync::Arc;

#[cfg(any(feature = "test-util", test))]
use parking_lot::Mutex;

#[cfg(any(feature = "test-util", test))]
use crate::clock_control::ControlState;
use crate::Stopwatch;

/// Reads the current time.
///
/// The clock is a cheap cloneable handle. In production it reads the system
/// clock with near-zero overhead. In tests, a clock created from
/// `ClockControl` (requires the `test-util` feature) reads manually-controlled
/// time, allowing tests to jump forward instantly instead of sleeping.
///
/// Cloned clocks share state: advancing a controlled clock is observed by
/// every clone.
///
/// # Examples
///
/// ```
/// use pulse::Clock;
///
/// let clock = Clock::new();
/// let t1 = clock.instant();
/// let t2 = clock.instant();
/// assert!(t2 >= t1);
/// ```
#[derive(Debug, Clone)]
pub struct Clock(ClockInner);

#[derive(Debug, Clone)]
enum ClockInner {
    System,
    #[cfg(any(feature = "test-util", test))]
    Controlled(Arc<Mutex<ControlState>>),
}

impl Clock {
    /// Creates a clock that reads the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self(ClockInner::System)
    }

    #[cfg(any(feature = "test-util", test))]
    pub(crate) fn controlled(state: Arc<Mutex<ControlState>>) -> Self {
        Self(ClockInner::Controlled(state))
    }

    /// Returns the current monotonic time.
    ///
    /// For controlled clocks this is the controlled base instant plus
    /// whatever time has been advanced so far.
    #[must_use]
    pub fn instant(&self) -> Instant {
        match &self.0 {
            ClockInner::System => Instant::now(),
            #[cfg(any(feature = "test-util", test))]
            ClockInner::Controlled(state) => state.lock().instant(),
        }
    }

    /// Returns the current absolute time in UTC.
    ///
    /// Absolute time is not monotonic; prefer [`instant()`][Self::instant]
    /// (or a [`Stopwatch`]) for measuring durations.
    #[must_use]
    pub fn system_time(&self) -> SystemTime {
        match &self.0 {
            ClockInner::System => SystemTime::now(),
            #[cfg(any(feature = "test-util", test))]
            ClockInner::Controlled(state) => state.lock().system_time(),
        }
    }

    /// Returns the duration elapsed since `earlier`, saturating to zero if
    /// `earlier` is in the future.
    #[must_use]
    pub fn since(&self, earlier: Instant) -> Duration {
        self.instant().saturating_duration_since(earlier)
    }

    /// Starts a new [`Stopwatch`] measuring elapsed time on this clock.
    #[must_use]
    pub fn stopwatch(&self) -> Stopwatch {
        Stopwatch::new(self)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
