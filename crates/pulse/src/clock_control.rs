// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

use crate::Clock;

/// Controls the flow of time in tests.
///
/// This is useful for testing time-sensitive code without having to wait for
/// real time to pass. `ClockControl` is available when the `test-util` feature
/// is enabled.
///
/// To create a [`Clock`] from `ClockControl`, use the
/// [`ClockControl::to_clock`] method. All clocks created from (or cloned off)
/// the same control observe the same controlled time.
///
/// # Examples
///
/// ```
/// # #[cfg(feature = "test-util")] {
/// use std::time::Duration;
///
/// use pulse::ClockControl;
///
/// let control = ClockControl::new();
/// let clock = control.to_clock();
///
/// let before = clock.instant();
/// control.advance(Duration::from_secs(1));
/// assert_eq!(clock.instant() - before, Duration::from_secs(1));
/// # }
/// ```
///
/// # Production code and `ClockControl`
///
/// You should never enable the `test-util` feature or use `ClockControl` in
/// production code. Always ensure that the `test-util` feature is only
/// enabled for `dev-dependencies`.
#[derive(Debug, Clone, Default)]
pub struct ClockControl {
    /// Time control is shared across threads, so the state sits behind a
    /// mutex to keep every clone consistent.
    state: Arc<Mutex<ControlState>>,
}

impl ClockControl {
    /// Creates a new `ClockControl` with time frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a [`Clock`] that reads this control's time.
    #[must_use]
    pub fn to_clock(&self) -> Clock {
        Clock::controlled(Arc::clone(&self.state))
    }

    /// Advances the controlled time by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.state.lock().offset += duration;
    }
}

#[derive(Debug)]
pub(crate) struct ControlState {
    base_instant: Instant,
    base_system: SystemTime,
    offset: Duration,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            base_instant: Instant::now(),
            base_system: SystemTime::now(),
            offset: Duration::ZERO,
        }
    }
}

impl ControlState {
    pub(crate) fn instant(&self) -> Instant {
        self.base_instant + self.offset
    }

    pub(crate) fn system_time(&self) -> SystemTime {
        self.base_system + self.offset
    }
}
