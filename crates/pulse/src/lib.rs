// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Provides primitives to interact with and manipulate machine time.
//!
//! Working with time is notoriously difficult to test and control. This crate
//! provides a [`Clock`] handle that code depends on instead of calling
//! [`Instant::now()`][std::time::Instant::now] directly, making time-sensitive
//! logic portable and testable.
//!
//! # Overview
//!
//! - [`Clock`] - Reads the current time. Cloned clocks share state.
//! - [`Stopwatch`] - Measures elapsed time against a clock.
//! - `ClockControl` - Controls the flow of time. Exposed only when the
//!   `test-util` feature is enabled.
//!
//! # Testing
//!
//! With the `test-util` feature enabled, `ClockControl` allows tests to jump
//! forward in time instantly instead of sleeping:
//!
//! ```toml
//! pulse = { version = "*", features = ["test-util"] }
//! ```
//!
//! Always ensure that the `test-util` feature is only enabled for
//! `dev-dependencies`.

mod clock;
#[cfg(any(feature = "test-util", test))]
mod clock_control;
mod stopwatch;

pub use clock::Clock;
#[cfg(feature = "test-util")]
pub use clock_control::ClockControl;
#[cfg(all(test, not(feature = "test-util")))]
pub(crate) use clock_control::ClockControl;
pub use stopwatch::Stopwatch;
