// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Context-aware function memoisation.
//!
//! This crate builds caching wrappers around functions that take a
//! [`Context`][lifetree::Context] and return a `Result`. Two shapes are
//! supported:
//!
//! - [`CachedFnBuilder`] memoises a single result.
//! - [`CachedKeyFnBuilder`] memoises one result per key, with per-key
//!   single-flight and optional LRU eviction.
//!
//! Both support a TTL (zero means "never expire"), automatic retries with a
//! configurable [`Backoff`] policy, and cooperative cancellation: retry waits
//! abort as soon as the context's task is finished, and a cancelled call
//! never updates the cache.
//!
//! Results are cached whether they succeeded or failed, so a failing
//! dependency is not hammered until the TTL elapses.
//!
//! Keyed caches with a `max_entries` bound register with a process-wide
//! [`Janitor`](#janitor) that trims the least-recently-used keys in the
//! background.
//!
//! # Janitor
//!
//! The janitor is a singleton background thread ticking once per second. It
//! owns up to 32 registered cache states; registering more is a fail-fast
//! panic. Caches outgrowing their bound additionally signal the janitor for
//! an immediate cleanup, with duplicate signals coalesced per state.
//!
//! # Examples
//!
//! ```
//! use lifetree::testing::isolated_root;
//! use memofn::CachedFnBuilder;
//! use std::time::Duration;
//!
//! let ctx = isolated_root("example").context();
//!
//! let cached = CachedFnBuilder::new(|_ctx| Ok(fetch_config()))
//!     .with_ttl(Duration::from_secs(60))
//!     .with_retries_exponential_backoff(3)
//!     .build();
//!
//! let config = cached.call(&ctx).unwrap();
//! # fn fetch_config() -> String { String::from("config") }
//! ```

mod backoff;
mod error;
mod janitor;
mod keyed;
mod mru;
mod retry;
mod rnd;
mod single;

pub use backoff::{Backoff, ExponentialBackoff};
pub use error::{Error, Result};
pub use keyed::{CachedKeyFn, CachedKeyFnBuilder};
pub use single::{CachedFn, CachedFnBuilder};

/// Maximum number of cache states the process janitor accepts.
pub const MAX_JANITOR_STATES: usize = janitor::MAX_STATES;
