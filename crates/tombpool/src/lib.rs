// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Keyed object registry with soft-delete tombstones.
//!
//! A [`Pool`] maps unique keys to live objects. Deleting an object leaves a
//! *tombstone* behind for a short TTL, which lets the registry distinguish a
//! reload (the same key re-added shortly after removal) from a genuinely new
//! addition, and lets `add_if_not_exists` return the identity of a
//! recently-removed object. Expired tombstones are purged opportunistically
//! once enough of them accumulate.
//!
//! Replacement of a live entry is governed by [`Object::prefer_over`]: an
//! object that does not prefer itself over the current occupant leaves the
//! pool unchanged.
//!
//! All operations are safe for concurrent callers; the registry is backed by
//! a lock-free concurrent map with atomic counters for tombstones and the
//! logging switch.
//!
//! # Examples
//!
//! ```
//! use tombpool::{Object, Pool};
//!
//! #[derive(Clone)]
//! struct Route {
//!     key: String,
//!     name: String,
//! }
//!
//! impl Object for Route {
//!     fn key(&self) -> &str {
//!         &self.key
//!     }
//!     fn name(&self) -> &str {
//!         &self.name
//!     }
//! }
//!
//! let pool: Pool<Route> = Pool::new("routes");
//! pool.add(Route { key: "a".into(), name: "alpha".into() });
//!
//! let (found, ok) = pool.get("a").map(|r| (r.name.clone(), true)).unwrap_or_default();
//! assert!(ok);
//! assert_eq!(found, "alpha");
//! ```

mod object;
mod pool;

pub use object::Object;
pub use pool::Pool;

use std::time::Duration;

/// How long a tombstone shields its key after a delete.
pub const TOMBSTONE_TTL: Duration = Duration::from_secs(1);

/// Tombstone count above which a delete triggers an opportunistic purge.
pub const TOMBSTONE_PURGE_THRESHOLD: u32 = 256;
