// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// A value that can live in a [`Pool`][crate::Pool].
///
/// Objects expose a stable key and a human-readable name. The remaining
/// methods are optional capabilities with sensible defaults.
pub trait Object: Clone + Send + Sync + 'static {
    /// The unique key of the object within its pool.
    fn key(&self) -> &str;

    /// The name used for logging and for sorting
    /// [`Pool::slice`][crate::Pool::slice].
    fn name(&self) -> &str;

    /// A display name for logs; defaults to [`name`][Self::name].
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Expresses deterministic replacement preference when another object
    /// with the same key is already live: returning `false` keeps the
    /// current occupant. The default always replaces.
    fn prefer_over(&self, _other: &Self) -> bool {
        true
    }
}
