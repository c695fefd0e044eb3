// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use lifetree::FinishCause;
use thiserror::Error;

/// A specialized `Result` type for memoised functions.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced (and possibly cached) by a memoised function.
///
/// Errors are cloneable so a single failure can be handed to every waiter
/// and replayed from the cache until its TTL elapses.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// The context's task was finished while the call was retrying. This
    /// error is never cached.
    #[error("cancelled: {cause}")]
    Cancelled {
        /// The cause the task was finished with.
        cause: FinishCause,
    },

    /// A plain-text failure from the producing function.
    #[error("{0}")]
    Message(Arc<str>),

    /// A failure wrapping an underlying error from the producing function.
    #[error("{0}")]
    Source(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Creates a plain-text error.
    pub fn msg(message: impl AsRef<str>) -> Self {
        Self::Message(Arc::from(message.as_ref()))
    }

    /// Wraps an underlying error.
    pub fn from_source(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Source(Arc::new(source))
    }

    /// Returns `true` if the call was aborted by task cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
