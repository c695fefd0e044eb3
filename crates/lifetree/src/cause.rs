// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use crate::PROGRAM_EXITING;

/// The reason attached to a cancellation at the moment a task is finished.
///
/// The first non-empty cause passed to `finish` on a task (or inherited from
/// a finishing ancestor) is preserved; later causes are ignored.
///
/// # Examples
///
/// ```
/// use lifetree::FinishCause;
///
/// let cause = FinishCause::from("shutdown");
/// assert_eq!(cause.as_str(), Some("shutdown"));
/// assert!(FinishCause::none().is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishCause(Option<Arc<str>>);

impl FinishCause {
    /// A finish with no recorded reason.
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }

    /// The cause raised by the process shutdown handler.
    #[must_use]
    pub fn program_exiting() -> Self {
        Self::from(PROGRAM_EXITING)
    }

    /// Returns `true` if no reason was recorded.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the recorded reason, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub(crate) fn as_arc(&self) -> Option<&Arc<str>> {
        self.0.as_ref()
    }

    pub(crate) fn from_arc(arc: Option<Arc<str>>) -> Self {
        Self(arc)
    }
}

impl From<&str> for FinishCause {
    fn from(reason: &str) -> Self {
        Self(Some(Arc::from(reason)))
    }
}

impl From<String> for FinishCause {
    fn from(reason: String) -> Self {
        Self(Some(Arc::from(reason.as_str())))
    }
}

impl From<Option<&str>> for FinishCause {
    fn from(reason: Option<&str>) -> Self {
        Self(reason.map(Arc::from))
    }
}

impl fmt::Display for FinishCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("finished"))
    }
}
