// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use thiserror::Error;

/// A specialized `Result` type for task-tree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the task tree.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A subtask was requested from a task that has already been finished
    /// (or cancelled by a finishing ancestor). This is a caller bug.
    #[error("task `{task}` has already finished")]
    FinishedTask {
        /// Full name of the finished task.
        task: String,
    },

    /// The task's children or callbacks did not drain before the deadline.
    /// A stuck report has been emitted.
    #[error("task `{task}` did not drain within {timeout:?}")]
    Timeout {
        /// Full name of the stuck task.
        task: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },
}
