// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Helpers for tests that need a task tree isolated from the process root.

use crate::Task;

/// Returns a standalone root task.
///
/// Unlike [`root_task`][crate::root_task], the returned task belongs to its
/// own tree: finishing it (or the process root) does not affect other tests.
/// Use it as the parent for every task a test creates.
///
/// # Examples
///
/// ```
/// use lifetree::testing::isolated_root;
///
/// let root = isolated_root("my-test");
/// let task = root.subtask("worker", false).unwrap();
/// task.finish("test over");
/// ```
#[must_use]
pub fn isolated_root(name: &str) -> Task {
    Task::new_root(name)
}
