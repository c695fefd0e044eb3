// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::{FinishCause, Task};

/// Observes a task's cancellation and reads its scoped values.
///
/// A context is a cheap cloneable handle, typically passed into functions
/// that need to abort work when the owning task is finished. It surfaces the
/// standard context operations: a cancellation signal, the cancellation
/// cause, an (always absent) deadline, and value lookup with parent fallback.
///
/// # Examples
///
/// ```
/// use lifetree::testing::isolated_root;
///
/// let root = isolated_root("example");
/// let task = root.subtask("worker", false).unwrap();
/// let ctx = task.context();
///
/// assert!(!ctx.is_cancelled());
/// task.finish("done");
/// assert!(ctx.is_cancelled());
/// assert_eq!(ctx.cancel_cause().as_str(), Some("done"));
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    task: Task,
}

impl Context {
    pub(crate) fn new(task: Task) -> Self {
        Self { task }
    }

    /// Returns the task this context observes.
    #[must_use]
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Returns `true` once the task's cancellation has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.task.inner.is_cancelled()
    }

    /// Returns the recorded cancellation cause.
    ///
    /// Empty until the task is cancelled, and also empty when the task was
    /// finished without a reason.
    #[must_use]
    pub fn cancel_cause(&self) -> FinishCause {
        self.task.inner.cancel_cause()
    }

    /// Blocks until the task's cancellation is raised.
    pub fn wait_cancelled(&self) {
        self.task.inner.wait_cancelled();
    }

    /// Blocks until the task's cancellation is raised or the timeout passes.
    /// Returns `true` if the task was cancelled.
    pub fn wait_cancelled_timeout(&self, timeout: Duration) -> bool {
        self.task.inner.wait_cancelled_timeout(timeout)
    }

    /// Returns the context deadline. Task contexts carry no deadline.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        None
    }

    /// Looks up a task-scoped value, searching the task and then its
    /// ancestors up to (but excluding) the root.
    #[must_use]
    pub fn value<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        self.task.get_value(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::isolated_root;

    static_assertions::assert_impl_all!(Context: Send, Sync, Clone);

    #[test]
    fn deadline_is_absent() {
        let root = isolated_root("root");
        assert_eq!(root.context().deadline(), None);
    }

    #[test]
    fn wait_cancelled_timeout_expires() {
        let root = isolated_root("root");
        let ctx = root.subtask("t", false).unwrap().context();

        let start = Instant::now();
        assert!(!ctx.wait_cancelled_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_cancelled_timeout_observes_cancel() {
        let root = isolated_root("root");
        let task = root.subtask("t", false).unwrap();
        let ctx = task.context();

        let waiter = std::thread::spawn(move || ctx.wait_cancelled_timeout(Duration::from_secs(5)));
        task.finish("bye");
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn value_lookup_through_context() {
        let root = isolated_root("root");
        let parent = root.subtask("parent", false).unwrap();
        parent.set_value("answer", 42_u32);

        let child = parent.subtask("child", false).unwrap();
        let ctx = child.context();

        assert_eq!(ctx.value::<u32>("answer").as_deref(), Some(&42));
        assert!(ctx.value::<String>("answer").is_none(), "type mismatch");
        assert!(ctx.value::<u32>("missing").is_none());
    }
}
