// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use event_listener::{Event, Listener};
use parking_lot::Mutex;

use crate::dependencies::Dependencies;
use crate::report::{self, StuckReport};
use crate::{Context, Error, FinishCause, Result, TASK_TIMEOUT};

/// Controls an object's lifetime as a node in the task tree.
///
/// `Task` is a cheap cloneable handle; all clones refer to the same node.
/// Finishing a task raises cancellation on its whole subtree, runs the
/// registered callbacks, and detaches the node from its parent. See the
/// [crate docs][crate] for the lifecycle overview.
#[derive(Clone)]
pub struct Task {
    pub(crate) inner: Arc<TaskInner>,
}

pub(crate) struct TaskInner {
    name: Arc<str>,
    pub(crate) parent: Option<Arc<TaskInner>>,
    need_finish: bool,

    finish_called: Mutex<bool>,
    cancelled: AtomicBool,
    cancel_event: Event,
    cause: OnceLock<Arc<str>>,

    /// The done signal of a needs-finish task; set by `finish`.
    finished: AtomicBool,
    finished_event: Event,

    pub(crate) children: OnceLock<Dependencies<TaskRef>>,
    pub(crate) callbacks: OnceLock<Dependencies<CallbackRef>>,
    watcher_armed: AtomicBool,

    values: OnceLock<DashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl TaskInner {
    fn new(name: &str, parent: Option<Arc<TaskInner>>, need_finish: bool) -> Self {
        Self {
            name: Arc::from(name),
            parent,
            need_finish,
            finish_called: Mutex::new(false),
            cancelled: AtomicBool::new(false),
            cancel_event: Event::new(),
            cause: OnceLock::new(),
            finished: AtomicBool::new(false),
            finished_event: Event::new(),
            children: OnceLock::new(),
            callbacks: OnceLock::new(),
            watcher_armed: AtomicBool::new(false),
            values: OnceLock::new(),
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn full_name(&self) -> String {
        match &self.parent {
            None => self.name.to_string(),
            Some(parent) if parent.is_root() => self.name.to_string(),
            Some(parent) => format!("{}.{}", parent.full_name(), self.name),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel_cause(&self) -> FinishCause {
        FinishCause::from_arc(self.cause.get().cloned())
    }

    pub(crate) fn wait_cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let listener = self.cancel_event.listen();
            if self.is_cancelled() {
                return;
            }
            listener.wait();
        }
    }

    /// Returns `true` if the task was cancelled before the timeout.
    pub(crate) fn wait_cancelled_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let listener = self.cancel_event.listen();
            if self.is_cancelled() {
                return true;
            }
            if listener.wait_deadline(deadline).is_none() && Instant::now() >= deadline {
                return self.is_cancelled();
            }
        }
    }

    /// Blocks until the done signal closes. Instant for tasks that do not
    /// separate finish from cancellation.
    fn wait_done(&self) {
        if !self.need_finish {
            return;
        }
        loop {
            if self.finished.load(Ordering::SeqCst) {
                return;
            }
            let listener = self.finished_event.listen();
            if self.finished.load(Ordering::SeqCst) {
                return;
            }
            listener.wait();
        }
    }

    pub(crate) fn get_value(&self, key: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        if let Some(values) = self.values.get() {
            if let Some(value) = values.get(key) {
                return Some(Arc::clone(value.value()));
            }
        }

        // Walk upward; the root's own values are not inherited.
        let mut cursor = self.parent.clone();
        while let Some(node) = cursor {
            if node.is_root() {
                break;
            }
            if let Some(values) = node.values.get() {
                if let Some(value) = values.get(key) {
                    return Some(Arc::clone(value.value()));
                }
            }
            cursor = node.parent.clone();
        }
        None
    }
}

/// Raises the cancellation signal on `inner` and its whole subtree.
///
/// Tasks that do not need an explicit finish are finished on the spot, which
/// also detaches them from their parent.
fn raise_cancelled(inner: &Arc<TaskInner>, cause: &FinishCause) {
    if inner.cancelled.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Some(arc) = cause.as_arc() {
        let _ = inner.cause.set(Arc::clone(arc));
    }
    inner.cancel_event.notify(usize::MAX);

    if let Some(children) = inner.children.get() {
        for TaskRef(child) in children.snapshot() {
            if child.need_finish {
                raise_cancelled(&child, cause);
            } else {
                finish_inner(&child, cause.clone(), false);
            }
        }
    }
}

/// The finish protocol: raise cancellation once, close the done signal,
/// optionally wait for the subtree to drain, then detach from the parent.
///
/// Returns `false` when a requested wait timed out.
fn finish_inner(inner: &Arc<TaskInner>, cause: FinishCause, wait: bool) -> bool {
    {
        let mut called = inner.finish_called.lock();
        if *called {
            drop(called);
            // Join the first finish; do not report stuck tasks again.
            return !wait || wait_drained(inner, TASK_TIMEOUT);
        }
        *called = true;
    }

    raise_cancelled(inner, &cause);

    if inner.need_finish {
        inner.finished.store(true, Ordering::SeqCst);
        inner.finished_event.notify(usize::MAX);
    }

    let mut drained = true;
    if wait {
        drained = wait_drained(inner, TASK_TIMEOUT);
        if !drained {
            report::report_stuck(inner);
        }
    }

    if let Some(parent) = &inner.parent {
        if let Some(children) = parent.children.get() {
            children.delete(&TaskRef(Arc::clone(inner)));
        }
    }

    tracing::debug!(task = %inner.full_name(), "task finished");
    drained
}

pub(crate) fn wait_drained(inner: &TaskInner, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;

    if let Some(children) = inner.children.get() {
        if !children.wait_deadline(deadline) {
            return false;
        }
    }
    if let Some(callbacks) = inner.callbacks.get() {
        if !callbacks.wait_deadline(deadline) {
            return false;
        }
    }
    true
}

impl Task {
    pub(crate) fn new_root(name: &str) -> Self {
        Self {
            inner: Arc::new(TaskInner::new(name, None, false)),
        }
    }

    /// Returns the task's own name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns the dot-separated path of the task below the root.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.inner.full_name()
    }

    /// Returns a new subtask with the given name, derived from this task.
    ///
    /// A *needs-finish* subtask keeps its finished signal open until `finish`
    /// is called on it; a plain subtask finishes automatically when its
    /// cancellation is raised.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FinishedTask`] when called on a task that has been
    /// finished (or cancelled by a finishing ancestor). This is a caller bug.
    pub fn subtask(&self, name: &str, need_finish: bool) -> Result<Task> {
        if *self.inner.finish_called.lock() || self.inner.is_cancelled() {
            let task = self.full_name();
            tracing::warn!(task = %task, subtask = name, "subtask requested from a finished task");
            return Err(Error::FinishedTask { task });
        }

        let children = self.inner.children.get_or_init(Dependencies::new);

        let child = Arc::new(TaskInner::new(
            name,
            Some(Arc::clone(&self.inner)),
            need_finish,
        ));
        children.add(TaskRef(Arc::clone(&child)));

        tracing::debug!(task = %child.full_name(), "task started");
        Ok(Task { inner: child })
    }

    /// Marks the task as finished with the given cause, cancelling the whole
    /// subtree. Does not wait for callbacks or children to drain.
    ///
    /// Finishing is idempotent: later calls observe the first recorded cause.
    pub fn finish<C: Into<FinishCause>>(&self, cause: C) {
        finish_inner(&self.inner, cause.into(), false);
    }

    /// Finishes the task and waits for its children and callbacks to drain,
    /// bounded by [`TASK_TIMEOUT`][crate::TASK_TIMEOUT].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the subtree did not drain in time; a
    /// stuck report naming the pending callbacks and children has been
    /// emitted by then.
    pub fn finish_and_wait<C: Into<FinishCause>>(&self, cause: C) -> Result<()> {
        if finish_inner(&self.inner, cause.into(), true) {
            Ok(())
        } else {
            Err(Error::Timeout {
                task: self.full_name(),
                timeout: TASK_TIMEOUT,
            })
        }
    }

    /// Returns the cause recorded at the first `finish`, if any.
    #[must_use]
    pub fn finish_cause(&self) -> FinishCause {
        self.inner.cancel_cause()
    }

    /// Returns `true` once the task's cancellation has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Registers `f` to run as soon as the task's cancellation is raised.
    ///
    /// Each callback runs on its own thread; a panic is caught and logged
    /// with the callback's label.
    pub fn on_cancel<F>(&self, label: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_callback(label, f, false);
    }

    /// Registers `f` to run after the task's cancellation has been raised,
    /// its done signal has closed, and every child has finished.
    pub fn on_finished<F>(&self, label: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // For a task without a separate finish, this degrades to on_cancel.
        self.add_callback(label, f, self.inner.need_finish);
    }

    /// Returns a context handle for observing cancellation and reading
    /// task-scoped values.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::new(self.clone())
    }

    /// Stores a task-scoped value, visible to this task and all descendants.
    ///
    /// A child storing the same key shadows the parent's value.
    pub fn set_value<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.inner
            .values
            .get_or_init(DashMap::new)
            .insert(key.into(), Arc::new(value));
    }

    /// Looks up a task-scoped value, searching this task and then its
    /// ancestors up to (but excluding) the root.
    ///
    /// Returns `None` when the key is absent or the stored value has a
    /// different type.
    #[must_use]
    pub fn get_value<V: Any + Send + Sync>(&self, key: &str) -> Option<Arc<V>> {
        self.inner.get_value(key)?.downcast::<V>().ok()
    }

    /// Collects the labels of pending callbacks and the names of pending
    /// children across the subtree.
    #[must_use]
    pub fn stuck_report(&self) -> StuckReport {
        report::stuck_report(&self.inner)
    }

    pub(crate) fn report_stuck(&self) {
        report::report_stuck(&self.inner);
    }

    pub(crate) fn wait_drained(&self, timeout: Duration) -> bool {
        wait_drained(&self.inner, timeout)
    }

    fn add_callback<F>(&self, label: &str, f: F, wait_for_children: bool)
    where
        F: FnOnce() + Send + 'static,
    {
        let callbacks = self.inner.callbacks.get_or_init(Dependencies::new);
        callbacks.add(CallbackRef(Arc::new(Callback {
            label: Arc::from(label),
            wait_for_children,
            f: Mutex::new(Some(Box::new(f))),
        })));

        if !self.inner.watcher_armed.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            thread::spawn(move || watch(inner));
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.full_name())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The watcher drives a task's callbacks: cancel callbacks fire as soon as
/// cancellation is raised; finished callbacks fire after the done signal
/// closes and the children drain.
fn watch(inner: Arc<TaskInner>) {
    inner.wait_cancelled();

    let callbacks = inner
        .callbacks
        .get()
        .expect("watcher armed after callback set init");

    for cb in callbacks.snapshot() {
        if !cb.0.wait_for_children {
            spawn_runner(Arc::clone(&inner), cb);
        }
    }

    inner.wait_done();
    if let Some(children) = inner.children.get() {
        children.wait();
    }

    for cb in callbacks.snapshot() {
        if cb.0.wait_for_children {
            spawn_runner(Arc::clone(&inner), cb);
        }
    }
}

fn spawn_runner(inner: Arc<TaskInner>, cb: CallbackRef) {
    thread::spawn(move || {
        cb.run();
        if let Some(callbacks) = inner.callbacks.get() {
            callbacks.delete(&cb);
        }
    });
}

pub(crate) struct Callback {
    label: Arc<str>,
    wait_for_children: bool,
    f: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Callback {
    pub(crate) fn label(&self) -> &str {
        &self.label
    }
}

/// Identity-keyed handle to a callback, usable in a [`Dependencies`] set.
#[derive(Clone)]
pub(crate) struct CallbackRef(pub(crate) Arc<Callback>);

impl CallbackRef {
    fn run(&self) {
        let Some(f) = self.0.f.lock().take() else {
            return;
        };
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            let reason = payload
                .downcast_ref::<&str>()
                .map(ToString::to_string)
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(callback = %self.0.label, %reason, "callback panicked");
        }
    }
}

impl PartialEq for CallbackRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for CallbackRef {}

impl Hash for CallbackRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// Identity-keyed handle to a task node, usable in a [`Dependencies`] set.
#[derive(Clone)]
pub(crate) struct TaskRef(pub(crate) Arc<TaskInner>);

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskRef {}

impl Hash for TaskRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::isolated_root;

    static_assertions::assert_impl_all!(Task: Send, Sync, Clone);

    #[test]
    fn full_name_nests() {
        let root = isolated_root("root");
        let a = root.subtask("a", false).unwrap();
        let b = a.subtask("b", false).unwrap();

        assert_eq!(a.full_name(), "a");
        assert_eq!(b.full_name(), "a.b");
        assert_eq!(b.to_string(), "a.b");
    }

    #[test]
    fn subtask_after_finish_is_rejected() {
        let root = isolated_root("root");
        let task = root.subtask("t", false).unwrap();
        task.finish(FinishCause::none());

        let err = task.subtask("child", false).unwrap_err();
        assert!(matches!(err, Error::FinishedTask { .. }));
    }

    #[test]
    fn finish_detaches_from_parent() {
        let root = isolated_root("root");
        let task = root.subtask("t", false).unwrap();

        assert_eq!(root.inner.children.get().unwrap().len(), 1);
        task.finish(FinishCause::none());
        assert_eq!(root.inner.children.get().unwrap().len(), 0);
    }

    #[test]
    fn first_cause_wins() {
        let root = isolated_root("root");
        let task = root.subtask("t", true).unwrap();

        task.finish("first");
        task.finish("second");
        assert_eq!(task.finish_cause().as_str(), Some("first"));
    }

    #[test]
    fn need_finish_child_is_cancelled_but_not_finished() {
        let root = isolated_root("root");
        let parent = root.subtask("parent", false).unwrap();
        let child = parent.subtask("child", true).unwrap();

        parent.finish("stop");

        assert!(child.is_cancelled());
        assert_eq!(child.finish_cause().as_str(), Some("stop"));
        // The child still occupies the parent's children set until finished.
        assert_eq!(parent.inner.children.get().unwrap().len(), 1);

        child.finish_and_wait("stop").unwrap();
        assert_eq!(parent.inner.children.get().unwrap().len(), 0);
    }
}
