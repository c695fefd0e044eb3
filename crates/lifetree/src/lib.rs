// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![warn(missing_docs)]

//! Hierarchical task lifetime manager with structured cancellation.
//!
//! A [`Task`] is a node in a tree. Finishing a task cancels its entire
//! subtree, runs registered callbacks, and detaches the node from its parent.
//! Tasks carry scoped values visible to all descendants and expose a
//! [`Context`] handle for observing cancellation.
//!
//! # Lifecycle
//!
//! Tasks are created with [`Task::subtask`] (or [`root_task`] for children of
//! the process root) and destroyed with [`Task::finish`] or
//! [`Task::finish_and_wait`], optionally with a cause. A *needs-finish* task
//! separates its lifetime from its cancellation: its finished signal closes
//! only when `finish` is called, while a plain task finishes automatically as
//! soon as its cancellation is raised.
//!
//! Two kinds of callbacks observe the lifecycle:
//!
//! - [`Task::on_cancel`] callbacks fire as soon as cancellation is raised.
//! - [`Task::on_finished`] callbacks fire only after cancellation has been
//!   raised *and* every child has finished.
//!
//! Each callback runs on its own thread; panics are caught, logged with the
//! callback's label, and do not propagate.
//!
//! # Shutdown
//!
//! [`wait_exit`] blocks on `SIGINT` / `SIGTERM` / `SIGHUP`, finishes the
//! process root with a `"program exiting"` cause, and waits for the tree to
//! drain. Tasks that fail to drain within [`TASK_TIMEOUT`] are enumerated in
//! a single structured warning.
//!
//! # Examples
//!
//! ```
//! use lifetree::testing::isolated_root;
//!
//! let root = isolated_root("example");
//! let server = root.subtask("server", true).unwrap();
//! let worker = server.subtask("worker", false).unwrap();
//!
//! server.on_cancel("close-listener", || { /* release resources */ });
//!
//! server.finish("shutdown");
//! assert!(worker.is_cancelled());
//! assert_eq!(worker.finish_cause().as_str(), Some("shutdown"));
//! ```

mod cause;
mod context;
mod dependencies;
mod error;
mod report;
mod task;
pub mod testing;

use std::sync::OnceLock;
use std::time::Duration;

pub use cause::FinishCause;
pub use context::Context;
pub use dependencies::Dependencies;
pub use error::{Error, Result};
pub use report::StuckReport;
pub use task::Task;

/// How long a finishing task waits for its children and callbacks to drain
/// before reporting them as stuck.
pub const TASK_TIMEOUT: Duration = Duration::from_secs(3);

/// The cause raised on the process root by the shutdown handler.
pub const PROGRAM_EXITING: &str = "program exiting";

static ROOT: OnceLock<Task> = OnceLock::new();

fn root() -> &'static Task {
    ROOT.get_or_init(|| Task::new_root("root"))
}

/// Returns a new task with the given name, derived from the process root.
///
/// # Errors
///
/// Returns [`Error::FinishedTask`] if the process root has already been
/// finished by the shutdown handler.
pub fn root_task(name: &str, need_finish: bool) -> Result<Task> {
    root().subtask(name, need_finish)
}

/// Returns a context observing the process root.
#[must_use]
pub fn root_context() -> Context {
    root().context()
}

/// Registers a callback to run when the program begins exiting.
pub fn on_program_exit<F>(label: &str, f: F)
where
    F: FnOnce() + Send + 'static,
{
    root().on_cancel(label, f);
}

/// Waits for a shutdown signal (`SIGINT`, `SIGTERM`, `SIGHUP`), then finishes
/// the process root and waits up to `shutdown_timeout` for every task to
/// drain.
///
/// If the timeout is exceeded, a single warning enumerating the stuck
/// callbacks and children is emitted and the function returns; the caller
/// decides whether to exit regardless.
#[cfg(unix)]
pub fn wait_exit(shutdown_timeout: Duration) {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM, SIGHUP]).expect("failed to register signal handlers");
    let _ = signals.forever().next();

    tracing::info!("shutting down");

    let root = root();
    root.finish(FinishCause::program_exiting());
    if !root.wait_drained(shutdown_timeout) {
        root.report_stuck();
    }
}
