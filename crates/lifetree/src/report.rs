// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use crate::task::{TaskInner, TaskRef};

/// The pending callbacks and children of a subtree that failed to drain.
#[derive(Debug, Clone, Default)]
pub struct StuckReport {
    /// Labels of callbacks still pending anywhere in the subtree.
    pub callbacks: Vec<String>,
    /// Names of children still pending, interleaved with their own pending
    /// callback labels.
    pub children: Vec<String>,
}

impl StuckReport {
    /// Returns `true` when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.children.is_empty()
    }
}

pub(crate) fn stuck_report(inner: &Arc<TaskInner>) -> StuckReport {
    StuckReport {
        callbacks: list_stuck_callbacks(inner),
        children: list_stuck_children(inner),
    }
}

fn list_stuck_callbacks(inner: &Arc<TaskInner>) -> Vec<String> {
    let mut labels = Vec::new();
    if let Some(callbacks) = inner.callbacks.get() {
        for cb in callbacks.snapshot() {
            labels.push(cb.0.label().to_string());
        }
    }
    if let Some(children) = inner.children.get() {
        for TaskRef(child) in children.snapshot() {
            labels.extend(list_stuck_callbacks(&child));
        }
    }
    labels
}

fn list_stuck_children(inner: &Arc<TaskInner>) -> Vec<String> {
    let Some(children) = inner.children.get() else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for TaskRef(child) in children.snapshot() {
        names.push(child.full_name());
        names.extend(list_stuck_callbacks(&child));
    }
    names
}

/// Emits a single structured warning enumerating everything that failed to
/// drain under `inner`. Quiet when nothing is pending.
pub(crate) fn report_stuck(inner: &Arc<TaskInner>) {
    let report = stuck_report(inner);
    if report.is_empty() {
        return;
    }
    tracing::warn!(
        task = %inner.full_name(),
        stuck_callbacks = report.callbacks.len(),
        stuck_children = report.children.len(),
        callbacks = ?report.callbacks,
        children = ?report.children,
        "task stuck during finish"
    );
}
