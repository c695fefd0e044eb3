// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Weak};

use crossbeam_queue::ArrayQueue;

use crate::buf::Chunk;
use crate::stats::PoolStats;

/// How a tier slot keeps its chunk alive.
#[derive(Debug)]
pub(crate) enum Handle {
    /// Ownership was transferred into the tier by `put`.
    Strong(Arc<Chunk>),
    /// A split remainder: reclaimed automatically once the caller drops the
    /// last strong reference to the parent allocation.
    Weak(Weak<Chunk>),
}

/// A byte range of a chunk parked in a tier.
#[derive(Debug)]
pub(crate) struct Parked {
    handle: Handle,
    offset: usize,
    cap: usize,
}

impl Parked {
    pub(crate) fn strong(chunk: Arc<Chunk>, offset: usize, cap: usize) -> Self {
        Self {
            handle: Handle::Strong(chunk),
            offset,
            cap,
        }
    }

    pub(crate) fn weak(chunk: &Arc<Chunk>, offset: usize, cap: usize) -> Self {
        Self {
            handle: Handle::Weak(Arc::downgrade(chunk)),
            offset,
            cap,
        }
    }

    pub(crate) fn cap(&self) -> usize {
        self.cap
    }
}

/// A bounded MPMC queue of parked buffers for one size class.
#[derive(Debug)]
pub(crate) struct Tier {
    slots: ArrayQueue<Parked>,
}

impl Tier {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            slots: ArrayQueue::new(slots),
        }
    }

    /// Pops the next live slot, skipping remainders whose allocation has
    /// already been reclaimed.
    pub(crate) fn pop(&self, stats: &PoolStats) -> Option<(Arc<Chunk>, usize, usize)> {
        while let Some(parked) = self.slots.pop() {
            match parked.handle {
                Handle::Strong(chunk) => return Some((chunk, parked.offset, parked.cap)),
                Handle::Weak(weak) => match weak.upgrade() {
                    Some(chunk) => return Some((chunk, parked.offset, parked.cap)),
                    None => stats.add_reclaimed(parked.cap),
                },
            }
        }
        None
    }

    /// Pushes a slot; returns `false` (and drops the buffer) when the tier
    /// is full.
    pub(crate) fn push(&self, parked: Parked, stats: &PoolStats) -> bool {
        match self.slots.push(parked) {
            Ok(()) => true,
            Err(parked) => {
                stats.add_dropped(parked.cap());
                false
            }
        }
    }
}
