//! Compiled thread queue: immutable wiring plus the per-epoch activation
//! runtime.
//!
//! A [`CompiledQueue`] is the snapshot produced by
//! [`NodeTree::compile()`](super::NodeTree::compile). The wiring — one
//! [`QueueItem`] per synth, each with an activation limit and a successor
//! list — never changes after compilation; the queue is shared with the
//! worker threads via `Arc` and they never see partial state.
//!
//! Per-epoch execution state lives in atomic counters alongside the wiring:
//! [`reset()`](CompiledQueue::reset) re-arms them for a block, workers run
//! items and call [`complete()`](CompiledQueue::complete), and the epoch ends
//! when [`is_exhausted()`](CompiledQueue::is_exhausted) reports every item
//! executed exactly once. Re-arming counters instead of rebuilding items
//! keeps the per-block path free of allocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::node::{NodeId, SynthUnit};

/// One executable unit of the compiled queue: a synth plus its dependency
/// wiring.
pub struct QueueItem {
    unit: Arc<dyn SynthUnit>,
    node: NodeId,
    paused: bool,
    activation_limit: u32,
    successors: Vec<u32>,
}

impl QueueItem {
    pub(crate) fn new(
        unit: Arc<dyn SynthUnit>,
        node: NodeId,
        paused: bool,
        activation_limit: u32,
        successors: Vec<u32>,
    ) -> Self {
        Self {
            unit,
            node,
            paused,
            activation_limit,
            successors,
        }
    }

    /// Id of the synth node this item runs.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Number of predecessor completions required before this item becomes
    /// runnable. Items compiled with limit 0 are runnable from the start.
    pub fn activation_limit(&self) -> u32 {
        self.activation_limit
    }

    /// Indices of the items notified when this item completes.
    pub fn successors(&self) -> &[u32] {
        &self.successors
    }

    /// Whether the item is a pass-through for a paused synth: it signals its
    /// successors like any other item but skips the unit's `run`.
    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

/// The compiled, flattened execution plan for one tree snapshot.
pub struct CompiledQueue {
    items: Vec<QueueItem>,
    /// Items with activation limit 0, runnable as soon as an epoch starts.
    roots: Vec<u32>,
    /// Remaining predecessor count per item, re-armed each epoch.
    pending: Vec<AtomicU32>,
    /// Items executed this epoch.
    executed: AtomicUsize,
}

impl CompiledQueue {
    pub(crate) fn new(items: Vec<QueueItem>) -> Self {
        let roots = items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.activation_limit == 0)
            .map(|(index, _)| index as u32)
            .collect();
        let pending = items
            .iter()
            .map(|item| AtomicU32::new(item.activation_limit))
            .collect();
        Self {
            items,
            roots,
            pending,
            executed: AtomicUsize::new(0),
        }
    }

    /// Number of items in the queue.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true for a queue compiled from a tree without synths.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the item at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    #[inline]
    pub fn item(&self, index: u32) -> &QueueItem {
        &self.items[index as usize]
    }

    /// Items runnable at the start of every epoch.
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    /// Re-arms the activation counters for a new epoch.
    ///
    /// Must be called before draining; publication of the epoch to the
    /// workers (channel send or queue push) provides the ordering that makes
    /// these plain stores visible to them.
    pub fn reset(&self) {
        for (pending, item) in self.pending.iter().zip(&self.items) {
            pending.store(item.activation_limit, Ordering::Relaxed);
        }
        self.executed.store(0, Ordering::Relaxed);
    }

    /// Runs the item's synth; a no-op for paused pass-through items.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    #[inline]
    pub fn run_item(&self, index: u32) {
        let item = &self.items[index as usize];
        if !item.paused {
            item.unit.run();
        }
    }

    /// Marks the item finished and decrements every successor's pending
    /// count, invoking `enqueue` for each successor that became runnable.
    ///
    /// Multiple workers may finish predecessors of the same item at the same
    /// instant; the `AcqRel` decrement guarantees exactly one of them
    /// observes the transition to zero, so every item is enqueued exactly
    /// once per epoch. The release half also orders the predecessor's `run`
    /// before the successor's.
    pub fn complete<F: FnMut(u32)>(&self, index: u32, mut enqueue: F) {
        for &successor in &self.items[index as usize].successors {
            let previous = self.pending[successor as usize].fetch_sub(1, Ordering::AcqRel);
            debug_assert!(previous > 0, "successor activation counter underflow");
            if previous == 1 {
                enqueue(successor);
            }
        }
        self.executed.fetch_add(1, Ordering::AcqRel);
    }

    /// Whether every item has executed this epoch.
    pub fn is_exhausted(&self) -> bool {
        self.executed.load(Ordering::Acquire) == self.items.len()
    }

    /// Runs one full epoch on the calling thread.
    ///
    /// Convenience for drivers without a worker pool and for tests; the
    /// multicore path is [`WorkerPool::run_epoch`](crate::WorkerPool::run_epoch).
    pub fn run_inline(&self) {
        self.reset();
        let mut ready = self.roots.clone();
        while let Some(index) = ready.pop() {
            self.run_item(index);
            self.complete(index, |next| ready.push(next));
        }
        debug_assert!(self.is_exhausted(), "inline drain left items unexecuted");
    }
}
