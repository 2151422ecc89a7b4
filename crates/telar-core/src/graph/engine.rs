//! Scheduling engine: cached compilation and lock-free queue publication.
//!
//! [`Scheduler`] wraps [`NodeTree`] for the common server loop: the control
//! thread mutates the tree between blocks, [`commit()`](Scheduler::commit)
//! recompiles only when something structural changed, and the audio driver
//! picks up the latest queue through a [`QueueHandle`] without taking any
//! lock. A failed compile never unpublishes anything — the previously
//! committed queue stays current, so the real-time path is insulated from
//! control-layer errors.

use std::sync::Arc;

use arc_swap::ArcSwapOption;

use super::node::{GroupKind, NodeId, SynthUnit};
use super::queue::CompiledQueue;
use super::tree::{NodeTree, Position, TreeError};

/// Owns the tree, tracks structural dirtiness, and publishes compiled
/// queues.
pub struct Scheduler {
    tree: NodeTree,
    published: Arc<ArcSwapOption<CompiledQueue>>,
    dirty: bool,
}

impl Scheduler {
    /// Creates a scheduler whose tree holds at most `capacity` nodes.
    ///
    /// No queue is published until the first [`commit()`](Self::commit).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tree: NodeTree::with_capacity(capacity),
            published: Arc::new(ArcSwapOption::empty()),
            dirty: true,
        }
    }

    /// Read access to the tree for queries.
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Returns a cloneable handle the audio driver uses to load the current
    /// queue lock-free.
    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            published: Arc::clone(&self.published),
        }
    }

    /// Recompiles if anything structural changed since the last commit and
    /// publishes the result; otherwise returns the current queue.
    ///
    /// On error the tree is intact and the previously published queue — if
    /// any — remains current.
    pub fn commit(&mut self) -> Result<Arc<CompiledQueue>, TreeError> {
        if !self.dirty
            && let Some(queue) = self.published.load_full()
        {
            return Ok(queue);
        }
        let queue = Arc::new(self.tree.compile()?);
        self.published.store(Some(Arc::clone(&queue)));
        self.dirty = false;
        #[cfg(feature = "tracing")]
        tracing::debug!("scheduler_commit: published queue with {} items", queue.len());
        Ok(queue)
    }

    // --- Structural mutations (mark the schedule dirty) ---

    /// See [`NodeTree::add_synth`].
    pub fn add_synth(
        &mut self,
        id: NodeId,
        unit: Arc<dyn SynthUnit>,
        group: NodeId,
        position: Position,
    ) -> Result<(), TreeError> {
        self.tree.add_synth(id, unit, group, position)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::add_group`].
    pub fn add_group(
        &mut self,
        id: NodeId,
        kind: GroupKind,
        group: NodeId,
        position: Position,
    ) -> Result<(), TreeError> {
        self.tree.add_group(id, kind, group, position)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::attach`].
    pub fn attach(&mut self, id: NodeId, group: NodeId, position: Position) -> Result<(), TreeError> {
        self.tree.attach(id, group, position)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::detach`].
    pub fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.tree.detach(id)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::remove_child`].
    pub fn remove_child(&mut self, group: NodeId, node: NodeId) -> Result<(), TreeError> {
        self.tree.remove_child(group, node)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::free`].
    pub fn free(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.tree.free(id)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::move_node`].
    pub fn move_node(
        &mut self,
        id: NodeId,
        group: NodeId,
        position: Position,
    ) -> Result<(), TreeError> {
        self.tree.move_node(id, group, position)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::clear_children`].
    pub fn clear_children(&mut self, group: NodeId) -> Result<(), TreeError> {
        self.tree.clear_children(group)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::remove_synths_recursive`].
    pub fn remove_synths_recursive(&mut self, group: NodeId) -> Result<(), TreeError> {
        self.tree.remove_synths_recursive(group)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::pause`]. Observed by the next commit, never by a
    /// block already in flight.
    pub fn pause(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.tree.pause(id)?;
        self.dirty = true;
        Ok(())
    }

    /// See [`NodeTree::resume`]. Observed by the next commit.
    pub fn resume(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.tree.resume(id)?;
        self.dirty = true;
        Ok(())
    }

    // --- Non-structural operations ---

    /// See [`NodeTree::set_control`]. Controls reach the unit directly; the
    /// compiled wiring is unaffected, so no recompile is scheduled.
    pub fn set_control(&self, id: NodeId, index: u32, value: f32) -> Result<(), TreeError> {
        self.tree.set_control(id, index, value)
    }
}

/// Lock-free read access to the most recently committed queue.
///
/// Clone one per consumer; [`load()`](QueueHandle::load) is wait-free and
/// safe to call from the audio callback.
#[derive(Clone)]
pub struct QueueHandle {
    published: Arc<ArcSwapOption<CompiledQueue>>,
}

impl QueueHandle {
    /// Returns the current queue, or `None` before the first commit.
    pub fn load(&self) -> Option<Arc<CompiledQueue>> {
        self.published.load_full()
    }
}
