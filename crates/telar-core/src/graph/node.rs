//! Node identity, kinds, and the opaque leaf contract.
//!
//! Every node in the processing tree is either a synth (a leaf that performs
//! signal processing) or a group (an ordered container of children). The
//! `NodeData` struct bundles the kind with structural bookkeeping: the parent
//! back-reference and sibling links, all expressed as arena slot indices.

use std::sync::Arc;

use crate::arena::Slot;

/// Unique identifier for a node in the processing tree.
///
/// Ids are assigned by the control layer and stay stable for the node's
/// lifetime. They are unique across the tree; reusing a live id is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Id of the root group every tree is created with.
    pub const ROOT: NodeId = NodeId(0);

    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Opaque leaf computation dispatched by the compiled queue.
///
/// The scheduling core never looks inside a synth; it only guarantees *when*
/// `run` is called. Per compiled epoch, `run` is invoked exactly once per
/// queue item and never concurrently for the same node, so implementations
/// are free to keep mutable DSP state behind interior mutability (atomic
/// parameters, lock-free ring buffers).
pub trait SynthUnit: Send + Sync {
    /// Process one audio block.
    fn run(&self);

    /// Update a control input.
    ///
    /// Called from the control thread; setting a control on a group
    /// propagates to every synth in its subtree.
    fn set_control(&self, index: u32, value: f32) {
        let _ = (index, value);
    }
}

/// Whether a group schedules its children one after another or concurrently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupKind {
    /// Children execute in strict collection order.
    Sequential,
    /// Children execute in any relative order; only aggregate completion
    /// matters to anything downstream.
    Parallel,
}

/// Container bookkeeping for a group node.
pub(crate) struct GroupData {
    /// Fixed at construction; selects chain vs fan-out wiring at compile time.
    pub parallel: bool,
    /// First child in collection order.
    pub head: Option<Slot>,
    /// Last child in collection order.
    pub tail: Option<Slot>,
    /// Cached count of direct synth children.
    pub child_synths: usize,
    /// Cached count of direct group children.
    pub child_groups: usize,
}

impl GroupData {
    pub fn new(kind: GroupKind) -> Self {
        Self {
            parallel: matches!(kind, GroupKind::Parallel),
            head: None,
            tail: None,
            child_synths: 0,
            child_groups: 0,
        }
    }

    /// Number of direct children, from the cached counts.
    pub fn child_count(&self) -> usize {
        self.child_synths + self.child_groups
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub fn kind(&self) -> GroupKind {
        if self.parallel {
            GroupKind::Parallel
        } else {
            GroupKind::Sequential
        }
    }
}

/// The role of a node: leaf synth or container group.
pub(crate) enum NodeKind {
    /// Leaf performing signal processing. The `Arc` is cloned into queue
    /// items at compile time, which keeps the unit alive for any block still
    /// in flight even if the node is freed from the tree.
    Synth(Arc<dyn SynthUnit>),
    /// Ordered container of child nodes.
    Group(GroupData),
}

/// A node plus its structural links inside the tree.
pub(crate) struct NodeData {
    pub id: NodeId,
    pub kind: NodeKind,
    /// Non-owning back-reference; `None` for the root or a detached node.
    pub parent: Option<Slot>,
    /// Previous sibling within the parent's child collection.
    pub prev: Option<Slot>,
    /// Next sibling within the parent's child collection.
    pub next: Option<Slot>,
    /// Paused nodes stay in the tree and in the compiled wiring but their
    /// queue items skip the unit's `run`.
    pub paused: bool,
}

impl NodeData {
    pub fn is_synth(&self) -> bool {
        matches!(self.kind, NodeKind::Synth(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group(_))
    }

    pub fn group(&self) -> Option<&GroupData> {
        match &self.kind {
            NodeKind::Group(group) => Some(group),
            NodeKind::Synth(_) => None,
        }
    }

    pub fn group_mut(&mut self) -> Option<&mut GroupData> {
        match &mut self.kind {
            NodeKind::Group(group) => Some(group),
            NodeKind::Synth(_) => None,
        }
    }
}
