//! Processing tree — mutation API, structural invariants, and queries.
//!
//! [`NodeTree`] is the control-thread side of the scheduling core. It owns
//! every node (synths and groups) in a pre-reserved arena, maintains the
//! ordered child collections as slot-index sibling links, and keeps the
//! per-group child counts cached so the hot mutation path never walks the
//! tree. Compilation reads the tree through `&NodeTree`, so Rust's borrow
//! rules serialize mutation against compilation — the exclusivity the
//! execution model requires, expressed in the type system.

use std::collections::HashMap;
use std::sync::Arc;

use crate::arena::{Arena, Slot};

use super::node::{GroupData, GroupKind, NodeData, NodeId, NodeKind, SynthUnit};

/// Errors reported by tree mutations and queue compilation.
///
/// All of these are protocol errors from the control layer, reported
/// synchronously to the caller; none of them can reach the worker path.
/// A failed operation leaves the tree unchanged.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// Attaching or moving here would break a structural invariant: the node
    /// already has a parent, the target lies inside the node's own subtree,
    /// or the node is the root group.
    #[error("attaching node {node} under {target} violates tree invariants")]
    InvariantViolation {
        /// Node being attached or moved.
        node: NodeId,
        /// Group it was to be placed under.
        target: NodeId,
    },

    /// The node is not a direct child of the group named in the call.
    #[error("node {node} is not a child of group {group}")]
    NotAChild {
        /// Node that was expected to be a child.
        node: NodeId,
        /// Group it was expected to be a child of.
        group: NodeId,
    },

    /// The operation requires the node to be attached to a parent.
    #[error("node {0} is not attached to any group")]
    NotAttached(NodeId),

    /// A sibling reference or index used for insertion does not resolve to a
    /// position within the target group's child collection.
    #[error("invalid insertion position in group {group}")]
    InvalidPosition {
        /// Group the insertion was aimed at.
        group: NodeId,
    },

    /// A defensive compile-time check failed; the tree no longer satisfies
    /// its structural invariants.
    #[error("malformed graph: {0}")]
    MalformedGraph(&'static str),

    /// The id does not name a live node — typically a stale handle held by
    /// the control layer.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The id names a synth where a group is required.
    #[error("node {0} is not a group")]
    NotAGroup(NodeId),

    /// The id is already in use by a live node.
    #[error("node id {0} is already in use")]
    DuplicateId(NodeId),

    /// The node arena is full.
    #[error("node capacity {0} exhausted")]
    CapacityExhausted(usize),
}

/// Where to insert a node within a group's ordered child collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Position {
    /// First child of the group.
    Head,
    /// Last child of the group.
    Tail,
    /// Immediately before the named sibling.
    Before(NodeId),
    /// Immediately after the named sibling.
    After(NodeId),
    /// At the numeric index; `Index(child_count)` appends.
    Index(usize),
}

/// The hierarchical processing tree: a forest of synths and groups rooted at
/// a sequential root group with id [`NodeId::ROOT`].
///
/// Mutations happen on the control thread; [`compile()`](NodeTree::compile)
/// turns the current tree into an immutable
/// [`CompiledQueue`](super::CompiledQueue) snapshot for the worker threads.
pub struct NodeTree {
    nodes: Arena<NodeData>,
    by_id: HashMap<NodeId, Slot>,
    root: Slot,
    /// Total live synths across the whole tree; sizes queue allocation.
    synth_count: usize,
}

impl NodeTree {
    /// Creates a tree holding at most `capacity` nodes, with a sequential
    /// root group at [`NodeId::ROOT`].
    ///
    /// All node storage is reserved here; mutations beyond `capacity` fail
    /// with [`TreeError::CapacityExhausted`] instead of allocating.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut nodes = Arena::with_capacity(capacity);
        let root = nodes
            .try_insert(NodeData {
                id: NodeId::ROOT,
                kind: NodeKind::Group(GroupData::new(GroupKind::Sequential)),
                parent: None,
                prev: None,
                next: None,
                paused: false,
            })
            .expect("arena sized for at least the root group");
        let mut by_id = HashMap::with_capacity(capacity);
        by_id.insert(NodeId::ROOT, root);
        Self {
            nodes,
            by_id,
            root,
            synth_count: 0,
        }
    }

    // --- Node creation ---

    /// Creates a synth node and attaches it at `position` within `group`.
    pub fn add_synth(
        &mut self,
        id: NodeId,
        unit: Arc<dyn SynthUnit>,
        group: NodeId,
        position: Position,
    ) -> Result<(), TreeError> {
        self.insert_node(id, NodeKind::Synth(unit), group, position)
    }

    /// Creates a group node and attaches it at `position` within `group`.
    pub fn add_group(
        &mut self,
        id: NodeId,
        kind: GroupKind,
        group: NodeId,
        position: Position,
    ) -> Result<(), TreeError> {
        self.insert_node(id, NodeKind::Group(GroupData::new(kind)), group, position)
    }

    fn insert_node(
        &mut self,
        id: NodeId,
        kind: NodeKind,
        group: NodeId,
        position: Position,
    ) -> Result<(), TreeError> {
        if self.by_id.contains_key(&id) {
            return Err(TreeError::DuplicateId(id));
        }
        let is_synth = matches!(kind, NodeKind::Synth(_));
        let parent = self.group_slot(group)?;
        let (prev, next) = self.resolve_position(parent, group, position)?;
        let slot = self
            .nodes
            .try_insert(NodeData {
                id,
                kind,
                parent: None,
                prev: None,
                next: None,
                paused: false,
            })
            .ok_or(TreeError::CapacityExhausted(self.nodes.capacity()))?;
        self.by_id.insert(id, slot);
        if is_synth {
            self.synth_count += 1;
        }
        self.attach_resolved(slot, parent, prev, next);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "tree_add: {} node {id} in group {group}",
            if is_synth { "synth" } else { "group" }
        );
        Ok(())
    }

    // --- Attach / detach ---

    /// Attaches a detached node at `position` within `group`.
    ///
    /// Fails with [`TreeError::InvariantViolation`] if the node already has a
    /// parent (double attach), is the root, or if `group` lies inside the
    /// node's own subtree (the attachment would create a cycle).
    pub fn attach(&mut self, id: NodeId, group: NodeId, position: Position) -> Result<(), TreeError> {
        let slot = self.slot(id)?;
        if slot == self.root || self.node(slot).parent.is_some() {
            return Err(TreeError::InvariantViolation { node: id, target: group });
        }
        let parent = self.group_slot(group)?;
        if self.is_descendant_of(parent, slot) {
            return Err(TreeError::InvariantViolation { node: id, target: group });
        }
        let (prev, next) = self.resolve_position(parent, group, position)?;
        self.attach_resolved(slot, parent, prev, next);
        #[cfg(feature = "tracing")]
        tracing::debug!("tree_attach: node {id} into group {group}");
        Ok(())
    }

    /// Detaches a node from its parent, leaving it alive but unattached.
    ///
    /// Detaching a node that has no parent is a no-op, not an error —
    /// lifecycle races from the control layer must not escalate.
    pub fn detach(&mut self, id: NodeId) -> Result<(), TreeError> {
        let slot = self.slot(id)?;
        self.unlink(slot);
        Ok(())
    }

    /// Detaches `node`, which must be a direct child of `group`.
    pub fn remove_child(&mut self, group: NodeId, node: NodeId) -> Result<(), TreeError> {
        let parent = self.group_slot(group)?;
        let slot = self.slot(node)?;
        if self.node(slot).parent != Some(parent) {
            return Err(TreeError::NotAChild { node, group });
        }
        self.unlink(slot);
        #[cfg(feature = "tracing")]
        tracing::debug!("tree_remove: node {node} from group {group}");
        Ok(())
    }

    /// Detaches a node and returns its storage (and, for a group, the
    /// storage of its entire subtree) to the arena.
    ///
    /// The root group cannot be freed.
    pub fn free(&mut self, id: NodeId) -> Result<(), TreeError> {
        let slot = self.slot(id)?;
        if slot == self.root {
            return Err(TreeError::InvariantViolation { node: id, target: id });
        }
        self.unlink(slot);
        self.release_subtree(slot);
        #[cfg(feature = "tracing")]
        tracing::debug!("tree_free: node {id}");
        Ok(())
    }

    /// Detaches a node and reattaches it at `position` within `group`.
    ///
    /// Fails with [`TreeError::InvariantViolation`] when moving the root or
    /// moving a group into its own subtree. A failed move leaves the node
    /// where it was.
    pub fn move_node(
        &mut self,
        id: NodeId,
        group: NodeId,
        position: Position,
    ) -> Result<(), TreeError> {
        let slot = self.slot(id)?;
        if slot == self.root {
            return Err(TreeError::InvariantViolation { node: id, target: group });
        }
        let parent = self.group_slot(group)?;
        if self.is_descendant_of(parent, slot) {
            return Err(TreeError::InvariantViolation { node: id, target: group });
        }
        // Validate the position against the collection as it will look once
        // the node is detached, so a failure cannot leave the node dangling.
        match position {
            Position::Before(sibling) | Position::After(sibling) => {
                if sibling == id {
                    return Err(TreeError::InvalidPosition { group });
                }
                let sibling_slot = self
                    .by_id
                    .get(&sibling)
                    .copied()
                    .ok_or(TreeError::InvalidPosition { group })?;
                if self.node(sibling_slot).parent != Some(parent) {
                    return Err(TreeError::InvalidPosition { group });
                }
            }
            Position::Index(index) => {
                let mut count = self.node(parent).group().map_or(0, GroupData::child_count);
                if self.node(slot).parent == Some(parent) {
                    count -= 1;
                }
                if index > count {
                    return Err(TreeError::InvalidPosition { group });
                }
            }
            Position::Head | Position::Tail => {}
        }
        self.unlink(slot);
        let (prev, next) = self.resolve_position(parent, group, position)?;
        self.attach_resolved(slot, parent, prev, next);
        #[cfg(feature = "tracing")]
        tracing::debug!("tree_move: node {id} into group {group}");
        Ok(())
    }

    // --- Bulk operations ---

    /// Detaches and releases every direct child of `group`.
    ///
    /// Both cached child counts are zero afterwards.
    pub fn clear_children(&mut self, group: NodeId) -> Result<(), TreeError> {
        let slot = self.group_slot(group)?;
        let mut child = self.node(slot).group().and_then(|g| g.head);
        while let Some(c) = child {
            let next = self.node(c).next;
            self.release_subtree(c);
            child = next;
        }
        let data = self.node_mut(slot).group_mut().expect("validated as group");
        data.head = None;
        data.tail = None;
        data.child_synths = 0;
        data.child_groups = 0;
        #[cfg(feature = "tracing")]
        tracing::debug!("tree_clear: group {group}");
        Ok(())
    }

    /// Removes every synth in the subtree of `group` (direct and nested),
    /// leaving group structure intact.
    ///
    /// Every group in the subtree has `child_synths == 0` afterwards.
    pub fn remove_synths_recursive(&mut self, group: NodeId) -> Result<(), TreeError> {
        let slot = self.group_slot(group)?;
        self.remove_synths_below(slot);
        #[cfg(feature = "tracing")]
        tracing::debug!("tree_clear_synths: group {group}");
        Ok(())
    }

    fn remove_synths_below(&mut self, slot: Slot) {
        let mut child = self.node(slot).group().and_then(|g| g.head);
        while let Some(c) = child {
            let next = self.node(c).next;
            if self.node(c).is_synth() {
                self.unlink(c);
                self.release_subtree(c);
            } else {
                self.remove_synths_below(c);
            }
            child = next;
        }
    }

    // --- Pause / resume ---

    /// Pauses a node; for a group, the signal propagates to every child.
    ///
    /// A paused synth keeps its structural position and its place in the
    /// compiled wiring, but its queue item skips the unit's `run`. The change
    /// is observed by the *next* compilation; a block already in flight runs
    /// to completion against the queue it was compiled with.
    pub fn pause(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.set_paused(id, true)
    }

    /// Resumes a node; for a group, the signal propagates to every child.
    pub fn resume(&mut self, id: NodeId) -> Result<(), TreeError> {
        self.set_paused(id, false)
    }

    fn set_paused(&mut self, id: NodeId, paused: bool) -> Result<(), TreeError> {
        let slot = self.slot(id)?;
        self.set_paused_below(slot, paused);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "tree_pause: node {id} {}",
            if paused { "paused" } else { "resumed" }
        );
        Ok(())
    }

    fn set_paused_below(&mut self, slot: Slot, paused: bool) {
        self.node_mut(slot).paused = paused;
        let mut child = self.node(slot).group().and_then(|g| g.head);
        while let Some(c) = child {
            self.set_paused_below(c, paused);
            child = self.node(c).next;
        }
    }

    // --- Controls ---

    /// Forwards a control update to a synth, or to every synth in a group's
    /// subtree.
    pub fn set_control(&self, id: NodeId, index: u32, value: f32) -> Result<(), TreeError> {
        let slot = self.slot(id)?;
        self.set_control_below(slot, index, value);
        Ok(())
    }

    fn set_control_below(&self, slot: Slot, index: u32, value: f32) {
        match &self.node(slot).kind {
            NodeKind::Synth(unit) => unit.set_control(index, value),
            NodeKind::Group(group) => {
                let mut child = group.head;
                while let Some(c) = child {
                    self.set_control_below(c, index, value);
                    child = self.node(c).next;
                }
            }
        }
    }

    // --- Structural queries ---

    /// Returns the node's next sibling, or `None` at the end of the
    /// collection. Fails with [`TreeError::NotAttached`] for a node without
    /// a parent.
    pub fn next_sibling(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        let slot = self.slot(id)?;
        let node = self.node(slot);
        if node.parent.is_none() {
            return Err(TreeError::NotAttached(id));
        }
        Ok(node.next.map(|s| self.node(s).id))
    }

    /// Returns the node's previous sibling, or `None` at the start of the
    /// collection. Fails with [`TreeError::NotAttached`] for a node without
    /// a parent.
    pub fn previous_sibling(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        let slot = self.slot(id)?;
        let node = self.node(slot);
        if node.parent.is_none() {
            return Err(TreeError::NotAttached(id));
        }
        Ok(node.prev.map(|s| self.node(s).id))
    }

    /// Returns the node's parent group, or `None` for the root or a detached
    /// node.
    pub fn parent_of(&self, id: NodeId) -> Result<Option<NodeId>, TreeError> {
        let slot = self.slot(id)?;
        Ok(self.node(slot).parent.map(|s| self.node(s).id))
    }

    /// Returns whether the id names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// Returns whether the node is a group. `false` for unknown ids.
    pub fn is_group(&self, id: NodeId) -> bool {
        self.by_id
            .get(&id)
            .is_some_and(|&slot| self.node(slot).is_group())
    }

    /// Returns whether the node is paused. `false` for unknown ids.
    pub fn is_paused(&self, id: NodeId) -> bool {
        self.by_id
            .get(&id)
            .is_some_and(|&slot| self.node(slot).paused)
    }

    /// Returns a group's scheduling kind.
    pub fn group_kind(&self, id: NodeId) -> Result<GroupKind, TreeError> {
        let slot = self.group_slot(id)?;
        Ok(self.node(slot).group().expect("validated as group").kind())
    }

    /// Returns the cached `(synths, groups)` counts of a group's direct
    /// children. O(1).
    pub fn child_count(&self, group: NodeId) -> Result<(usize, usize), TreeError> {
        let slot = self.group_slot(group)?;
        let data = self.node(slot).group().expect("validated as group");
        Ok((data.child_synths, data.child_groups))
    }

    /// Returns `(synths, groups)` summed over the group's entire subtree.
    ///
    /// Walks the subtree; fine on the control path, not meant for per-block
    /// use.
    pub fn child_count_deep(&self, group: NodeId) -> Result<(usize, usize), TreeError> {
        let slot = self.group_slot(group)?;
        Ok(self.count_deep(slot))
    }

    fn count_deep(&self, slot: Slot) -> (usize, usize) {
        let data = self.node(slot).group().expect("count_deep called on group");
        let mut synths = data.child_synths;
        let mut groups = data.child_groups;
        let mut child = data.head;
        while let Some(c) = child {
            if self.node(c).is_group() {
                let (s, g) = self.count_deep(c);
                synths += s;
                groups += g;
            }
            child = self.node(c).next;
        }
        (synths, groups)
    }

    /// Returns whether the group or any nested group directly contains a
    /// synth. Walks the subtree; control path only.
    pub fn has_synth_descendants(&self, group: NodeId) -> Result<bool, TreeError> {
        let slot = self.group_slot(group)?;
        Ok(self.has_synth_below(slot))
    }

    fn has_synth_below(&self, slot: Slot) -> bool {
        let mut child = self.node(slot).group().and_then(|g| g.head);
        while let Some(c) = child {
            let node = self.node(c);
            if node.is_synth() || self.has_synth_below(c) {
                return true;
            }
            child = node.next;
        }
        false
    }

    /// Iterates a group's direct children in collection order.
    pub fn children(&self, group: NodeId) -> Result<Children<'_>, TreeError> {
        let slot = self.group_slot(group)?;
        Ok(Children {
            tree: self,
            cursor: self.node(slot).group().expect("validated as group").head,
        })
    }

    /// Total number of live nodes, including the root group.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of live synths across the whole tree.
    pub fn synth_count(&self) -> usize {
        self.synth_count
    }

    /// Maximum number of nodes the tree can hold.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    // --- Internal plumbing ---

    fn slot(&self, id: NodeId) -> Result<Slot, TreeError> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or(TreeError::UnknownNode(id))
    }

    fn group_slot(&self, id: NodeId) -> Result<Slot, TreeError> {
        let slot = self.slot(id)?;
        if !self.node(slot).is_group() {
            return Err(TreeError::NotAGroup(id));
        }
        Ok(slot)
    }

    pub(crate) fn node(&self, slot: Slot) -> &NodeData {
        self.nodes.get(slot).expect("slot out of sync with id map")
    }

    fn node_mut(&mut self, slot: Slot) -> &mut NodeData {
        self.nodes
            .get_mut(slot)
            .expect("slot out of sync with id map")
    }

    pub(crate) fn node_ref(&self, slot: Slot) -> Option<&NodeData> {
        self.nodes.get(slot)
    }

    pub(crate) fn root_slot(&self) -> Slot {
        self.root
    }

    /// Walks the parent chain from `candidate`; true when `ancestor` is on
    /// it (including `candidate == ancestor`).
    fn is_descendant_of(&self, candidate: Slot, ancestor: Slot) -> bool {
        let mut cursor = Some(candidate);
        while let Some(slot) = cursor {
            if slot == ancestor {
                return true;
            }
            cursor = self.node(slot).parent;
        }
        false
    }

    /// Resolves a position within `parent` into the `(prev, next)` neighbor
    /// pair the new node will sit between.
    fn resolve_position(
        &self,
        parent: Slot,
        group: NodeId,
        position: Position,
    ) -> Result<(Option<Slot>, Option<Slot>), TreeError> {
        let data = self.node(parent).group().expect("validated as group");
        match position {
            Position::Head => Ok((None, data.head)),
            Position::Tail => Ok((data.tail, None)),
            Position::Before(sibling) => {
                let slot = self.sibling_slot(parent, group, sibling)?;
                Ok((self.node(slot).prev, Some(slot)))
            }
            Position::After(sibling) => {
                let slot = self.sibling_slot(parent, group, sibling)?;
                Ok((Some(slot), self.node(slot).next))
            }
            Position::Index(index) => {
                if index > data.child_count() {
                    return Err(TreeError::InvalidPosition { group });
                }
                let mut prev = None;
                let mut next = data.head;
                for _ in 0..index {
                    let slot = next.expect("index within cached child count");
                    prev = Some(slot);
                    next = self.node(slot).next;
                }
                Ok((prev, next))
            }
        }
    }

    fn sibling_slot(&self, parent: Slot, group: NodeId, sibling: NodeId) -> Result<Slot, TreeError> {
        let slot = self
            .by_id
            .get(&sibling)
            .copied()
            .ok_or(TreeError::InvalidPosition { group })?;
        if self.node(slot).parent != Some(parent) {
            return Err(TreeError::InvalidPosition { group });
        }
        Ok(slot)
    }

    /// Splices `slot` between `prev` and `next` inside `parent` and updates
    /// the cached counts.
    fn attach_resolved(&mut self, slot: Slot, parent: Slot, prev: Option<Slot>, next: Option<Slot>) {
        let is_synth = self.node(slot).is_synth();
        {
            let node = self.node_mut(slot);
            node.parent = Some(parent);
            node.prev = prev;
            node.next = next;
        }
        match prev {
            Some(p) => self.node_mut(p).next = Some(slot),
            None => {
                self.node_mut(parent)
                    .group_mut()
                    .expect("parent is a group")
                    .head = Some(slot);
            }
        }
        match next {
            Some(n) => self.node_mut(n).prev = Some(slot),
            None => {
                self.node_mut(parent)
                    .group_mut()
                    .expect("parent is a group")
                    .tail = Some(slot);
            }
        }
        let data = self
            .node_mut(parent)
            .group_mut()
            .expect("parent is a group");
        if is_synth {
            data.child_synths += 1;
        } else {
            data.child_groups += 1;
        }
    }

    /// Unlinks `slot` from its parent's child collection and updates the
    /// cached counts. No-op when the node has no parent.
    fn unlink(&mut self, slot: Slot) {
        let (parent, prev, next, is_synth) = {
            let node = self.node(slot);
            (node.parent, node.prev, node.next, node.is_synth())
        };
        let Some(parent) = parent else { return };
        match prev {
            Some(p) => self.node_mut(p).next = next,
            None => {
                self.node_mut(parent)
                    .group_mut()
                    .expect("parent is a group")
                    .head = next;
            }
        }
        match next {
            Some(n) => self.node_mut(n).prev = prev,
            None => {
                self.node_mut(parent)
                    .group_mut()
                    .expect("parent is a group")
                    .tail = prev;
            }
        }
        {
            let data = self
                .node_mut(parent)
                .group_mut()
                .expect("parent is a group");
            if is_synth {
                data.child_synths -= 1;
            } else {
                data.child_groups -= 1;
            }
        }
        let node = self.node_mut(slot);
        node.parent = None;
        node.prev = None;
        node.next = None;
    }

    /// Returns a detached node's storage — and, for a group, its whole
    /// subtree's — to the arena.
    fn release_subtree(&mut self, slot: Slot) {
        let mut child = self.node(slot).group().and_then(|g| g.head);
        while let Some(c) = child {
            let next = self.node(c).next;
            self.release_subtree(c);
            child = next;
        }
        let node = self
            .nodes
            .remove(slot)
            .expect("released slot out of sync with id map");
        self.by_id.remove(&node.id);
        if node.is_synth() {
            self.synth_count -= 1;
        }
    }
}

/// Iterator over a group's direct children, in collection order.
pub struct Children<'a> {
    tree: &'a NodeTree,
    cursor: Option<Slot>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let slot = self.cursor?;
        let node = self.tree.node(slot);
        self.cursor = node.next;
        Some(node.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullUnit;

    impl SynthUnit for NullUnit {
        fn run(&self) {}
    }

    fn synth() -> Arc<dyn SynthUnit> {
        Arc::new(NullUnit)
    }

    fn id(n: u32) -> NodeId {
        NodeId(n)
    }

    #[test]
    fn root_group_exists() {
        let tree = NodeTree::with_capacity(8);
        assert!(tree.contains(NodeId::ROOT));
        assert!(tree.is_group(NodeId::ROOT));
        assert_eq!(tree.group_kind(NodeId::ROOT).unwrap(), GroupKind::Sequential);
        assert_eq!(tree.child_count(NodeId::ROOT).unwrap(), (0, 0));
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.capacity(), 8);
    }

    #[test]
    fn add_maintains_cached_counts() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Parallel, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(3), synth(), id(2), Position::Tail).unwrap();
        assert_eq!(tree.child_count(NodeId::ROOT).unwrap(), (1, 1));
        assert_eq!(tree.child_count(id(2)).unwrap(), (1, 0));
        assert_eq!(tree.child_count_deep(NodeId::ROOT).unwrap(), (2, 1));
        assert_eq!(tree.synth_count(), 2);
    }

    #[test]
    fn positional_insertion_orders_children() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), NodeId::ROOT, Position::Head)
            .unwrap();
        tree.add_synth(id(3), synth(), NodeId::ROOT, Position::After(id(2)))
            .unwrap();
        tree.add_synth(id(4), synth(), NodeId::ROOT, Position::Before(id(1)))
            .unwrap();
        tree.add_synth(id(5), synth(), NodeId::ROOT, Position::Index(0))
            .unwrap();
        let order: Vec<NodeId> = tree.children(NodeId::ROOT).unwrap().collect();
        assert_eq!(order, vec![id(5), id(2), id(3), id(4), id(1)]);
    }

    #[test]
    fn sibling_navigation() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        assert_eq!(tree.next_sibling(id(1)).unwrap(), Some(id(2)));
        assert_eq!(tree.previous_sibling(id(2)).unwrap(), Some(id(1)));
        assert_eq!(tree.next_sibling(id(2)).unwrap(), None);
        assert_eq!(tree.previous_sibling(id(1)).unwrap(), None);
        assert!(matches!(
            tree.next_sibling(NodeId::ROOT),
            Err(TreeError::NotAttached(_))
        ));
    }

    #[test]
    fn invalid_position_rejects_foreign_sibling() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        // Node 2 is a child of group 1, not of the root.
        let err = tree
            .add_synth(id(3), synth(), NodeId::ROOT, Position::Before(id(2)))
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidPosition { .. }));
        assert!(!tree.contains(id(3)));
    }

    #[test]
    fn index_past_child_count_is_invalid() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        assert!(tree
            .add_synth(id(2), synth(), NodeId::ROOT, Position::Index(1))
            .is_ok());
        let err = tree
            .add_synth(id(3), synth(), NodeId::ROOT, Position::Index(5))
            .unwrap_err();
        assert!(matches!(err, TreeError::InvalidPosition { .. }));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let err = tree
            .add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap_err();
        assert!(matches!(err, TreeError::DuplicateId(_)));
    }

    #[test]
    fn detach_of_detached_node_is_noop() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.detach(id(1)).unwrap();
        assert_eq!(tree.child_count(NodeId::ROOT).unwrap(), (0, 0));
        // Second detach: no-op, counts untouched.
        tree.detach(id(1)).unwrap();
        assert_eq!(tree.child_count(NodeId::ROOT).unwrap(), (0, 0));
        assert!(tree.contains(id(1)));
    }

    #[test]
    fn double_attach_is_an_invariant_violation() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let err = tree.attach(id(2), id(1), Position::Tail).unwrap_err();
        assert!(matches!(err, TreeError::InvariantViolation { .. }));
    }

    #[test]
    fn moving_group_into_own_subtree_is_rejected() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Sequential, id(1), Position::Tail)
            .unwrap();
        let err = tree.move_node(id(1), id(2), Position::Tail).unwrap_err();
        assert!(matches!(err, TreeError::InvariantViolation { .. }));
        // Unchanged: group 1 still under the root.
        assert_eq!(tree.parent_of(id(1)).unwrap(), Some(NodeId::ROOT));
    }

    #[test]
    fn move_within_parent_reorders() {
        let mut tree = NodeTree::with_capacity(8);
        for n in 1..=3 {
            tree.add_synth(id(n), synth(), NodeId::ROOT, Position::Tail)
                .unwrap();
        }
        tree.move_node(id(3), NodeId::ROOT, Position::Head).unwrap();
        let order: Vec<NodeId> = tree.children(NodeId::ROOT).unwrap().collect();
        assert_eq!(order, vec![id(3), id(1), id(2)]);
        assert_eq!(tree.child_count(NodeId::ROOT).unwrap(), (3, 0));
    }

    #[test]
    fn free_reclaims_subtree_storage() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        tree.add_synth(id(3), synth(), id(1), Position::Tail).unwrap();
        tree.free(id(1)).unwrap();
        assert!(!tree.contains(id(1)));
        assert!(!tree.contains(id(2)));
        assert!(!tree.contains(id(3)));
        assert_eq!(tree.node_count(), 1);
        assert_eq!(tree.synth_count(), 0);
    }

    #[test]
    fn freeing_the_root_is_rejected() {
        let mut tree = NodeTree::with_capacity(8);
        assert!(matches!(
            tree.free(NodeId::ROOT),
            Err(TreeError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn clear_children_zeroes_counts() {
        let mut tree = NodeTree::with_capacity(16);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Parallel, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(3), synth(), id(2), Position::Tail).unwrap();
        tree.clear_children(NodeId::ROOT).unwrap();
        assert_eq!(tree.child_count(NodeId::ROOT).unwrap(), (0, 0));
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn remove_synths_recursive_preserves_groups() {
        let mut tree = NodeTree::with_capacity(16);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(3), synth(), id(2), Position::Tail).unwrap();
        tree.add_group(id(4), GroupKind::Parallel, id(2), Position::Tail)
            .unwrap();
        tree.add_synth(id(5), synth(), id(4), Position::Tail).unwrap();
        tree.remove_synths_recursive(NodeId::ROOT).unwrap();
        assert_eq!(tree.synth_count(), 0);
        assert!(tree.contains(id(2)));
        assert!(tree.contains(id(4)));
        assert_eq!(tree.child_count(NodeId::ROOT).unwrap(), (0, 1));
        assert_eq!(tree.child_count(id(2)).unwrap(), (0, 1));
        assert_eq!(tree.child_count(id(4)).unwrap(), (0, 0));
    }

    #[test]
    fn pause_propagates_to_subtree() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        tree.pause(id(1)).unwrap();
        assert!(tree.is_paused(id(1)));
        assert!(tree.is_paused(id(2)));
        tree.resume(id(2)).unwrap();
        assert!(!tree.is_paused(id(2)));
        assert!(tree.is_paused(id(1)));
    }

    #[test]
    fn has_synth_descendants_sees_nested_synths() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Sequential, id(1), Position::Tail)
            .unwrap();
        assert!(!tree.has_synth_descendants(id(1)).unwrap());
        tree.add_synth(id(3), synth(), id(2), Position::Tail).unwrap();
        assert!(tree.has_synth_descendants(id(1)).unwrap());
    }

    #[test]
    fn capacity_exhaustion_is_reported() {
        let mut tree = NodeTree::with_capacity(2);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let err = tree
            .add_synth(id(2), synth(), NodeId::ROOT, Position::Tail)
            .unwrap_err();
        assert!(matches!(err, TreeError::CapacityExhausted(2)));
    }
}
