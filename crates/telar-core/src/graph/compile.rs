//! Thread-queue compiler: tree snapshot → dependency-ordered queue.
//!
//! Compilation walks the tree once, bottom-up and (inside sequential groups)
//! back-to-front, emitting one queue item per synth with a computed
//! activation limit (number of predecessor completions it must observe) and
//! a successor list (items to notify when it completes).
//!
//! The recursion contract: `fill_group` receives the successor set that
//! follows the group in its parent's chain and returns the group's *head
//! set* — the items still waiting for a predecessor, which the caller wires
//! as the successor set of whatever precedes the group. Each group compiles
//! without any knowledge of its surroundings, which is what makes the
//! bottom-up composition work.
//!
//! Wiring rules:
//!
//! - **Sequential group** — children form a strict chain in collection
//!   order: child *i*'s tail items become the predecessors of child *i+1*'s
//!   head items. The group exposes the head set of its first non-empty
//!   child, and its tail count is the tail count of its last child that
//!   emits any items.
//! - **Parallel group** — every child branch receives the same incoming
//!   activation limit and the same outgoing successor set; the group's head
//!   set is the union of the branches' head sets and its tail count is the
//!   sum of the branches' tail counts, so anything downstream waits for
//!   *all* branches.
//! - Groups that emit no items (empty, or nested empties all the way down)
//!   are transparent: their predecessor passes straight through to their
//!   successor, and tail counting skips them.
//!
//! Paused synths still become items — with the `paused` flag set, so the
//! runtime skips their `run` — because dropping them would change their
//! siblings' wiring.

use std::sync::Arc;

use crate::arena::Slot;

use super::node::{NodeData, NodeKind};
use super::queue::{CompiledQueue, QueueItem};
use super::tree::{NodeTree, TreeError};

impl NodeTree {
    /// Compiles the current tree into a [`CompiledQueue`].
    ///
    /// Visits every node under the root exactly once. The compiled queue is
    /// an immutable snapshot; later tree mutations do not affect it.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::MalformedGraph`] when a defensive structural
    /// check fails. The attach-time invariants make this unreachable through
    /// this API; the check bounds the damage if the tree is ever corrupted,
    /// since a failed compile must leave the previous queue usable.
    pub fn compile(&self) -> Result<CompiledQueue, TreeError> {
        let mut builder = QueueBuilder {
            tree: self,
            items: Vec::with_capacity(self.synth_count()),
            budget: self.node_count(),
        };
        let root = self.root_slot();
        let root_group = self
            .node_ref(root)
            .and_then(NodeData::group)
            .ok_or(TreeError::MalformedGraph("root is not a group"))?;
        if !root_group.is_empty() {
            builder.fill_group(root, Vec::new(), 0)?;
        }
        let queue = CompiledQueue::new(builder.items);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "queue_compile: {} items, {} roots",
            queue.len(),
            queue.roots().len()
        );
        Ok(queue)
    }
}

struct QueueBuilder<'a> {
    tree: &'a NodeTree,
    items: Vec<QueueItem>,
    /// Remaining node visits; exhausting it means a node was reached twice,
    /// which a well-formed forest cannot produce.
    budget: usize,
}

impl QueueBuilder<'_> {
    fn visit(&mut self) -> Result<(), TreeError> {
        if self.budget == 0 {
            return Err(TreeError::MalformedGraph(
                "compilation visited more nodes than the tree holds",
            ));
        }
        self.budget -= 1;
        Ok(())
    }

    /// Compiles a non-empty group. Returns its head set.
    fn fill_group(
        &mut self,
        slot: Slot,
        successors: Vec<u32>,
        activation_limit: u32,
    ) -> Result<Vec<u32>, TreeError> {
        self.visit()?;
        let group = self
            .tree
            .node_ref(slot)
            .and_then(NodeData::group)
            .ok_or(TreeError::MalformedGraph(
                "group node without a children collection",
            ))?;
        if group.parallel {
            self.fill_parallel(slot, &successors, activation_limit)
        } else {
            self.fill_sequential(slot, successors, activation_limit)
        }
    }

    /// Chain wiring: iterate children back to front so each child receives
    /// the following child's head set as its successor set.
    fn fill_sequential(
        &mut self,
        slot: Slot,
        mut successors: Vec<u32>,
        activation_limit: u32,
    ) -> Result<Vec<u32>, TreeError> {
        let tree = self.tree;
        let mut child = tree.node(slot).group().expect("checked by fill_group").tail;
        while let Some(c) = child {
            let node = tree.node(c);
            let prev = node.prev;
            let limit = self.left_activation_limit(prev, activation_limit)?;
            match &node.kind {
                NodeKind::Synth(_) => {
                    self.visit()?;
                    let item = self.push_item(c, successors, limit);
                    successors = vec![item];
                }
                NodeKind::Group(group) => {
                    if group.is_empty() {
                        self.visit()?;
                    } else {
                        successors = self.fill_group(c, successors, limit)?;
                    }
                }
            }
            child = prev;
        }
        Ok(successors)
    }

    /// Fan-out wiring: every branch shares the incoming limit and the
    /// outgoing successor set; the head sets union.
    fn fill_parallel(
        &mut self,
        slot: Slot,
        successors: &[u32],
        activation_limit: u32,
    ) -> Result<Vec<u32>, TreeError> {
        let tree = self.tree;
        let group = tree.node(slot).group().expect("checked by fill_group");
        let mut heads = Vec::with_capacity(group.child_count());
        let mut child = group.head;
        while let Some(c) = child {
            let node = tree.node(c);
            match &node.kind {
                NodeKind::Synth(_) => {
                    self.visit()?;
                    let item = self.push_item(c, successors.to_vec(), activation_limit);
                    heads.push(item);
                }
                NodeKind::Group(sub) => {
                    if sub.is_empty() {
                        self.visit()?;
                    } else {
                        let sub_heads =
                            self.fill_group(c, successors.to_vec(), activation_limit)?;
                        heads.extend(sub_heads);
                    }
                }
            }
            child = node.next;
        }
        Ok(heads)
    }

    fn push_item(&mut self, slot: Slot, successors: Vec<u32>, activation_limit: u32) -> u32 {
        let node = self.tree.node(slot);
        let NodeKind::Synth(unit) = &node.kind else {
            unreachable!("push_item is only called for synth nodes");
        };
        let index = self.items.len() as u32;
        self.items.push(QueueItem::new(
            Arc::clone(unit),
            node.id,
            node.paused,
            activation_limit,
            successors,
        ));
        index
    }

    /// Activation limit for a child: the tail count of the nearest sibling
    /// to its left that emits any items, or the group's incoming limit when
    /// no such sibling exists.
    fn left_activation_limit(
        &self,
        mut cursor: Option<Slot>,
        incoming: u32,
    ) -> Result<u32, TreeError> {
        let tree = self.tree;
        let mut fuel = tree.node_count() + 1;
        while let Some(slot) = cursor {
            if fuel == 0 {
                return Err(TreeError::MalformedGraph(
                    "sibling scan exceeded the tree's node count",
                ));
            }
            fuel -= 1;
            let node = tree.node(slot);
            match &node.kind {
                NodeKind::Synth(_) => return Ok(1),
                NodeKind::Group(_) => {
                    let tails = self.tail_count(slot)?;
                    if tails > 0 {
                        return Ok(tails);
                    }
                    cursor = node.prev;
                }
            }
        }
        Ok(incoming)
    }

    /// Number of items in a subtree with no successor inside it — the count
    /// a following item must use as its activation limit.
    ///
    /// A synth is its own tail (1). A parallel group's tails are the sum
    /// over its children, since every branch signals completion
    /// independently. A sequential group's tails are those of its last
    /// child that emits items; children emitting nothing are skipped, and a
    /// subtree emitting nothing at all counts 0.
    fn tail_count(&self, slot: Slot) -> Result<u32, TreeError> {
        let mut fuel = self.tree.node_count() + 1;
        self.tail_count_inner(slot, &mut fuel)
    }

    fn tail_count_inner(&self, slot: Slot, fuel: &mut usize) -> Result<u32, TreeError> {
        if *fuel == 0 {
            return Err(TreeError::MalformedGraph(
                "tail scan exceeded the tree's node count",
            ));
        }
        *fuel -= 1;
        let tree = self.tree;
        match &tree.node(slot).kind {
            NodeKind::Synth(_) => Ok(1),
            NodeKind::Group(group) if group.parallel => {
                let mut total = 0u32;
                let mut child = group.head;
                while let Some(c) = child {
                    total += self.tail_count_inner(c, fuel)?;
                    child = tree.node(c).next;
                }
                Ok(total)
            }
            NodeKind::Group(group) => {
                let mut child = group.tail;
                while let Some(c) = child {
                    let tails = self.tail_count_inner(c, fuel)?;
                    if tails > 0 {
                        return Ok(tails);
                    }
                    child = tree.node(c).prev;
                }
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::graph::node::{GroupKind, NodeId, SynthUnit};
    use crate::graph::tree::{NodeTree, Position};

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

    /// Index of the queue item referencing `node`.
    fn item_for(queue: &crate::CompiledQueue, node: NodeId) -> u32 {
        (0..queue.len() as u32)
            .find(|&i| queue.item(i).node() == node)
            .expect("node has a queue item")
    }

    #[test]
    fn empty_tree_compiles_to_empty_queue() {
        let tree = NodeTree::with_capacity(4);
        let queue = tree.compile().unwrap();
        assert!(queue.is_empty());
        assert!(queue.roots().is_empty());
    }

    #[test]
    fn sequential_children_form_a_chain() {
        let mut tree = NodeTree::with_capacity(8);
        for n in 1..=3 {
            tree.add_synth(id(n), synth(), NodeId::ROOT, Position::Tail)
                .unwrap();
        }
        let queue = tree.compile().unwrap();
        assert_eq!(queue.len(), 3);

        let a = item_for(&queue, id(1));
        let b = item_for(&queue, id(2));
        let c = item_for(&queue, id(3));
        assert_eq!(queue.item(a).activation_limit(), 0);
        assert_eq!(queue.item(a).successors(), &[b]);
        assert_eq!(queue.item(b).activation_limit(), 1);
        assert_eq!(queue.item(b).successors(), &[c]);
        assert_eq!(queue.item(c).activation_limit(), 1);
        assert!(queue.item(c).successors().is_empty());
        assert_eq!(queue.roots(), &[a]);
    }

    #[test]
    fn parallel_children_share_wiring() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Parallel, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        tree.add_synth(id(3), synth(), id(1), Position::Tail).unwrap();
        let queue = tree.compile().unwrap();
        assert_eq!(queue.len(), 2);

        let a = item_for(&queue, id(2));
        let b = item_for(&queue, id(3));
        assert_eq!(queue.item(a).activation_limit(), 0);
        assert_eq!(queue.item(b).activation_limit(), 0);
        assert!(queue.item(a).successors().is_empty());
        assert!(queue.item(b).successors().is_empty());
        assert_eq!(queue.roots().len(), 2);
    }

    #[test]
    fn node_after_parallel_group_waits_for_all_branches() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Parallel, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        tree.add_synth(id(3), synth(), id(1), Position::Tail).unwrap();
        tree.add_synth(id(4), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let queue = tree.compile().unwrap();

        let a = item_for(&queue, id(2));
        let b = item_for(&queue, id(3));
        let after = item_for(&queue, id(4));
        assert_eq!(queue.item(after).activation_limit(), 2);
        assert_eq!(queue.item(a).successors(), &[after]);
        assert_eq!(queue.item(b).successors(), &[after]);
    }

    #[test]
    fn empty_sequential_group_is_transparent() {
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(3), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let queue = tree.compile().unwrap();

        let a = item_for(&queue, id(1));
        let b = item_for(&queue, id(3));
        assert_eq!(queue.item(a).successors(), &[b]);
        assert_eq!(queue.item(b).activation_limit(), 1);
    }

    #[test]
    fn tail_count_skips_trailing_empty_groups() {
        // root: [ seq[B], seq[] , D ] — D's predecessor is B through the
        // trailing empty group.
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        tree.add_group(id(3), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(4), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let queue = tree.compile().unwrap();

        let b = item_for(&queue, id(2));
        let d = item_for(&queue, id(4));
        assert_eq!(queue.item(d).activation_limit(), 1);
        assert_eq!(queue.item(b).successors(), &[d]);
    }

    #[test]
    fn recursively_empty_group_is_transparent() {
        // root: [ A, seq[ seq[] ], B ] — the middle group is non-empty but
        // emits nothing; B must still wait for A alone.
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(3), GroupKind::Sequential, id(2), Position::Tail)
            .unwrap();
        tree.add_synth(id(4), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let queue = tree.compile().unwrap();

        let a = item_for(&queue, id(1));
        let b = item_for(&queue, id(4));
        assert_eq!(queue.item(b).activation_limit(), 1);
        assert_eq!(queue.item(a).successors(), &[b]);
    }

    #[test]
    fn nested_parallel_tail_counts_sum() {
        // root: [ par[ A, par[B, C] ], D ] — D waits for 3 completions.
        let mut tree = NodeTree::with_capacity(8);
        tree.add_group(id(1), GroupKind::Parallel, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        tree.add_group(id(3), GroupKind::Parallel, id(1), Position::Tail)
            .unwrap();
        tree.add_synth(id(4), synth(), id(3), Position::Tail).unwrap();
        tree.add_synth(id(5), synth(), id(3), Position::Tail).unwrap();
        tree.add_synth(id(6), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let queue = tree.compile().unwrap();

        let after = item_for(&queue, id(6));
        assert_eq!(queue.item(after).activation_limit(), 3);
        for n in [2, 4, 5] {
            let i = item_for(&queue, id(n));
            assert_eq!(queue.item(i).successors(), &[after]);
        }
    }

    #[test]
    fn sequential_subgroup_chains_with_siblings() {
        // root: [ A, seq[B, C], D ] — strict chain A → B → C → D.
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Sequential, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(3), synth(), id(2), Position::Tail).unwrap();
        tree.add_synth(id(4), synth(), id(2), Position::Tail).unwrap();
        tree.add_synth(id(5), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let queue = tree.compile().unwrap();

        let a = item_for(&queue, id(1));
        let b = item_for(&queue, id(3));
        let c = item_for(&queue, id(4));
        let d = item_for(&queue, id(5));
        assert_eq!(queue.item(a).successors(), &[b]);
        assert_eq!(queue.item(b).successors(), &[c]);
        assert_eq!(queue.item(c).successors(), &[d]);
        assert_eq!(queue.item(b).activation_limit(), 1);
        assert_eq!(queue.item(c).activation_limit(), 1);
        assert_eq!(queue.item(d).activation_limit(), 1);
        assert_eq!(queue.roots(), &[a]);
    }

    #[test]
    fn parallel_group_between_synths_fans_out_and_joins() {
        // root: [ A, par[B, C], D ] — A releases both branches, D joins them.
        let mut tree = NodeTree::with_capacity(8);
        tree.add_synth(id(1), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_group(id(2), GroupKind::Parallel, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(3), synth(), id(2), Position::Tail).unwrap();
        tree.add_synth(id(4), synth(), id(2), Position::Tail).unwrap();
        tree.add_synth(id(5), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();
        let queue = tree.compile().unwrap();

        let a = item_for(&queue, id(1));
        let b = item_for(&queue, id(3));
        let c = item_for(&queue, id(4));
        let d = item_for(&queue, id(5));
        let mut fanout = queue.item(a).successors().to_vec();
        fanout.sort_unstable();
        let mut expected = vec![b, c];
        expected.sort_unstable();
        assert_eq!(fanout, expected);
        assert_eq!(queue.item(b).activation_limit(), 1);
        assert_eq!(queue.item(c).activation_limit(), 1);
        assert_eq!(queue.item(d).activation_limit(), 2);
    }

    #[test]
    fn paused_synth_keeps_its_wiring() {
        let mut tree = NodeTree::with_capacity(8);
        for n in 1..=3 {
            tree.add_synth(id(n), synth(), NodeId::ROOT, Position::Tail)
                .unwrap();
        }
        tree.pause(id(2)).unwrap();
        let queue = tree.compile().unwrap();
        assert_eq!(queue.len(), 3, "paused synths still occupy queue items");

        let a = item_for(&queue, id(1));
        let b = item_for(&queue, id(2));
        let c = item_for(&queue, id(3));
        assert!(queue.item(b).is_paused());
        assert_eq!(queue.item(a).successors(), &[b]);
        assert_eq!(queue.item(b).successors(), &[c]);
    }

    #[test]
    fn repeated_compiles_are_identical() {
        let mut tree = NodeTree::with_capacity(16);
        tree.add_group(id(1), GroupKind::Parallel, NodeId::ROOT, Position::Tail)
            .unwrap();
        tree.add_synth(id(2), synth(), id(1), Position::Tail).unwrap();
        tree.add_synth(id(3), synth(), id(1), Position::Tail).unwrap();
        tree.add_synth(id(4), synth(), NodeId::ROOT, Position::Tail)
            .unwrap();

        let first = tree.compile().unwrap();
        let second = tree.compile().unwrap();
        assert_eq!(first.len(), second.len());
        for i in 0..first.len() as u32 {
            assert_eq!(first.item(i).node(), second.item(i).node());
            assert_eq!(
                first.item(i).activation_limit(),
                second.item(i).activation_limit()
            );
            assert_eq!(first.item(i).successors(), second.item(i).successors());
        }
    }
}
