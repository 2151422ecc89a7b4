//! Node tree and thread-queue compiler for the scheduling core.
//!
//! The graph module turns a user-editable hierarchy of synths and groups
//! into a flat, dependency-ordered execution queue: edit the tree at
//! mutation time (add/move/free/pause), compile to a [`CompiledQueue`]
//! snapshot, drain that snapshot once per audio block across a pool of
//! worker threads with zero allocations.
//!
//! # Architecture
//!
//! The system uses a **two-object split**:
//!
//! - [`NodeTree`] — owned by the control thread. Holds the hierarchy
//!   (synths, sequential and parallel groups), performs mutations, runs
//!   [`compile()`](NodeTree::compile). NOT touched by the worker threads.
//! - [`CompiledQueue`] — immutable wiring plus per-epoch atomic activation
//!   counters. Shared with the worker threads via `Arc`; they never see
//!   partial state.
//!
//! Because compilation borrows the tree (`&NodeTree`) and mutation needs
//! `&mut NodeTree`, the two can never overlap — the exclusive-access
//! requirement of the execution model is enforced by the borrow checker
//! rather than a lock.
//!
//! # Ordering semantics
//!
//! A **sequential group** runs its children in strict collection order:
//! each child's compiled subtree must complete before the next child
//! becomes runnable. A **parallel group** runs its children in any order,
//! concurrently if workers are available; anything scheduled after the
//! group waits for *all* of its branches. Groups nest freely and empty
//! groups are transparent to their neighbors.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use telar_core::{GroupKind, NodeId, NodeTree, Position, SynthUnit};
//!
//! struct Silence;
//! impl SynthUnit for Silence {
//!     fn run(&self) {}
//! }
//!
//! let mut tree = NodeTree::with_capacity(16);
//! // A source synth, then a parallel pair of effects, then a mixer.
//! tree.add_synth(NodeId(1), Arc::new(Silence), NodeId::ROOT, Position::Tail)?;
//! tree.add_group(NodeId(2), GroupKind::Parallel, NodeId::ROOT, Position::Tail)?;
//! tree.add_synth(NodeId(3), Arc::new(Silence), NodeId(2), Position::Tail)?;
//! tree.add_synth(NodeId(4), Arc::new(Silence), NodeId(2), Position::Tail)?;
//! tree.add_synth(NodeId(5), Arc::new(Silence), NodeId::ROOT, Position::Tail)?;
//!
//! let queue = tree.compile()?;
//! assert_eq!(queue.len(), 4);
//! queue.run_inline();
//! # Ok::<(), telar_core::TreeError>(())
//! ```

mod compile;
pub mod engine;
pub mod node;
pub mod queue;
pub mod tree;

pub use engine::{QueueHandle, Scheduler};
pub use node::{GroupKind, NodeId, SynthUnit};
pub use queue::{CompiledQueue, QueueItem};
pub use tree::{Children, NodeTree, Position, TreeError};
