//! Telar Core - node-graph scheduling for a real-time multicore synthesis
//! server.
//!
//! This crate is the scheduling heart of a synthesis server: it maintains a
//! hierarchical tree of processing units and compiles it, once per control
//! update, into a flat dependency-ordered queue that worker threads drain
//! during the audio callback. The DSP inside a synth, the control protocol,
//! and the audio device layer are external collaborators — this crate only
//! decides *what runs when, on which thread*.
//!
//! # Core Abstractions
//!
//! ## Tree
//!
//! - [`NodeTree`] - the control-thread hierarchy of synths and groups
//! - [`SynthUnit`] - opaque leaf computation, invoked as "run this node"
//! - [`GroupKind`] - sequential (strict order) vs parallel (free concurrency)
//! - [`Position`] - head/tail/before/after/index insertion constraints
//!
//! ## Compiled queue
//!
//! - [`CompiledQueue`] - immutable per-epoch execution plan
//! - [`QueueItem`] - one synth with an activation limit and successor links
//!
//! ## Runtime
//!
//! - [`Scheduler`] - cached compilation + lock-free queue publication
//! - [`QueueHandle`] - wait-free access to the current queue for the driver
//! - [`WorkerPool`] - persistent workers draining one queue per block
//!
//! # Real-time discipline
//!
//! Node storage is reserved once at startup; mutations and compilation run
//! on the control thread; the per-block path touches only the compiled
//! queue's atomic counters. Items signal their successors with a single
//! `AcqRel` decrement, so two workers finishing sibling branches of a
//! parallel group race safely: exactly one observes the transition to zero
//! and publishes the successor, exactly once.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use telar_core::{NodeId, Position, Scheduler, SynthUnit, WorkerPool};
//!
//! struct Silence;
//! impl SynthUnit for Silence {
//!     fn run(&self) {}
//! }
//!
//! let mut scheduler = Scheduler::with_capacity(64);
//! scheduler.add_synth(NodeId(1), Arc::new(Silence), NodeId::ROOT, Position::Tail)?;
//! let queue = scheduler.commit()?;
//!
//! let pool = WorkerPool::new(2);
//! pool.run_epoch(&queue);
//! # Ok::<(), telar_core::TreeError>(())
//! ```

mod arena;
pub mod exec;
pub mod graph;

pub use exec::WorkerPool;
pub use graph::{
    Children, CompiledQueue, GroupKind, NodeId, NodeTree, Position, QueueHandle, QueueItem,
    Scheduler, SynthUnit, TreeError,
};
