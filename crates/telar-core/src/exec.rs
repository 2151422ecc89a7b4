//! Persistent worker pool draining one compiled queue per audio block.
//!
//! Workers are spawned once at startup and parked on a channel between
//! blocks — no thread spawning on the block path. Each
//! [`run_epoch()`](WorkerPool::run_epoch) seeds a shared lock-free ready set
//! with the queue's root items and wakes every worker; workers (and the
//! calling driver thread, which joins the drain) pop item indices, run the
//! synth, and push any successor whose activation count reached zero. The
//! epoch ends when every item has executed exactly once.
//!
//! ```text
//! Driver                     Worker 1        Worker N
//!   | seed roots                 |               |
//!   |--[epoch]------------------>|               |
//!   |--[epoch]---------------------------------->|
//!   |   pop/run/complete      pop/run         pop/run
//!   |<-----[ack]-----------------|               |
//!   |<-----[ack]---------------------------------|
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvError, Sender, bounded};
use crossbeam_queue::SegQueue;

use crate::graph::CompiledQueue;

/// Work sent to worker threads.
enum WorkItem {
    /// Drain the shared ready set against this queue until it is exhausted.
    Epoch(Arc<CompiledQueue>),
    /// Shutdown signal.
    Shutdown,
}

/// A single worker thread.
struct Worker {
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    fn new(
        id: usize,
        work_rx: Receiver<WorkItem>,
        ack_tx: Sender<()>,
        ready: Arc<SegQueue<u32>>,
    ) -> Worker {
        let thread = thread::Builder::new()
            .name(format!("dsp-worker-{id}"))
            .spawn(move || Worker::run(&work_rx, &ack_tx, &ready))
            .expect("failed to spawn worker thread");
        Worker {
            thread: Some(thread),
        }
    }

    fn run(work_rx: &Receiver<WorkItem>, ack_tx: &Sender<()>, ready: &SegQueue<u32>) {
        loop {
            match work_rx.recv() {
                Ok(WorkItem::Epoch(queue)) => {
                    drain(ready, &queue);
                    if ack_tx.send(()).is_err() {
                        break;
                    }
                }
                Ok(WorkItem::Shutdown) | Err(RecvError) => break,
            }
        }
    }
}

/// Pops ready items and runs them until the queue reports exhaustion.
///
/// An empty ready set does not mean the epoch is over — another thread may
/// still be running an item whose completion publishes more work — so idle
/// threads spin with a yield until the executed count covers every item.
fn drain(ready: &SegQueue<u32>, queue: &CompiledQueue) {
    loop {
        match ready.pop() {
            Some(index) => {
                queue.run_item(index);
                queue.complete(index, |next| ready.push(next));
            }
            None => {
                if queue.is_exhausted() {
                    return;
                }
                thread::yield_now();
            }
        }
    }
}

/// Persistent pool of workers that drain compiled queues.
pub struct WorkerPool {
    workers: Vec<Worker>,
    work_tx: Sender<WorkItem>,
    ack_rx: Receiver<()>,
    ready: Arc<SegQueue<u32>>,
    num_workers: usize,
}

impl WorkerPool {
    /// Creates a pool with `num_workers` worker threads.
    ///
    /// The driver thread participates in every drain, so `num_workers + 1`
    /// threads execute each epoch.
    ///
    /// # Panics
    ///
    /// Panics if `num_workers` is 0.
    pub fn new(num_workers: usize) -> Self {
        assert!(num_workers > 0, "need at least 1 worker");

        let (work_tx, work_rx) = bounded(num_workers);
        let (ack_tx, ack_rx) = bounded(num_workers);
        let ready = Arc::new(SegQueue::new());

        let workers = (0..num_workers)
            .map(|id| Worker::new(id, work_rx.clone(), ack_tx.clone(), Arc::clone(&ready)))
            .collect();

        #[cfg(feature = "tracing")]
        tracing::debug!("worker_pool: spawned {num_workers} workers");

        WorkerPool {
            workers,
            work_tx,
            ack_rx,
            ready,
            num_workers,
        }
    }

    /// Creates a pool sized for the machine: one worker per CPU, minus one
    /// core reserved for the driving audio thread.
    pub fn with_default_size() -> Self {
        Self::new(num_cpus::get().saturating_sub(1).max(1))
    }

    /// Number of worker threads (not counting the driver).
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Runs one epoch: every item in `queue` executes exactly once, with all
    /// predecessor constraints observed. Blocks until the queue is
    /// exhausted.
    pub fn run_epoch(&self, queue: &Arc<CompiledQueue>) {
        if queue.is_empty() {
            return;
        }
        queue.reset();
        for &root in queue.roots() {
            self.ready.push(root);
        }
        for _ in 0..self.num_workers {
            self.work_tx
                .send(WorkItem::Epoch(Arc::clone(queue)))
                .expect("worker channel closed");
        }

        drain(&self.ready, queue);

        for _ in 0..self.num_workers {
            let _ = self.ack_rx.recv();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for _ in 0..self.num_workers {
            let _ = self.work_tx.send(WorkItem::Shutdown);
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}
