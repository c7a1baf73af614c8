//! Worker pool for async native calls.
//!
//! `size` long-lived threads drain one bounded crossbeam channel of
//! `size * 4` slots, so queuing a call is a channel send plus a oneshot
//! channel for the result. The queue is FIFO: calls submitted from one
//! thread are picked up in submission order. A full queue blocks the
//! submitter. Completion order across workers is unspecified.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, trace};

pub use crossbeam_channel::{RecvError, RecvTimeoutError, TryRecvError};

/// Slots in the submission queue per worker
const QUEUE_SLOTS_PER_WORKER: usize = 4;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    /// `None` once closed; dropping the sender wakes idle workers
    queue: RwLock<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: Arc<AtomicBool>,
    size: usize,
}

impl WorkerPool {
    /// Start `size` workers (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (queue, jobs) = bounded::<Job>(size * QUEUE_SLOTS_PER_WORKER);
        let closed = Arc::new(AtomicBool::new(false));

        let workers = (0..size)
            .map(|id| {
                let jobs = jobs.clone();
                let closed = Arc::clone(&closed);
                thread::Builder::new()
                    .name(format!("native-call-{}", id))
                    .spawn(move || run_worker(id, jobs, closed))
                    .expect("failed to spawn native call worker thread")
            })
            .collect();

        debug!(target: "nativebridge::dispatch::pool", size, "Worker pool started");

        WorkerPool {
            queue: RwLock::new(Some(queue)),
            workers: Mutex::new(workers),
            closed,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Queue `call`; `None` once the pool has been shut down
    pub fn submit<F, R>(&self, call: F) -> Option<Completion<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done, result) = bounded(1);
        let job: Job = Box::new(move || {
            // Nobody may be waiting any more
            let _ = done.send(call());
        });

        let queue = self.queue.read();
        queue.as_ref()?.send(job).ok()?;
        Some(Completion { result })
    }

    /// Close the queue and join the workers. Running calls finish; queued
    /// calls no worker picked up are dropped and their completions
    /// disconnect.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.queue.write().take();

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
        debug!(target: "nativebridge::dispatch::pool", "Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.get_mut().is_empty() {
            self.shutdown();
        }
    }
}

fn run_worker(id: usize, jobs: Receiver<Job>, closed: Arc<AtomicBool>) {
    while let Ok(job) = jobs.recv() {
        // After shutdown keep draining, so submitters blocked on a full queue
        // get through and their completions disconnect
        if closed.load(Ordering::SeqCst) {
            continue;
        }
        trace!(target: "nativebridge::dispatch::pool", worker = id, "Running queued call");
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!(target: "nativebridge::dispatch::pool", worker = id, "Queued call panicked");
        }
    }
}

/// Oneshot result of a submitted call
pub struct Completion<T> {
    result: Receiver<T>,
}

impl<T> Completion<T> {
    /// Block until the call has returned
    pub fn recv(&self) -> Result<T, RecvError> {
        self.result.recv()
    }

    /// Block for at most `timeout`; on `Timeout` the call keeps running and
    /// the completion can be waited on again
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.result.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.result.try_recv()
    }
}
