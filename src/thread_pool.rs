//! Bounded worker pool for threaded blocks
//!
//! The pool never buffers more work than it has idle workers: when every
//! worker is busy, [`ThreadPool::invoke`] runs the task on the calling thread
//! instead of queueing it.

use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Where a task ended up running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to an idle worker
    Queued,
    /// Run on the caller's thread
    Inline,
}

struct PoolState {
    queue: VecDeque<Task>,
    idle: usize,
    running: bool,
}

struct Shared {
    state: Mutex<PoolState>,
    available: Condvar,
    panics: AtomicU64,
}

impl Shared {
    fn run(&self, task: Task) {
        if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
            self.panics.fetch_add(1, Ordering::Relaxed);
            error!("Block task panicked");
        }
    }
}

/// Fixed set of worker threads with caller-runs backpressure
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    queued_runs: AtomicU64,
    inline_runs: AtomicU64,
}

impl ThreadPool {
    /// Start `threads` workers; zero workers means every task runs inline
    ///
    /// # Errors
    ///
    /// Returns an error if a worker thread cannot be spawned.
    pub fn new(threads: usize) -> Result<Self> {
        info!(threads, "Initializing block thread pool");

        let mut pool = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    idle: 0,
                    running: true,
                }),
                available: Condvar::new(),
                panics: AtomicU64::new(0),
            }),
            workers: Vec::with_capacity(threads),
            queued_runs: AtomicU64::new(0),
            inline_runs: AtomicU64::new(0),
        };

        for index in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("block-worker-{index}"))
                .spawn(move || worker_loop(&shared))
                .with_context(|| format!("Failed to spawn block worker {index}"))?;
            pool.workers.push(handle);
        }

        Ok(pool)
    }

    /// Run `task` on an idle worker, or inline when none is free
    pub fn invoke(&self, task: impl FnOnce() + Send + 'static) -> Dispatch {
        let task: Task = Box::new(task);
        let task = {
            let mut state = self.shared.state.lock();
            if state.running && state.idle > state.queue.len() {
                state.queue.push_back(task);
                self.shared.available.notify_one();
                None
            } else {
                Some(task)
            }
        };

        match task {
            None => {
                self.queued_runs.fetch_add(1, Ordering::Relaxed);
                Dispatch::Queued
            }
            Some(task) => {
                self.inline_runs.fetch_add(1, Ordering::Relaxed);
                debug!("No idle block worker, running inline");
                self.shared.run(task);
                Dispatch::Inline
            }
        }
    }

    #[must_use]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Workers currently waiting for work
    #[must_use]
    pub fn idle_workers(&self) -> usize {
        self.shared.state.lock().idle
    }

    #[must_use]
    pub fn queued_runs(&self) -> u64 {
        self.queued_runs.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn inline_runs(&self) -> u64 {
        self.inline_runs.load(Ordering::Relaxed)
    }

    /// Tasks that panicked, on workers or inline
    #[must_use]
    pub fn panics(&self) -> u64 {
        self.shared.panics.load(Ordering::Relaxed)
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut state = shared.state.lock();
            state.idle += 1;
            while state.queue.is_empty() && state.running {
                shared.available.wait(&mut state);
            }
            state.idle -= 1;
            match state.queue.pop_front() {
                Some(task) => task,
                // stopped and drained
                None => return,
            }
        };
        shared.run(task);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.state.lock().running = false;
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Block worker exited abnormally");
            }
        }
        debug!("Block thread pool stopped");
    }
}
