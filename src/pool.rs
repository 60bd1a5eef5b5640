//! Fixed-size worker pool with bounded submission.
//!
//! Tasks run on a dedicated rayon pool while the submitting thread keeps
//! walking folders. Submission blocks once `workers * QUEUE_DEPTH_PER_WORKER`
//! tasks are queued or running, and [`WorkerPool::scope`] returns only after
//! every submitted task has finished.

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::sync::{Condvar, Mutex, PoisonError};

const QUEUE_DEPTH_PER_WORKER: usize = 4;

pub struct WorkerPool {
    pool: ThreadPool,
    capacity: usize,
    in_flight: Mutex<usize>,
    slot_freed: Condvar,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("worker-{}", index))
            .build()?;
        Ok(Self {
            pool,
            capacity: workers * QUEUE_DEPTH_PER_WORKER,
            in_flight: Mutex::new(0),
            slot_freed: Condvar::new(),
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `op` on the calling thread; tasks it submits run on the pool.
    /// Acts as the drain barrier for everything submitted inside it.
    pub fn scope<'s, OP, R>(&'s self, op: OP) -> R
    where
        OP: FnOnce(&Submitter<'_, 's>) -> R,
    {
        self.pool
            .in_place_scope(|scope: &rayon::Scope<'s>| op(&Submitter { pool: self, scope }))
    }

    fn acquire(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while *in_flight >= self.capacity {
            in_flight = self
                .slot_freed
                .wait(in_flight)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_flight += 1;
    }

    fn release(&self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *in_flight = in_flight.saturating_sub(1);
        self.slot_freed.notify_one();
    }
}

/// Handle for submitting tasks inside [`WorkerPool::scope`].
pub struct Submitter<'a, 's> {
    pool: &'s WorkerPool,
    scope: &'a rayon::Scope<'s>,
}

impl<'a, 's> Submitter<'a, 's> {
    /// Queues `task`, blocking while the pool is saturated.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 's,
    {
        self.pool.acquire();
        let pool = self.pool;
        self.scope.spawn(move |_| {
            let _slot = Slot(pool);
            task();
        });
    }
}

struct Slot<'p>(&'p WorkerPool);

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}
