//! Fixed-size worker pool with a bounded task queue (C7).
//!
//! `submit` never blocks the caller: once the queue is at capacity it
//! returns `Rejected` immediately rather than waiting for a worker to catch
//! up. Workers run tasks outside any lock; a task that panics is caught at
//! the worker boundary so one bad connection can't take a worker thread
//! down with it.

use crate::error::PoolError;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

/// A unit of work handed to the pool. Boxed so the queue can hold tasks of
/// differing concrete closures.
type Task = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    not_empty: Condvar,
    stopping: AtomicBool,
    panics: AtomicU64,
    capacity: usize,
}

/// A fixed-size pool of worker threads draining a bounded task queue.
///
/// Dropping the pool without calling [`ThreadPool::shutdown`] leaves the
/// worker threads detached; callers that care about a clean stop should
/// always call `shutdown` explicitly.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Spawns `workers` threads, each pulling tasks from a queue bounded at
    /// `capacity`.
    pub fn new(workers: usize, capacity: usize) -> Self {
        assert!(workers > 0, "thread pool needs at least one worker");
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            not_empty: Condvar::new(),
            stopping: AtomicBool::new(false),
            panics: AtomicU64::new(0),
            capacity,
        });

        let handles = (0..workers)
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("ingestd-worker-{id}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        info!(workers, capacity, "thread pool started");

        Self {
            shared,
            workers: handles,
        }
    }

    /// Enqueues `task`. Returns the task back along with `Rejected`,
    /// without blocking, if the queue is already at `capacity` — handing
    /// the task back lets callers that captured non-reproducible state
    /// (like a live `TcpStream`) still act on it, e.g. to write a `503`
    /// before closing.
    pub fn submit<F>(&self, task: F) -> Result<(), (F, PoolError)>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.len() >= self.shared.capacity {
            warn!(queued = queue.len(), "thread pool queue full, rejecting task");
            return Err((task, PoolError::Rejected));
        }
        queue.push_back(Box::new(task));
        self.shared.not_empty.notify_one();
        Ok(())
    }

    /// Current queue depth, for `/health`.
    pub fn queued(&self) -> usize {
        self.shared.queue.lock().unwrap().len()
    }

    /// Number of task panics caught at the worker boundary so far.
    pub fn panics(&self) -> u64 {
        self.shared.panics.load(Ordering::Relaxed)
    }

    /// Stops accepting conceptually (existing queued tasks still drain),
    /// wakes every worker, and joins all of them. Workers finish whatever
    /// is left in the queue before observing `stopping` and exiting.
    pub fn shutdown(mut self) {
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.not_empty.notify_all();
        info!("thread pool shutdown initiated, draining queue");
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("thread pool shutdown complete");
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(task) = queue.pop_front() {
                    break Some(task);
                }
                if shared.stopping.load(Ordering::Acquire) {
                    break None;
                }
                queue = shared.not_empty.wait(queue).unwrap();
            }
        };

        let Some(task) = task else {
            return;
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            shared.panics.fetch_add(1, Ordering::Relaxed);
            let message = panic_message(&payload);
            error!(error = message, "task panicked, worker continuing");
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_submitted_tasks() {
        let pool = ThreadPool::new(4, 16);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.submit(move || tx.send(i).unwrap()).unwrap();
        }
        drop(tx);
        let mut seen: Vec<i32> = rx.iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn rejects_when_queue_is_full() {
        let pool = ThreadPool::new(1, 1);
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        // Occupy the single worker so the queue fills up behind it.
        pool.submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
        started_rx.recv().unwrap();

        pool.submit(|| {}).unwrap(); // fills the one queue slot
        let rejected = pool.submit(|| {});
        assert!(matches!(rejected, Err((_, PoolError::Rejected))));

        release_tx.send(()).unwrap();
        pool.shutdown();
    }

    #[test]
    fn a_panicking_task_does_not_kill_the_worker() {
        let pool = ThreadPool::new(1, 8);
        pool.submit(|| panic!("boom")).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.submit(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv().unwrap(), 42);

        // Give the panicking task's counter update a moment to land before
        // shutdown joins the worker.
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(pool.panics(), 1);
        pool.shutdown();
    }
}
