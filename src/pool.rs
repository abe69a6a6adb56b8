/*!
 * Worker Pool
 *
 * A fixed set of worker threads consuming a shared FIFO of boxed jobs,
 * guarded by one mutex and one condition variable. Two instances exist at
 * runtime: the fast pool runs receive/write tasks, the slow pool runs
 * parse/dispatch tasks.
 */

use crate::error::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Unit of work transferred into the pool queue
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long shutdown waits for each worker before detaching it
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-wide pool counter, used only for log readability
static POOL_COUNTER: AtomicUsize = AtomicUsize::new(0);

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-size worker pool with explicit initialize/shutdown lifecycle
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    done_tx: Sender<()>,
    done_rx: Receiver<()>,
    thread_count: usize,
    init_started: AtomicBool,
    initialized: AtomicBool,
    pool_id: usize,
}

impl WorkerPool {
    /// Create a pool shell; no threads run until [`WorkerPool::initialize`]
    pub fn new(thread_count: usize) -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                shutdown: AtomicBool::new(false),
            }),
            workers: Mutex::new(Vec::with_capacity(thread_count)),
            done_tx,
            done_rx,
            thread_count,
            init_started: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            pool_id: POOL_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Spawn the workers eagerly, one at a time
    ///
    /// Each spawn rendezvouses with the new worker after it has taken the
    /// queue lock at its first wait point. A job submitted right after this
    /// method returns is therefore guaranteed to be observed; without the
    /// rendezvous it could race ahead of a not-yet-started worker and sit in
    /// the queue until the next submit.
    pub fn initialize(&self) -> Result<()> {
        if self.init_started.swap(true, Ordering::AcqRel) {
            return Err(Error::Unexpected("pool is already initialized".into()));
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..self.thread_count {
            let shared = Arc::clone(&self.shared);
            let done_tx = self.done_tx.clone();
            let started = Arc::new(Barrier::new(2));
            let started_worker = Arc::clone(&started);
            let pool_id = self.pool_id;

            let handle = std::thread::Builder::new()
                .name(format!("pool-{pool_id}-worker-{worker_id}"))
                .spawn(move || {
                    worker_loop(shared, started_worker, pool_id, worker_id);
                    let _ = done_tx.send(());
                })
                .map_err(Error::System)?;

            started.wait();
            workers.push(handle);
            log::debug!("worker #{worker_id} of pool #{pool_id} is initialized");
        }

        self.initialized.store(true, Ordering::Release);
        log::debug!("thread pool #{} is initialized", self.pool_id);
        Ok(())
    }

    /// Queue one job for execution
    ///
    /// Fails with `NotReady` before initialization. After shutdown has been
    /// requested the job is dropped silently (logged): late submitters are
    /// expected during teardown and must not fail the caller.
    pub fn submit(&self, job: Job) -> Result<()> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(Error::NotReady);
        }
        if self.shared.shutdown.load(Ordering::Acquire) {
            log::warn!(
                "pool #{}: dropping task submitted during shutdown",
                self.pool_id
            );
            return Ok(());
        }

        self.shared.queue.lock().push_back(job);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Stop the workers: broadcast the shutdown flag, then join each worker
    /// with a bounded deadline. Workers that miss the deadline are detached;
    /// the process is exiting anyway and the scheduler reaps them.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        if !self.initialized.load(Ordering::Acquire) {
            return;
        }

        log::debug!("thread pool #{} started shutdown", self.pool_id);
        self.shared.available.notify_all();

        let deadline = Instant::now() + JOIN_TIMEOUT;
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(()) => {
                    let _ = handle.join();
                }
                Err(_) => {
                    log::error!(
                        "pool #{}: worker failed to stop in time, detaching",
                        self.pool_id
                    );
                    drop(handle);
                }
            }
        }
        log::debug!("thread pool #{} is shut down", self.pool_id);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Body of one worker thread: wait for a job, run it behind a panic guard,
/// repeat until shutdown
fn worker_loop(shared: Arc<Shared>, started: Arc<Barrier>, pool_id: usize, worker_id: usize) {
    let mut queue = shared.queue.lock();
    // The spawner is blocked on this rendezvous; releasing it here proves the
    // worker holds the queue lock and cannot miss a subsequent submit.
    started.wait();

    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Some(job) = queue.pop_front() {
            drop(queue);
            log::trace!("exec task in worker #{worker_id} of pool #{pool_id}");
            // No failure may propagate out of a pool thread: a panicking job
            // is logged and the worker keeps serving the queue.
            if catch_unwind(AssertUnwindSafe(job)).is_err() {
                log::error!(
                    "task panicked in worker #{worker_id} of pool #{pool_id}"
                );
            }
            queue = shared.queue.lock();
            continue;
        }
        shared.available.wait(&mut queue);
    }
}
