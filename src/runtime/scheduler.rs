//! The worker pool fibers are drained on.
//!
//! A fixed set of OS threads pops jobs from a shared lock-free queue. A job
//! is usually "drain this fiber's mailbox"; the pool knows nothing about
//! fibers beyond that. Idle workers park on a condvar and are woken one at a
//! time as jobs arrive.
//!
//! # Shutdown
//!
//! After [`WorkerPool::shutdown`] the workers finish every job that is still
//! queued and then exit. Jobs submitted after shutdown run inline on the
//! submitting thread so that no fiber is left without a drainer.
//!
//! A submission racing with shutdown is caught from both sides: the
//! submitter re-reads the flag after pushing and drains the queue itself if
//! it flipped, and a worker that sees the flag pops once more before exiting.
//! Both sides fence between the queue and the flag.

use crate::error::Error;
use crate::tracing_compat::{debug, warn};
use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle as ThreadJoinHandle};
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static IS_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Options for a [`WorkerPool`].
#[derive(Clone)]
pub(crate) struct PoolOptions {
    pub(crate) worker_threads: usize,
    pub(crate) thread_stack_size: usize,
    pub(crate) thread_name_prefix: String,
    pub(crate) on_thread_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub(crate) on_thread_stop: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("worker_threads", &self.worker_threads)
            .field("thread_stack_size", &self.thread_stack_size)
            .field("thread_name_prefix", &self.thread_name_prefix)
            .field("on_thread_start", &self.on_thread_start.is_some())
            .field("on_thread_stop", &self.on_thread_stop.is_some())
            .finish()
    }
}

struct PoolInner {
    queue: SegQueue<Job>,
    shutdown: AtomicBool,
    active_threads: AtomicUsize,
    executed: AtomicU64,
    condvar: Condvar,
    mutex: Mutex<()>,
    options: PoolOptions,
    thread_handles: Mutex<Vec<ThreadJoinHandle<()>>>,
}

impl PoolInner {
    fn notify_one(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.mutex.lock();
        self.condvar.notify_all();
    }

    /// Runs every queued job on the calling thread.
    fn run_queued(&self) {
        while let Some(job) = self.queue.pop() {
            run_job(self, job);
        }
    }
}

/// The owning side of the pool. Dropping it shuts the workers down.
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// A cloneable submission handle.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Spawns `options.worker_threads` workers.
    pub(crate) fn new(options: PoolOptions) -> Result<Self, Error> {
        let workers = options.worker_threads.max(1);
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            active_threads: AtomicUsize::new(0),
            executed: AtomicU64::new(0),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
            thread_handles: Mutex::new(Vec::with_capacity(workers)),
            options,
        });
        let pool = Self { inner };
        for index in 0..workers {
            // A partially started pool is torn down by Drop.
            spawn_worker(&pool.inner, index)?;
        }
        debug!(
            workers,
            prefix = %pool.inner.options.thread_name_prefix,
            "worker pool started"
        );
        Ok(pool)
    }

    pub(crate) fn handle(&self) -> PoolHandle {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    pub(crate) fn active_threads(&self) -> usize {
        self.inner.active_threads.load(Ordering::Acquire)
    }

    pub(crate) fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify_all();
    }

    /// Shuts down and waits up to `timeout` for every worker to exit.
    ///
    /// Returns false on timeout, or immediately when called from one of the
    /// pool's own workers, which cannot wait for itself.
    pub(crate) fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.shutdown();
        if IS_WORKER.with(Cell::get) {
            return false;
        }

        let deadline = Instant::now() + timeout;
        while self.inner.active_threads.load(Ordering::Acquire) > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            self.inner.notify_all();
            thread::sleep(Duration::from_millis(5).min(remaining));
        }

        let handles: Vec<_> = self.inner.thread_handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        debug!(
            executed = self.inner.executed.load(Ordering::Relaxed),
            "worker pool stopped"
        );
        true
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("options", &self.inner.options)
            .field("active_threads", &self.active_threads())
            .field("pending", &self.inner.queue.len())
            .field("shutdown", &self.inner.shutdown.load(Ordering::Relaxed))
            .finish()
    }
}

impl PoolHandle {
    /// Queues `job` for a worker, or runs it here once the pool is shut down.
    pub(crate) fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            run_job(&self.inner, Box::new(job));
            self.inner.run_queued();
            return;
        }
        self.inner.queue.push(Box::new(job));
        self.inner.notify_one();
        fence(Ordering::SeqCst);
        if self.is_shutdown() {
            debug!("worker pool shut down during submission; draining inline");
            self.inner.run_queued();
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field(
                "active_threads",
                &self.inner.active_threads.load(Ordering::Relaxed),
            )
            .field("pending", &self.inner.queue.len())
            .finish()
    }
}

fn spawn_worker(inner: &Arc<PoolInner>, index: usize) -> Result<(), Error> {
    let worker = Arc::clone(inner);
    let name = format!("{}-{}", inner.options.thread_name_prefix, index);
    inner.active_threads.fetch_add(1, Ordering::AcqRel);

    let spawned = thread::Builder::new()
        .name(name)
        .stack_size(inner.options.thread_stack_size)
        .spawn(move || {
            IS_WORKER.with(|flag| flag.set(true));
            if let Some(ref callback) = worker.options.on_thread_start {
                callback();
            }

            worker_loop(&worker);

            if let Some(ref callback) = worker.options.on_thread_stop {
                callback();
            }
            worker.active_threads.fetch_sub(1, Ordering::AcqRel);
        });

    match spawned {
        Ok(handle) => {
            inner.thread_handles.lock().push(handle);
            Ok(())
        }
        Err(e) => {
            inner.active_threads.fetch_sub(1, Ordering::AcqRel);
            Err(Error::thread_spawn(e))
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        if let Some(job) = inner.queue.pop() {
            run_job(inner, job);
            continue;
        }

        if inner.shutdown.load(Ordering::SeqCst) {
            fence(Ordering::SeqCst);
            if let Some(job) = inner.queue.pop() {
                run_job(inner, job);
                continue;
            }
            break;
        }

        let mut guard = inner.mutex.lock();
        // Re-check under the lock so a push between pop and wait is not lost.
        if inner.queue.is_empty() && !inner.shutdown.load(Ordering::Acquire) {
            inner.condvar.wait(&mut guard);
        }
    }
}

fn run_job(inner: &PoolInner, job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!(panic = %message, "worker job panicked");
    }
    inner.executed.fetch_add(1, Ordering::Relaxed);
}
