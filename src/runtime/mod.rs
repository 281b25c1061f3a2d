//! Runtime construction, configuration and run modes.
//!
//! A [`Runtime`] bundles a worker pool with the environment, flags and refs
//! every root fiber starts with. All entry points create a root fiber in the
//! global scope and start draining its mailbox on the calling thread; the
//! fiber moves to the pool the first time it suspends.
//!
//! # Run modes
//!
//! | Method | Returns |
//! |--------|---------|
//! | [`Runtime::fork`] | a [`RuntimeFiber`] without waiting |
//! | [`Runtime::run_async`] | an untyped [`FiberHandle`], fire and forget |
//! | [`Runtime::run_async_with`] | a [`FiberHandle`]; the exit goes to a callback |
//! | [`Runtime::run_sync`] | the value, blocking; failures as [`FiberFailure`] |
//! | [`Runtime::run_sync_exit`] | the [`Exit`], blocking |
//! | [`Runtime::run_future`] | a [`RuntimeFiber`] to await |
//!
//! The blocking modes must not be called from a pool worker while the pool
//! is needed to finish the fiber.

pub mod builder;
pub mod config;
pub mod env_config;
mod environment;
pub(crate) mod scheduler;

pub use builder::RuntimeBuilder;
pub use config::RuntimeConfig;
pub use environment::Environment;

use self::scheduler::{PoolHandle, PoolOptions, WorkerPool};
use crate::error::{Error, FiberFailure};
use crate::fiber::{spawn_fiber, Birth, FiberCx, FiberHandle, FiberScope, RuntimeFiber};
use crate::fiber::init_roots;
use crate::fiber_ref::FiberRefs;
use crate::observability::FiberMetrics;
use crate::tracing_compat::info;
use crate::types::{Exit, FiberId, RuntimeFlags};
use core::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// State every fiber of a runtime shares.
pub(crate) struct RuntimeShared {
    pub(crate) pool: PoolHandle,
    pub(crate) metrics: FiberMetrics,
    pub(crate) max_ops_before_yield: u32,
}

struct RuntimeInner {
    config: RuntimeConfig,
    shared: Arc<RuntimeShared>,
    pool: WorkerPool,
    environment: Environment,
    refs: FiberRefs,
}

/// A handle to a fiber runtime.
///
/// Cloning is cheap. The worker pool shuts down when the last clone is
/// dropped; fibers still queued at that point are drained first.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// A runtime whose root fibers start with `environment`, `flags` and
    /// `refs`, using default pool settings.
    pub fn make(environment: Environment, flags: RuntimeFlags, refs: FiberRefs) -> Result<Self, Error> {
        let config = RuntimeConfig {
            runtime_flags: flags,
            ..RuntimeConfig::default()
        };
        Self::with_config(config, environment, refs)
    }

    /// A builder with default settings.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub(crate) fn with_config(
        mut config: RuntimeConfig,
        environment: Environment,
        refs: FiberRefs,
    ) -> Result<Self, Error> {
        config.normalize();
        init_roots();

        let pool = WorkerPool::new(PoolOptions {
            worker_threads: config.worker_threads,
            thread_stack_size: config.thread_stack_size,
            thread_name_prefix: config.thread_name_prefix.clone(),
            on_thread_start: config.on_thread_start.clone(),
            on_thread_stop: config.on_thread_stop.clone(),
        })?;
        let shared = Arc::new(RuntimeShared {
            pool: pool.handle(),
            metrics: FiberMetrics::new(),
            max_ops_before_yield: config.max_ops_before_yield,
        });

        info!(
            workers = config.worker_threads,
            flags = %config.runtime_flags,
            services = environment.len(),
            "runtime started"
        );

        Ok(Self {
            inner: Arc::new(RuntimeInner {
                config,
                shared,
                pool,
                environment,
                refs,
            }),
        })
    }

    /// The normalized configuration.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The flags root fibers start with.
    #[must_use]
    pub fn runtime_flags(&self) -> RuntimeFlags {
        self.inner.config.runtime_flags
    }

    /// The environment root fibers start with.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.inner.environment
    }

    /// The refs root fibers start with.
    #[must_use]
    pub fn fiber_refs(&self) -> &FiberRefs {
        &self.inner.refs
    }

    /// Lifecycle counters for fibers running with `RuntimeMetrics`.
    #[must_use]
    pub fn metrics(&self) -> &FiberMetrics {
        &self.inner.shared.metrics
    }

    /// Every live root fiber registered under `FiberRoots`.
    #[must_use]
    pub fn roots(&self) -> Vec<FiberHandle> {
        FiberScope::roots()
    }

    /// Forks a root fiber and returns without waiting for it.
    ///
    /// The fiber runs on the calling thread until it first suspends.
    pub fn fork<A, E, F, Fut>(&self, body: F) -> RuntimeFiber<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(FiberCx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        let birth = Birth {
            parent: None,
            flags: self.inner.config.runtime_flags,
            refs: self.inner.refs.clone(),
            env: self.inner.environment.clone(),
            scope: FiberScope::Global,
            inline: true,
        };
        spawn_fiber(&self.inner.shared, FiberId::new(), birth, body)
    }

    /// Starts a root fiber, discarding its typed exit.
    pub fn run_async<A, E, F, Fut>(&self, body: F) -> FiberHandle
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(FiberCx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        self.fork(body).handle().clone()
    }

    /// Starts a root fiber and passes its exit to `callback` when it finishes.
    ///
    /// The callback runs on whichever thread completes the fiber.
    pub fn run_async_with<A, E, F, Fut, K>(&self, body: F, callback: K) -> FiberHandle
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(FiberCx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
        K: FnOnce(Exit<A, E>) + Send + 'static,
    {
        let fiber = self.fork(body);
        fiber.on_exit(callback);
        fiber.handle().clone()
    }

    /// Runs a root fiber to completion and returns its exit.
    #[must_use]
    pub fn run_sync_exit<A, E, F, Fut>(&self, body: F) -> Exit<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(FiberCx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        self.fork(body).await_exit()
    }

    /// Runs a root fiber to completion and returns its value.
    pub fn run_sync<A, E, F, Fut>(&self, body: F) -> Result<A, FiberFailure<E>>
    where
        A: Send + 'static,
        E: fmt::Debug + Send + 'static,
        F: FnOnce(FiberCx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        self.run_sync_exit(body).into_result().map_err(FiberFailure::new)
    }

    /// Starts a root fiber and returns a future of its exit.
    pub fn run_future<A, E, F, Fut>(&self, body: F) -> RuntimeFiber<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(FiberCx) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        self.fork(body)
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.shared.pool.is_shutdown()
    }

    /// Stops the workers once their queue is empty. Fibers woken afterwards
    /// are drained on the waking thread.
    pub fn shutdown(&self) {
        info!("runtime shutting down");
        self.inner.pool.shutdown();
    }

    /// Shuts down and waits up to `timeout` for the workers to exit.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        info!("runtime shutting down");
        let stopped = self.inner.pool.shutdown_and_wait(timeout);
        info!(stopped, "runtime stopped");
        stopped
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("pool", &self.inner.pool)
            .field("environment", &self.inner.environment)
            .finish_non_exhaustive()
    }
}
