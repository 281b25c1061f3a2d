//! Runtime builder.
//!
//! The builder is the usual way to construct a [`Runtime`]. Configuration
//! sources are layered by call order: start from defaults, a TOML file or the
//! environment, then override individual settings with the setters.
//!
//! ```ignore
//! use fiberline::{RuntimeBuilder, RuntimeFlag};
//!
//! let runtime = RuntimeBuilder::from_env()?
//!     .worker_threads(4)
//!     .enable_flag(RuntimeFlag::FIBER_ROOTS)
//!     .build()?;
//! ```

use crate::error::Error;
use crate::fiber_ref::FiberRefs;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::env_config;
use crate::runtime::{Environment, Runtime};
use crate::supervisor::{supervisor_ref, Supervisor};
use crate::types::{FiberId, RuntimeFlag, RuntimeFlags};
use std::sync::Arc;

/// Builder for [`Runtime`].
#[derive(Clone, Debug)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
    environment: Environment,
    fiber_refs: FiberRefs,
}

impl RuntimeBuilder {
    /// A builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            environment: Environment::default(),
            fiber_refs: FiberRefs::default(),
        }
    }

    /// A builder with defaults overridden by `FIBERLINE_*` variables.
    pub fn from_env() -> Result<Self, Error> {
        Self::new().with_env_overrides()
    }

    /// Applies `FIBERLINE_*` environment variables on top of the current
    /// settings.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// A builder with defaults overridden by a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml: &str) -> Result<Self, Error> {
        let parsed = env_config::parse_toml_str(toml)?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &parsed)?;
        Ok(builder)
    }

    /// A builder with defaults overridden by a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let parsed = env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &parsed)?;
        Ok(builder)
    }

    /// Set the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set how many resumes a cooperatively yielding fiber processes per drain.
    #[must_use]
    pub fn max_ops_before_yield(mut self, ops: u32) -> Self {
        self.config.max_ops_before_yield = ops;
        self
    }

    /// Replace the flags root fibers start with.
    #[must_use]
    pub fn runtime_flags(mut self, flags: RuntimeFlags) -> Self {
        self.config.runtime_flags = flags;
        self
    }

    /// Enable one flag for root fibers.
    #[must_use]
    pub fn enable_flag(mut self, flag: RuntimeFlag) -> Self {
        self.config.runtime_flags = self.config.runtime_flags.enable(flag);
        self
    }

    /// Disable one flag for root fibers.
    #[must_use]
    pub fn disable_flag(mut self, flag: RuntimeFlag) -> Self {
        self.config.runtime_flags = self.config.runtime_flags.disable(flag);
        self
    }

    /// Set the environment every root fiber starts with.
    #[must_use]
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set the refs every root fiber starts with.
    #[must_use]
    pub fn fiber_refs(mut self, refs: FiberRefs) -> Self {
        self.fiber_refs = refs;
        self
    }

    /// Set the supervisor every root fiber starts with.
    #[must_use]
    pub fn supervisor(mut self, supervisor: Supervisor) -> Self {
        self.fiber_refs
            .update_as(FiberId::NONE, supervisor_ref(), supervisor);
        self
    }

    /// Register a callback run on each worker thread as it starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback run on each worker thread as it stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// The configuration built so far.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build the runtime, starting its worker pool.
    pub fn build(self) -> Result<Runtime, Error> {
        Runtime::with_config(self.config, self.environment, self.fiber_refs)
    }

    /// A builder with a single worker thread.
    #[must_use]
    pub fn current_thread() -> Self {
        Self::new().worker_threads(1)
    }

    /// A builder with default settings, for symmetry with [`current_thread`](Self::current_thread).
    #[must_use]
    pub fn multi_thread() -> Self {
        Self::new()
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn setters_compose() {
        init_test("setters_compose");
        let builder = RuntimeBuilder::new()
            .worker_threads(3)
            .thread_stack_size(512 * 1024)
            .thread_name_prefix("custom")
            .max_ops_before_yield(7)
            .enable_flag(RuntimeFlag::FIBER_ROOTS)
            .disable_flag(RuntimeFlag::COOPERATIVE_YIELDING);
        let config = builder.config();
        crate::assert_with_log!(config.worker_threads == 3, "workers", 3, config.worker_threads);
        crate::assert_with_log!(
            config.max_ops_before_yield == 7,
            "max_ops_before_yield",
            7,
            config.max_ops_before_yield
        );
        assert_eq!(config.thread_name_prefix, "custom");
        assert!(config.runtime_flags.fiber_roots());
        assert!(config.runtime_flags.interruption());
        assert!(!config.runtime_flags.cooperative_yielding());
        crate::test_complete!("setters_compose");
    }

    #[test]
    fn current_thread_has_one_worker() {
        init_test("current_thread_has_one_worker");
        let runtime = RuntimeBuilder::current_thread().build().unwrap();
        assert_eq!(runtime.config().worker_threads, 1);
        runtime.shutdown();
        crate::test_complete!("current_thread_has_one_worker");
    }

    #[test]
    fn build_normalizes_config() {
        init_test("build_normalizes_config");
        let runtime = RuntimeBuilder::new()
            .worker_threads(0)
            .max_ops_before_yield(0)
            .build()
            .unwrap();
        assert_eq!(runtime.config().worker_threads, 1);
        assert_eq!(runtime.config().max_ops_before_yield, 1);
        crate::test_complete!("build_normalizes_config");
    }

    #[test]
    fn env_overrides_are_layered_under_setters() {
        init_test("env_overrides_are_layered_under_setters");
        let builder = {
            let _guard = crate::test_utils::env_lock();
            std::env::set_var(env_config::ENV_WORKER_THREADS, "5");
            std::env::set_var(env_config::ENV_THREAD_NAME_PREFIX, "from-env");
            let builder = RuntimeBuilder::from_env();
            std::env::remove_var(env_config::ENV_WORKER_THREADS);
            std::env::remove_var(env_config::ENV_THREAD_NAME_PREFIX);
            builder.unwrap()
        };
        let builder = builder.worker_threads(2);
        assert_eq!(builder.config().worker_threads, 2);
        assert_eq!(builder.config().thread_name_prefix, "from-env");
        crate::test_complete!("env_overrides_are_layered_under_setters");
    }

    #[test]
    fn env_applied_after_a_setter_wins() {
        init_test("env_applied_after_a_setter_wins");
        let builder = {
            let _guard = crate::test_utils::env_lock();
            std::env::set_var(env_config::ENV_WORKER_THREADS, "5");
            let builder = RuntimeBuilder::new().worker_threads(2).with_env_overrides();
            std::env::remove_var(env_config::ENV_WORKER_THREADS);
            builder.unwrap()
        };
        assert_eq!(builder.config().worker_threads, 5);
        crate::test_complete!("env_applied_after_a_setter_wins");
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn from_toml_str_applies_file() {
        init_test("from_toml_str_applies_file");
        let builder = RuntimeBuilder::from_toml_str(
            "[scheduler]\nworker_threads = 2\n[fibers]\nruntime_flags = [\"Interruption\"]\n",
        )
        .unwrap();
        assert_eq!(builder.config().worker_threads, 2);
        assert_eq!(
            builder.config().runtime_flags,
            RuntimeFlags::NONE.enable(RuntimeFlag::INTERRUPTION)
        );
        crate::test_complete!("from_toml_str_applies_file");
    }
}
