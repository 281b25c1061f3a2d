//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Every source writes into the same [`RuntimeConfig`](super::config::RuntimeConfig),
//! so the last one applied wins. The usual layering, lowest first:
//!
//! 1. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//! 2. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 3. **Environment variables**: values from `FIBERLINE_*` env vars, applied
//!    by `from_env()` or `with_env_overrides()`
//! 4. **Programmatic**: builder setters (`worker_threads(4)`) called afterwards
//!
//! Calling `with_env_overrides()` after a setter lets the environment
//! override that setter.
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FIBERLINE_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `FIBERLINE_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `FIBERLINE_THREAD_NAME_PREFIX` | `String` | `thread_name_prefix` |
//! | `FIBERLINE_MAX_OPS_BEFORE_YIELD` | `u32` | `max_ops_before_yield` |
//! | `FIBERLINE_RUNTIME_FLAGS` | flag list | `runtime_flags` |
//!
//! `FIBERLINE_RUNTIME_FLAGS` is a comma-separated list of flag names such as
//! `Interruption,FiberRoots`; the listed flags replace the defaults.

use crate::error::Error;
use crate::runtime::config::RuntimeConfig;
use crate::types::RuntimeFlags;

/// Environment variable name for worker thread count.
pub const ENV_WORKER_THREADS: &str = "FIBERLINE_WORKER_THREADS";
/// Environment variable name for thread stack size.
pub const ENV_THREAD_STACK_SIZE: &str = "FIBERLINE_THREAD_STACK_SIZE";
/// Environment variable name for thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "FIBERLINE_THREAD_NAME_PREFIX";
/// Environment variable name for the cooperative yield budget.
pub const ENV_MAX_OPS_BEFORE_YIELD: &str = "FIBERLINE_MAX_OPS_BEFORE_YIELD";
/// Environment variable name for the root fiber flags.
pub const ENV_RUNTIME_FLAGS: &str = "FIBERLINE_RUNTIME_FLAGS";

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), Error> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
        config.worker_threads = parse_usize(ENV_WORKER_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
        config.thread_stack_size = parse_usize(ENV_THREAD_STACK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.thread_name_prefix = val;
    }
    if let Some(val) = read_env(ENV_MAX_OPS_BEFORE_YIELD) {
        config.max_ops_before_yield = parse_u32(ENV_MAX_OPS_BEFORE_YIELD, &val)?;
    }
    if let Some(val) = read_env(ENV_RUNTIME_FLAGS) {
        config.runtime_flags = parse_flags(ENV_RUNTIME_FLAGS, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, Error> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u32(var_name: &str, val: &str) -> Result<u32, Error> {
    val.trim().parse::<u32>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected u32, got {val:?} ({e})"
        ))
    })
}

fn parse_flags(var_name: &str, val: &str) -> Result<RuntimeFlags, Error> {
    val.parse::<RuntimeFlags>().map_err(|e| {
        Error::invalid_config(format!("invalid value for {var_name}: {e}")).with_source(e)
    })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [scheduler]
/// worker_threads = 4
/// thread_stack_size = 2097152
/// thread_name_prefix = "myapp-worker"
/// max_ops_before_yield = 256
///
/// [fibers]
/// runtime_flags = ["Interruption", "CooperativeYielding", "FiberRoots"]
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Worker pool settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Root fiber settings.
    #[serde(default)]
    pub fibers: FibersToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Number of worker threads.
    pub worker_threads: Option<usize>,
    /// Stack size per worker thread in bytes.
    pub thread_stack_size: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name_prefix: Option<String>,
    /// Resumes processed per drain before yielding.
    pub max_ops_before_yield: Option<u32>,
}

/// Fibers section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct FibersToml {
    /// Flag names root fibers start with.
    pub runtime_flags: Option<Vec<String>>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) -> Result<(), Error> {
    if let Some(v) = toml.scheduler.worker_threads {
        config.worker_threads = v;
    }
    if let Some(v) = toml.scheduler.thread_stack_size {
        config.thread_stack_size = v;
    }
    if let Some(ref v) = toml.scheduler.thread_name_prefix {
        config.thread_name_prefix.clone_from(v);
    }
    if let Some(v) = toml.scheduler.max_ops_before_yield {
        config.max_ops_before_yield = v;
    }
    if let Some(ref names) = toml.fibers.runtime_flags {
        config.runtime_flags = parse_flags("fibers.runtime_flags", &names.join(","))?;
    }
    Ok(())
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, Error> {
    toml::from_str(toml_str)
        .map_err(|e| Error::invalid_config(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::invalid_config(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
        .with_source(e)
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::RuntimeFlag;

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let result = f();
        clean_env_locked();
        result
    }

    fn clean_env_locked() {
        for var in &[
            ENV_WORKER_THREADS,
            ENV_THREAD_STACK_SIZE,
            ENV_THREAD_NAME_PREFIX,
            ENV_MAX_OPS_BEFORE_YIELD,
            ENV_RUNTIME_FLAGS,
        ] {
            std::env::remove_var(var);
        }
    }

    // --- parse helpers ---

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
        assert_eq!(super::parse_usize("TEST", "0").unwrap(), 0);
    }

    #[test]
    fn parse_usize_invalid() {
        let err = super::parse_usize("TEST_VAR", "abc").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("TEST_VAR"));
        assert!(super::parse_usize("TEST", "-1").is_err());
    }

    #[test]
    fn parse_u32_bounds() {
        assert_eq!(super::parse_u32("TEST", "4294967295").unwrap(), u32::MAX);
        assert!(super::parse_u32("TEST", "4294967296").is_err());
    }

    #[test]
    fn parse_flags_list() {
        let flags = super::parse_flags("TEST", "Interruption, FiberRoots").unwrap();
        assert!(flags.is_enabled(RuntimeFlag::INTERRUPTION));
        assert!(flags.is_enabled(RuntimeFlag::FIBER_ROOTS));
        assert!(!flags.cooperative_yielding());

        let err = super::parse_flags("TEST", "Interruption,Bogus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains("Bogus"), "{err}");
    }

    // --- apply_env_overrides ---

    #[test]
    fn no_env_leaves_config_untouched() {
        let mut config = RuntimeConfig::default();
        let before = config.worker_threads;
        with_envs(&[], || apply_env_overrides(&mut config)).unwrap();
        assert_eq!(config.worker_threads, before);
        assert_eq!(config.runtime_flags, RuntimeFlags::DEFAULT);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RuntimeConfig::default();
        with_envs(
            &[
                (ENV_WORKER_THREADS, "3"),
                (ENV_THREAD_STACK_SIZE, "65536"),
                (ENV_THREAD_NAME_PREFIX, "env-worker"),
                (ENV_MAX_OPS_BEFORE_YIELD, "16"),
                (ENV_RUNTIME_FLAGS, "Interruption,RuntimeMetrics"),
            ],
            || apply_env_overrides(&mut config),
        )
        .unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.thread_stack_size, 65536);
        assert_eq!(config.thread_name_prefix, "env-worker");
        assert_eq!(config.max_ops_before_yield, 16);
        assert!(config.runtime_flags.runtime_metrics());
        assert!(!config.runtime_flags.cooperative_yielding());
    }

    #[test]
    fn env_invalid_value_errors() {
        let mut config = RuntimeConfig::default();
        let err = with_envs(&[(ENV_WORKER_THREADS, "many")], || {
            apply_env_overrides(&mut config)
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.to_string().contains(ENV_WORKER_THREADS));
    }

    // --- TOML ---

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_sections_apply() {
        let parsed = parse_toml_str(
            r#"
            [scheduler]
            worker_threads = 6
            max_ops_before_yield = 32

            [fibers]
            runtime_flags = ["Interruption", "FiberRoots"]
            "#,
        )
        .unwrap();
        let mut config = RuntimeConfig::default();
        apply_toml_config(&mut config, &parsed).unwrap();
        assert_eq!(config.worker_threads, 6);
        assert_eq!(config.max_ops_before_yield, 32);
        assert!(config.runtime_flags.fiber_roots());
        assert!(!config.runtime_flags.cooperative_yielding());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_unknown_flag_errors() {
        let parsed = parse_toml_str("[fibers]\nruntime_flags = [\"Nope\"]\n").unwrap();
        let mut config = RuntimeConfig::default();
        assert!(apply_toml_config(&mut config, &parsed).is_err());
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_malformed_errors() {
        let err = parse_toml_str("[scheduler\nworker_threads = ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_missing_file_errors() {
        let err = parse_toml_file(std::path::Path::new("/nonexistent/fiberline.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
