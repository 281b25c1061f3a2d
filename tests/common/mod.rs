#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use fiberline::{Runtime, RuntimeBuilder};
use parking_lot::{Condvar, Mutex};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Once};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_F1BE;

const PROPTEST_SEED_ENV: &str = "FIBERLINE_PROPTEST_SEED";

/// Build a ProptestConfig with a fixed seed unless one is supplied.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    if matches!(config.rng_seed, RngSeed::Random) {
        let seed = std::env::var(PROPTEST_SEED_ENV)
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_PROPTEST_SEED);
        config.rng_seed = RngSeed::Fixed(seed);
    }
    config
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// A small runtime for integration tests.
#[must_use]
pub fn test_runtime() -> Runtime {
    init_test_logging();
    test_builder().build().expect("failed to build test runtime")
}

/// The builder behind [`test_runtime`], for tests that need extra settings.
#[must_use]
pub fn test_builder() -> RuntimeBuilder {
    RuntimeBuilder::new()
        .worker_threads(4)
        .thread_name_prefix("fiberline-it")
}

/// Polls `done` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    done()
}

/// A one-shot gate that fibers can await and plain threads can open.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    state: Mutex<GateState>,
    opened: Condvar,
}

#[derive(Default)]
struct GateState {
    open: bool,
    wakers: Vec<Waker>,
}

impl Gate {
    /// A closed gate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the gate, waking every waiter.
    pub fn open(&self) {
        let wakers = {
            let mut state = self.inner.state.lock();
            state.open = true;
            std::mem::take(&mut state.wakers)
        };
        self.inner.opened.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }

    /// Returns true once opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().open
    }

    /// Blocks the calling thread until the gate opens or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while !state.open {
            if self.inner.opened.wait_until(&mut state, deadline).timed_out() {
                return state.open;
            }
        }
        true
    }

    /// A future that completes once the gate opens.
    #[must_use]
    pub fn wait(&self) -> GateWait {
        GateWait { gate: self.clone() }
    }
}

/// Future returned by [`Gate::wait`].
pub struct GateWait {
    gate: Gate,
}

impl Future for GateWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut state = self.gate.inner.state.lock();
        if state.open {
            Poll::Ready(())
        } else {
            state.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that an exit is a success with a specific value.
#[macro_export]
macro_rules! assert_exit_success {
    ($exit:expr, $expected:expr) => {
        match $exit {
            ::fiberline::Exit::Success(v) => assert_eq!(v, $expected),
            other => panic!("expected Exit::Success({:?}), got {:?}", $expected, other),
        }
    };
}

/// Assert that an exit is an interruption.
#[macro_export]
macro_rules! assert_exit_interrupted {
    ($exit:expr) => {
        match $exit {
            ref exit if exit.is_interrupted() => {}
            other => panic!("expected an interrupted exit, got {:?}", other),
        }
    };
}
