//! Fiber lifecycle metrics.
//!
//! Counters are recorded only for fibers running with `RuntimeMetrics`
//! enabled.

use crate::types::ErasedExit;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the counter name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }
}

/// A gauge that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicI64::new(0),
        }
    }

    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the gauge name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }
}

/// How a fiber ended, for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitKind {
    /// Produced a value.
    Success,
    /// Failed with a typed error.
    Failure,
    /// Died from a defect.
    Die,
    /// Was interrupted.
    Interrupted,
}

impl From<&ErasedExit> for ExitKind {
    fn from(exit: &ErasedExit) -> Self {
        match exit {
            ErasedExit::Success(()) => Self::Success,
            ErasedExit::Failure(cause) if cause.is_die() => Self::Die,
            ErasedExit::Failure(cause) if cause.is_failure() => Self::Failure,
            ErasedExit::Failure(_) => Self::Interrupted,
        }
    }
}

/// Per-runtime fiber counters.
#[derive(Debug)]
pub struct FiberMetrics {
    started: Counter,
    succeeded: Counter,
    failed: Counter,
    died: Counter,
    interrupted: Counter,
    messages: Counter,
    active: Gauge,
}

impl FiberMetrics {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            started: Counter::new("fibers_started"),
            succeeded: Counter::new("fibers_succeeded"),
            failed: Counter::new("fibers_failed"),
            died: Counter::new("fibers_died"),
            interrupted: Counter::new("fibers_interrupted"),
            messages: Counter::new("fiber_messages_processed"),
            active: Gauge::new("fibers_active"),
        }
    }

    pub(crate) fn record_start(&self) {
        self.started.increment();
        self.active.increment();
    }

    pub(crate) fn record_exit(&self, exit: &ErasedExit) {
        self.active.decrement();
        match ExitKind::from(exit) {
            ExitKind::Success => self.succeeded.increment(),
            ExitKind::Failure => self.failed.increment(),
            ExitKind::Die => self.died.increment(),
            ExitKind::Interrupted => self.interrupted.increment(),
        }
    }

    pub(crate) fn record_message(&self) {
        self.messages.increment();
    }

    /// Fibers started.
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.get()
    }

    /// Fibers that ended with the given kind of exit.
    #[must_use]
    pub fn ended(&self, kind: ExitKind) -> u64 {
        match kind {
            ExitKind::Success => self.succeeded.get(),
            ExitKind::Failure => self.failed.get(),
            ExitKind::Die => self.died.get(),
            ExitKind::Interrupted => self.interrupted.get(),
        }
    }

    /// Mailbox messages processed.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages.get()
    }

    /// Fibers started but not yet ended.
    #[must_use]
    pub fn active(&self) -> i64 {
        self.active.get()
    }

    /// Every counter as `(name, value)`, for export.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(&str, i64)> {
        let as_signed = |c: &Counter| i64::try_from(c.get()).unwrap_or(i64::MAX);
        vec![
            (self.started.name(), as_signed(&self.started)),
            (self.succeeded.name(), as_signed(&self.succeeded)),
            (self.failed.name(), as_signed(&self.failed)),
            (self.died.name(), as_signed(&self.died)),
            (self.interrupted.name(), as_signed(&self.interrupted)),
            (self.messages.name(), as_signed(&self.messages)),
            (self.active.name(), self.active.get()),
        ]
    }
}

impl Default for FiberMetrics {
    fn default() -> Self {
        Self::new()
    }
}
