//! Observability for the fiber runtime.
//!
//! Structured logging goes through [`tracing_compat`](crate::tracing_compat);
//! this module holds the counters a runtime keeps when fibers run with the
//! `RuntimeMetrics` flag.

pub mod metrics;

pub use metrics::{Counter, ExitKind, FiberMetrics, Gauge};
