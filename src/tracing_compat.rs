//! Tracing compatibility layer for structured logging.
//!
//! Works whether or not the `tracing-integration` feature is enabled:
//!
//! - **With feature enabled**: re-exports from the `tracing` crate.
//! - **Without feature**: no-op macros that compile to nothing.
//!
//! ```rust,ignore
//! use fiberline::tracing_compat::{debug, trace};
//!
//! debug!(fiber_id = %id, "fiber forked");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(test_name: &str) {
        init_test_logging();
        crate::test_phase!(test_name);
    }

    #[test]
    fn macros_accept_fiber_fields() {
        init_test("macros_accept_fiber_fields");
        let fiber_id = 7_u64;
        trace!(fiber_id, "mailbox drained");
        debug!(fiber_id = %fiber_id, flags = "Interruption", "fiber forked");
        info!(workers = 2, "runtime started");
        warn!("supervisor observer lagging");
        crate::test_complete!("macros_accept_fiber_fields");
    }
}
