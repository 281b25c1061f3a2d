//! Fiberline: the lifecycle and coordination core of a fiber runtime.
//!
//! # Overview
//!
//! A fiber is a lightweight, cooperatively scheduled unit of work. Fibers are
//! multiplexed over a shared worker pool, own a single-consumer mailbox, and
//! carry their own runtime flags, contextual references and supervisor. Any
//! thread may talk to a fiber, but only through its mailbox; whichever thread
//! claims the mailbox drains it for everyone.
//!
//! # Core Guarantees
//!
//! - **Single drainer**: at most one thread executes a given fiber at any instant
//! - **FIFO delivery**: messages sent to one fiber are processed in send order
//! - **Masked interruption**: interruption is honored only while the fiber is
//!   interruptible; wind-down masks it for the rest of cleanup
//! - **Delta merges**: flags, refs and supervisors propagate across fork/join as
//!   patches, never as wholesale replacement
//! - **Captured failures**: typed errors, panics and interruption all land in the
//!   fiber's [`Exit`] instead of unwinding across fiber boundaries
//!
//! # Module Structure
//!
//! - [`types`]: identifiers, runtime flags, causes and exits
//! - [`patch`]: the generic [`Differ`] contract and the runtime flags patch
//! - [`fiber_ref`]: per-fiber contextual references and their patches
//! - [`supervisor`]: composable lifecycle observers and their patches
//! - [`fiber`]: fibers, mailboxes, messages, scopes and the root registry
//! - [`runtime`]: runtime construction, configuration and run modes
//! - [`observability`]: fiber lifecycle counters
//! - [`error`]: error types
//!
//! # Example
//!
//! ```ignore
//! use fiberline::Runtime;
//!
//! let runtime = Runtime::builder().worker_threads(2).build()?;
//! let value = runtime.run_sync(|cx| async move {
//!     let child = cx.fork(|_| async { Ok::<_, &str>(21) });
//!     let half = cx.join(child).await.map_err(|_| "child failed")?;
//!     Ok::<_, &str>(half * 2)
//! })?;
//! assert_eq!(value, 42);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod error;
pub mod fiber;
pub mod fiber_ref;
pub mod observability;
pub mod patch;
pub mod runtime;
pub mod supervisor;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use error::{Error, ErrorKind, FiberFailure, ParseFlagError, Result};
pub use fiber::{
    FiberCx, FiberHandle, FiberMessage, FiberScope, FiberStatus, Mailbox, RuntimeFiber,
};
pub use fiber_ref::{FiberRef, FiberRefs, FiberRefsDiffer, FiberRefsPatch};
pub use observability::FiberMetrics;
pub use patch::{Differ, RuntimeFlagsDiffer, RuntimeFlagsPatch, UpdateDiffer};
pub use runtime::{Environment, Runtime, RuntimeBuilder, RuntimeConfig};
pub use supervisor::{Supervisor, SupervisorDiffer, SupervisorPatch, SupervisorValue};
pub use types::{Cause, Defect, Exit, FiberId, FiberRefId, RuntimeFlag, RuntimeFlags, SupervisorId};
