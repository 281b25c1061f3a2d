//! Core types: identifiers, runtime flags, causes and exits.

pub mod cause;
pub mod exit;
pub mod flags;
pub mod id;

pub use cause::{Cause, Defect};
pub use exit::{ErasedExit, Exit};
pub use flags::{RuntimeFlag, RuntimeFlags};
pub use id::{FiberId, FiberRefId, SupervisorId};
