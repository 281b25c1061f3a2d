//! Identifier types for runtime entities.
//!
//! Fibers, fiber refs and supervisors are all identified by process-unique
//! integers handed out from global counters. Fiber ids also remember the
//! wall-clock millisecond at which they were allocated, which diagnostics use
//! to order fiber dumps.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_FIBER_REF_ID: AtomicU64 = AtomicU64::new(1);
// Zero is reserved for `Supervisor::none()`.
static NEXT_SUPERVISOR_ID: AtomicU64 = AtomicU64::new(1);

/// The identity of a fiber.
///
/// `None` identifies "no fiber": the global scope, and interruptions that
/// originate outside of any fiber.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FiberId {
    /// No fiber.
    None,
    /// A fiber allocated by the runtime.
    Runtime {
        /// Process-unique sequence number.
        id: u64,
        /// Allocation time in milliseconds since the Unix epoch.
        start_time_millis: u64,
    },
}

impl FiberId {
    /// The empty fiber identity.
    pub const NONE: Self = Self::None;

    /// Allocates a fresh runtime fiber id.
    #[must_use]
    pub fn new() -> Self {
        let id = NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed);
        let start_time_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self::Runtime {
            id,
            start_time_millis,
        }
    }

    /// Creates a fiber id with a fixed sequence number, for tests.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(id: u64) -> Self {
        Self::Runtime {
            id,
            start_time_millis: 0,
        }
    }

    /// Returns the sequence number, or `None` for the empty identity.
    #[must_use]
    pub const fn sequence(self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::Runtime { id, .. } => Some(id),
        }
    }

    /// Returns true for the empty identity.
    #[must_use]
    pub const fn is_none(self) -> bool {
        matches!(self, Self::None)
    }
}

impl Default for FiberId {
    fn default() -> Self {
        Self::None
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "FiberId(None)"),
            Self::Runtime {
                id,
                start_time_millis,
            } => write!(f, "FiberId({id}@{start_time_millis})"),
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Runtime { id, .. } => write!(f, "#{id}"),
        }
    }
}

/// The identity of a [`FiberRef`](crate::fiber_ref::FiberRef).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberRefId(u64);

impl FiberRefId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FIBER_REF_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FiberRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberRefId({})", self.0)
    }
}

impl fmt::Display for FiberRefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref-{}", self.0)
    }
}

/// The identity of a leaf [`Supervisor`](crate::supervisor::Supervisor).
///
/// Supervisor equality is identity equality of leaves, so every constructor
/// call allocates a new id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SupervisorId(u64);

impl SupervisorId {
    /// The id of the empty supervisor.
    pub const NONE: Self = Self(0);

    pub(crate) fn next() -> Self {
        Self(NEXT_SUPERVISOR_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SupervisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SupervisorId({})", self.0)
    }
}

impl fmt::Display for SupervisorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}
