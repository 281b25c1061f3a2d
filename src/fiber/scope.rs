//! Where newly forked fibers are registered.

use super::roots::init_roots;
use super::{FiberHandle, FiberMessage};
use crate::tracing_compat::{debug, trace};
use crate::types::{FiberId, RuntimeFlags};
use core::fmt;

/// The registration target of a newly forked fiber.
///
/// A child forked by another fiber lands in that fiber's `Local` scope and is
/// removed again when it finishes. Children forked from outside any fiber
/// land in the `Global` scope, which tracks them in the root registry only
/// while `FiberRoots` is enabled.
///
/// Local bookkeeping only ever touches the parent's child map from the
/// parent's own drain, so each child costs the parent two mailbox messages:
/// one to register it and one to remove it.
#[derive(Clone)]
pub enum FiberScope {
    /// No owning fiber.
    Global,
    /// Owned by `parent`.
    Local {
        /// The owning fiber's id.
        fiber_id: FiberId,
        /// The owning fiber.
        parent: FiberHandle,
    },
}

impl FiberScope {
    /// The scope owned by `parent`.
    #[must_use]
    pub fn local(parent: FiberHandle) -> Self {
        Self::Local {
            fiber_id: parent.id(),
            parent,
        }
    }

    /// The owning fiber's id; `FiberId::NONE` for the global scope.
    #[must_use]
    pub fn fiber_id(&self) -> FiberId {
        match self {
            Self::Global => FiberId::NONE,
            Self::Local { fiber_id, .. } => *fiber_id,
        }
    }

    /// Registers `child`, forked with `runtime_flags`, with this scope.
    ///
    /// A parent that finished before the registration reached it interrupts
    /// the child instead of adopting it.
    pub fn add(&self, runtime_flags: RuntimeFlags, child: &FiberHandle) {
        match self {
            Self::Global => {
                if !runtime_flags.fiber_roots() {
                    return;
                }
                let roots = init_roots();
                roots.insert(child);
                let child_id = child.id();
                child.add_observer(move |_exit| {
                    roots.remove(child_id);
                });
            }
            Self::Local { parent, .. } => {
                let child = child.clone();
                parent.tell(FiberMessage::stateful(move |parent, status| {
                    if status.is_done() {
                        debug!(parent = %parent.id(), child = %child.id(), "orphan interrupted");
                        child.interrupt_as(parent.id());
                        return;
                    }
                    parent.add_child(&child);
                    let parent = parent.clone();
                    let child_id = child.id();
                    child.add_observer(move |_exit| {
                        parent.tell(FiberMessage::stateful(move |parent, _status| {
                            trace!(parent = %parent.id(), child = %child_id, "child removed");
                            parent.remove_child(child_id);
                        }));
                    });
                }));
            }
        }
    }

    /// Every live root fiber, ordered by id.
    #[must_use]
    pub fn roots() -> Vec<FiberHandle> {
        init_roots().snapshot()
    }

    /// Number of live root fibers.
    #[must_use]
    pub fn root_count() -> usize {
        init_roots().len()
    }

    /// Returns true if `id` is a live root fiber.
    #[must_use]
    pub fn is_root(id: FiberId) -> bool {
        init_roots().contains(id)
    }
}

impl fmt::Debug for FiberScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "Global"),
            Self::Local { fiber_id, .. } => write!(f, "Local({fiber_id})"),
        }
    }
}
