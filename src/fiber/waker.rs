//! Wakers that resume parked fibers.
//!
//! Uses safe Rust only: wakers are built from [`std::task::Wake`].

use super::runloop::FiberCore;
use std::sync::Arc;
use std::task::{Wake, Waker};

/// Wakes one fiber.
///
/// Waking a parked fiber moves its body back into the mailbox as a `Resume`
/// and schedules a drain on the worker pool, so a completing fiber never
/// runs the woken fiber on its own stack.
pub(crate) struct FiberWaker {
    core: Arc<FiberCore>,
}

impl FiberWaker {
    pub(crate) fn waker_for(core: &Arc<FiberCore>) -> Waker {
        Waker::from(Arc::new(Self {
            core: Arc::clone(core),
        }))
    }
}

impl Wake for FiberWaker {
    fn wake(self: Arc<Self>) {
        self.core.wake();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.core.wake();
    }
}

/// A waker that does nothing.
#[cfg(test)]
pub(crate) struct NoopWaker;

#[cfg(test)]
impl Wake for NoopWaker {
    fn wake(self: Arc<Self>) {}

    fn wake_by_ref(self: &Arc<Self>) {}
}
