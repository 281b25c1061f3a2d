//! The fiber mailbox: a lock-free FIFO queue plus a drain claim.
//!
//! Any thread may push. Exactly one thread at a time may hold the claim, and
//! only the claim holder pops. The claim is a single atomic flag; losing the
//! race to claim it is how a sender learns that another thread is already
//! draining and will see the new message.

use super::FiberMessage;
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};

/// A multi-producer, single-consumer message queue with an exclusive drain
/// claim.
pub struct Mailbox {
    queue: SegQueue<FiberMessage>,
    draining: AtomicBool,
    delivered: AtomicUsize,
}

impl Mailbox {
    /// An empty, unclaimed mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            draining: AtomicBool::new(false),
            delivered: AtomicUsize::new(0),
        }
    }

    /// Enqueues a message without attempting to drain.
    pub fn push(&self, message: FiberMessage) {
        self.queue.push(message);
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Attempts to become the drainer. Returns true on success.
    #[must_use]
    pub fn try_claim(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Gives up the drain claim.
    ///
    /// After releasing, the caller must re-check [`is_empty`](Self::is_empty):
    /// a sender that lost the claim race just before the release relies on it.
    pub fn release(&self) {
        self.draining.store(false, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    /// Returns true while some thread holds the drain claim.
    #[must_use]
    pub fn is_claimed(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Pops the oldest message. Only the claim holder may call this.
    pub fn pop(&self) -> Option<FiberMessage> {
        self.queue.pop()
    }

    /// Returns true if no messages are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Total messages ever pushed.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("queued", &self.len())
            .field("claimed", &self.is_claimed())
            .field("delivered", &self.delivered())
            .finish()
    }
}
