//! Fibers: handles, mailboxes, messages, scopes and the root registry.
//!
//! # Execution model
//!
//! Each fiber owns a [`Mailbox`]. Sending a message pushes it and then tries
//! to claim the mailbox; the winner drains every queued message on its own
//! thread, so a fiber runs on whichever thread happened to talk to it when it
//! was idle. Bodies are ordinary futures: a pending body parks inside the
//! fiber and its waker sends it back through the mailbox as a `Resume`.
//!
//! # Exits
//!
//! A fiber finishes exactly once. Its exit is handed, in order, to the
//! supervisor, to metrics, to child interruption, to observers, and finally
//! to joiners. Interruption drops the body; destructors are the finalizers,
//! and async cleanup belongs in [`FiberCx::wind_down`].

mod context;
mod mailbox;
mod message;
mod roots;
pub(crate) mod runloop;
mod scope;
pub(crate) mod waker;

pub use context::{Checkpoint, FiberCx, Join, WithFlags, YieldNow};
pub use mailbox::Mailbox;
pub use message::{Continuation, FiberMessage, StatefulFn};
pub use scope::FiberScope;

pub(crate) use roots::init_roots;

/// Every live root fiber, ordered by id.
///
/// Only fibers forked into the global scope while `FiberRoots` was enabled
/// are registered.
#[must_use]
pub fn roots() -> Vec<FiberHandle> {
    FiberScope::roots()
}

use self::runloop::FiberCore;
use self::message::TypedBody;
use crate::fiber_ref::{FiberRef, FiberRefs};
use crate::runtime::{Environment, RuntimeShared};
use crate::tracing_compat::debug;
use crate::types::{Cause, ErasedExit, Exit, FiberId, RuntimeFlags};
use core::fmt;
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::convert::Infallible;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A fiber's lifecycle status, as seen by a `Stateful` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// Runnable or being polled.
    Running {
        /// The fiber's flags.
        flags: RuntimeFlags,
    },
    /// Parked waiting for a wake.
    Suspended {
        /// The fiber's flags.
        flags: RuntimeFlags,
    },
    /// Finished.
    Done,
}

impl FiberStatus {
    /// Returns true once the fiber has finished.
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// An untyped, cloneable reference to a fiber.
///
/// Handles compare and order by fiber id.
#[derive(Clone)]
pub struct FiberHandle {
    core: Arc<FiberCore>,
}

impl FiberHandle {
    pub(crate) fn from_core(core: Arc<FiberCore>) -> Self {
        Self { core }
    }

    pub(crate) fn core(&self) -> &Arc<FiberCore> {
        &self.core
    }

    /// The fiber being drained on this thread.
    ///
    /// Only set for fibers running with the `CurrentFiber` flag.
    #[must_use]
    pub fn current() -> Option<Self> {
        runloop::current_fiber()
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.core.id()
    }

    /// Sends a message; drains on this thread if the fiber is idle.
    pub fn tell(&self, message: FiberMessage) {
        self.core.tell(message);
    }

    /// Requests interruption on behalf of `by`.
    pub fn interrupt_as(&self, by: FiberId) {
        self.interrupt_with(Cause::interrupt(by));
    }

    /// Requests interruption with an arbitrary cause.
    pub fn interrupt_with(&self, cause: Cause) {
        self.tell(FiberMessage::InterruptSignal(cause));
    }

    /// Requests interruption from outside any fiber.
    pub fn interrupt(&self) {
        self.interrupt_as(FiberId::NONE);
    }

    /// The fiber's current status.
    #[must_use]
    pub fn status(&self) -> FiberStatus {
        self.core.status()
    }

    /// The fiber's current flags.
    #[must_use]
    pub fn flags(&self) -> RuntimeFlags {
        self.core.flags()
    }

    /// A snapshot of the fiber's refs.
    #[must_use]
    pub fn refs(&self) -> FiberRefs {
        self.core.state().refs.clone()
    }

    /// The fiber's value for `fiber_ref`.
    #[must_use]
    pub fn get<A>(&self, fiber_ref: &FiberRef<A>) -> A
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        self.core.state().refs.get_or_default(fiber_ref)
    }

    /// The fiber's live children, read in mailbox order.
    ///
    /// Blocks until the fiber processes the request. Must not be called from
    /// a thread blocked on this fiber.
    #[must_use]
    pub fn children(&self) -> Vec<Self> {
        if self.core.is_draining_here() {
            return self.child_list();
        }
        let reply = Arc::new((Mutex::new(None::<Vec<Self>>), Condvar::new()));
        let sender = Arc::clone(&reply);
        self.tell(FiberMessage::stateful(move |fiber, _status| {
            *sender.0.lock() = Some(fiber.child_list());
            sender.1.notify_all();
        }));
        let mut slot = reply.0.lock();
        loop {
            if let Some(children) = slot.take() {
                return children;
            }
            reply.1.wait(&mut slot);
        }
    }

    /// Runs `observer` with the fiber's exit. Runs immediately if the fiber
    /// already finished.
    pub fn add_observer<F>(&self, observer: F)
    where
        F: FnOnce(&ErasedExit) + Send + 'static,
    {
        self.core.add_observer(Box::new(observer));
    }

    /// The exit, if the fiber has finished.
    #[must_use]
    pub fn poll_exit(&self) -> Option<ErasedExit> {
        self.core.poll_exit(None)
    }

    /// Blocks until the fiber finishes.
    #[must_use]
    pub fn await_exit(&self) -> ErasedExit {
        self.core.await_exit()
    }

    /// Returns true once the exit is published.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.poll_exit().is_some()
    }

    /// Number of messages waiting in the mailbox.
    #[must_use]
    pub fn pending_messages(&self) -> usize {
        self.core.mailbox().len()
    }

    pub(crate) fn child_list(&self) -> Vec<Self> {
        self.core.state().children.values().cloned().collect()
    }

    pub(crate) fn add_child(&self, child: &Self) {
        self.core.state().children.insert(child.id(), child.clone());
    }

    pub(crate) fn remove_child(&self, child: FiberId) {
        self.core.state().children.remove(&child);
    }
}

impl PartialEq for FiberHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for FiberHandle {}

impl PartialOrd for FiberHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FiberHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl Hash for FiberHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for FiberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FiberHandle").field(&self.id()).finish()
    }
}

/// Where a fiber's typed exit waits for its owner.
pub(crate) struct ExitSlot<A, E> {
    exit: Mutex<Option<Exit<A, E>>>,
}

impl<A, E> ExitSlot<A, E> {
    pub(crate) fn new() -> Self {
        Self {
            exit: Mutex::new(None),
        }
    }

    /// Stores the exit and returns its erased view.
    pub(crate) fn store(&self, exit: Exit<A, E>) -> ErasedExit {
        let erased = exit.erase();
        *self.exit.lock() = Some(exit);
        erased
    }

    pub(crate) fn take(&self) -> Option<Exit<A, E>> {
        self.exit.lock().take()
    }
}

/// A typed handle to a running fiber.
///
/// Awaiting it yields the fiber's [`Exit`]; the typed exit can be taken once.
pub struct RuntimeFiber<A, E = Infallible> {
    handle: FiberHandle,
    slot: Arc<ExitSlot<A, E>>,
}

impl<A, E> RuntimeFiber<A, E> {
    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.handle.id()
    }

    /// The untyped handle.
    #[must_use]
    pub fn handle(&self) -> &FiberHandle {
        &self.handle
    }

    /// Requests interruption from outside any fiber.
    pub fn interrupt(&self) {
        self.handle.interrupt();
    }

    /// Requests interruption on behalf of `by`.
    pub fn interrupt_as(&self, by: FiberId) {
        self.handle.interrupt_as(by);
    }

    /// Returns true once the exit is published.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    /// Blocks until the fiber finishes and returns its exit.
    ///
    /// Blocking a pool worker on a fiber that needs that worker deadlocks;
    /// call this from outside the runtime.
    #[must_use]
    pub fn await_exit(self) -> Exit<A, E> {
        let _ = self.handle.await_exit();
        self.take_exit()
    }

    /// Hands the typed exit to `callback` once the fiber finishes.
    pub(crate) fn on_exit<K>(&self, callback: K)
    where
        A: Send + 'static,
        E: Send + 'static,
        K: FnOnce(Exit<A, E>) + Send + 'static,
    {
        let slot = Arc::clone(&self.slot);
        self.handle.add_observer(move |_exit| {
            callback(
                slot.take()
                    .unwrap_or_else(|| Exit::die("fiber exit was already taken")),
            );
        });
    }

    fn take_exit(&self) -> Exit<A, E> {
        self.slot
            .take()
            .unwrap_or_else(|| Exit::die("fiber exit was already taken"))
    }
}

impl<A, E> Future for RuntimeFiber<A, E> {
    type Output = Exit<A, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.handle.core().poll_exit(Some(cx.waker())).is_some() {
            Poll::Ready(self.take_exit())
        } else {
            Poll::Pending
        }
    }
}

impl<A, E> fmt::Debug for RuntimeFiber<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeFiber")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// Everything a new fiber inherits.
pub(crate) struct Birth {
    pub(crate) parent: Option<FiberHandle>,
    pub(crate) flags: RuntimeFlags,
    pub(crate) refs: FiberRefs,
    pub(crate) env: Environment,
    pub(crate) scope: FiberScope,
    /// Drain on the calling thread rather than the pool.
    pub(crate) inline: bool,
}

/// Creates a fiber, announces it to its supervisor and scope, and starts it.
pub(crate) fn spawn_fiber<A, E, F, Fut>(
    runtime: &Arc<RuntimeShared>,
    id: FiberId,
    birth: Birth,
    body: F,
) -> RuntimeFiber<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
    F: FnOnce(FiberCx) -> Fut + Send + 'static,
    Fut: Future<Output = Result<A, E>> + Send + 'static,
{
    let Birth {
        parent,
        flags,
        refs,
        env,
        scope,
        inline,
    } = birth;
    let core = FiberCore::new(id, flags, refs, env.clone(), Arc::clone(runtime));
    let handle = FiberHandle::from_core(Arc::clone(&core));
    let slot = Arc::new(ExitSlot::new());

    debug!(
        fiber_id = %id,
        parent = %parent.as_ref().map_or(FiberId::NONE, FiberHandle::id),
        flags = %flags,
        "fiber forked"
    );

    core.supervisor().on_start(&env, parent.as_ref(), &handle);
    scope.add(flags, &handle);

    let cx = FiberCx::new(handle.clone());
    let typed = TypedBody::new(move || body(cx), Arc::clone(&slot));
    core.start(Continuation(Box::new(typed)), inline);
    RuntimeFiber { handle, slot }
}
