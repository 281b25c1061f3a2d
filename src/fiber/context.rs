//! The capability a fiber body runs with.

use super::{spawn_fiber, Birth, FiberHandle, FiberMessage, FiberScope, RuntimeFiber};
use crate::fiber_ref::{FiberRef, FiberRefs};
use crate::patch::RuntimeFlagsPatch;
use crate::runtime::Environment;
use crate::supervisor::{supervisor_ref, Supervisor};
use crate::tracing_compat::trace;
use crate::types::{Cause, FiberId, RuntimeFlag, RuntimeFlags};
use core::fmt;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// The running fiber's view of itself.
///
/// Every body receives one. It reads and patches the fiber's flags and refs,
/// forks and joins children, and marks the points at which interruption may
/// take effect.
///
/// Interruption is honored only while the body is suspended. A pending body
/// is dropped when an interrupt arrives and the fiber is interruptible; the
/// future's destructors are its finalizers. Regions that must run to
/// completion belong in [`uninterruptible`](Self::uninterruptible) or
/// [`wind_down`](Self::wind_down).
#[derive(Clone)]
pub struct FiberCx {
    fiber: FiberHandle,
}

impl FiberCx {
    pub(crate) fn new(fiber: FiberHandle) -> Self {
        Self { fiber }
    }

    /// The fiber's id.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.fiber.id()
    }

    /// The fiber's handle.
    #[must_use]
    pub fn fiber(&self) -> &FiberHandle {
        &self.fiber
    }

    // ========================================================================
    // Flags
    // ========================================================================

    /// The fiber's current flags.
    #[must_use]
    pub fn flags(&self) -> RuntimeFlags {
        self.fiber.flags()
    }

    /// Applies `patch` to the fiber's flags.
    pub fn update_flags(&self, patch: RuntimeFlagsPatch) {
        let mut state = self.fiber.core().state();
        state.flags = state.flags.patch(patch);
    }

    /// Runs `future` with `patch` applied, then reverts exactly the bits the
    /// patch changed. An interruption that became due while the region ran
    /// takes effect when it exits.
    pub fn with_flags<F: Future>(&self, patch: RuntimeFlagsPatch, future: F) -> WithFlags<F> {
        WithFlags {
            cx: self.clone(),
            patch,
            revert: None,
            future: Box::pin(future),
            finished: false,
            output: None,
        }
    }

    /// Runs `future` with interruption disabled.
    pub fn uninterruptible<F: Future>(&self, future: F) -> WithFlags<F> {
        self.with_flags(RuntimeFlagsPatch::disable(RuntimeFlag::INTERRUPTION), future)
    }

    /// Runs `future` with interruption enabled.
    pub fn interruptible<F: Future>(&self, future: F) -> WithFlags<F> {
        self.with_flags(RuntimeFlagsPatch::enable(RuntimeFlag::INTERRUPTION), future)
    }

    /// Runs cleanup with the fiber marked as winding down; interruption stays
    /// masked until the cleanup completes.
    pub fn wind_down<F: Future>(&self, future: F) -> WithFlags<F> {
        self.with_flags(RuntimeFlagsPatch::enable(RuntimeFlag::WIND_DOWN), future)
    }

    // ========================================================================
    // Interruption
    // ========================================================================

    /// Returns true if an interruption has been requested, whether or not it
    /// is currently masked.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        !self.fiber.core().state().interrupted.is_empty()
    }

    /// An interruption point: completes immediately unless an interruption is
    /// due, in which case it never completes and the fiber unwinds.
    #[must_use]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint { cx: self.clone() }
    }

    /// Interrupts `fiber` on behalf of this fiber.
    pub fn interrupt(&self, fiber: &FiberHandle) {
        fiber.interrupt_as(self.id());
    }

    /// Gives other work on this thread a chance to run.
    #[must_use]
    pub fn yield_now(&self) -> YieldNow {
        YieldNow {
            fiber: self.fiber.clone(),
            yielded: false,
        }
    }

    fn interrupt_due(&self) -> bool {
        self.fiber.core().interrupt_pending()
    }

    // ========================================================================
    // Fiber refs
    // ========================================================================

    /// The fiber's value for `fiber_ref`.
    #[must_use]
    pub fn get<A>(&self, fiber_ref: &FiberRef<A>) -> A
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        self.fiber.get(fiber_ref)
    }

    /// Sets the fiber's value for `fiber_ref`.
    pub fn set<A>(&self, fiber_ref: &FiberRef<A>, value: A)
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        let id = self.id();
        self.fiber.core().state().refs.update_as(id, fiber_ref, value);
    }

    /// Replaces the fiber's value for `fiber_ref` with `f(current)`.
    pub fn update<A, F>(&self, fiber_ref: &FiberRef<A>, f: F)
    where
        A: Clone + PartialEq + Send + Sync + 'static,
        F: FnOnce(A) -> A,
    {
        let id = self.id();
        let mut state = self.fiber.core().state();
        let next = f(state.refs.get_or_default(fiber_ref));
        state.refs.update_as(id, fiber_ref, next);
    }

    /// Forgets the fiber's value for `fiber_ref`; it reads as the initial
    /// value again.
    pub fn reset<A>(&self, fiber_ref: &FiberRef<A>)
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        self.fiber.core().state().refs.delete(fiber_ref);
    }

    /// Runs `future` with `fiber_ref` set to `value`, then restores the
    /// previous value.
    pub async fn locally<A, F>(&self, fiber_ref: &FiberRef<A>, value: A, future: F) -> F::Output
    where
        A: Clone + PartialEq + Send + Sync + 'static,
        F: Future,
    {
        let previous = self.get(fiber_ref);
        self.set(fiber_ref, value);
        let output = future.await;
        self.set(fiber_ref, previous);
        output
    }

    /// A snapshot of the fiber's refs.
    #[must_use]
    pub fn refs(&self) -> FiberRefs {
        self.fiber.refs()
    }

    // ========================================================================
    // Environment and supervision
    // ========================================================================

    /// The fiber's environment.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.fiber.core().state().env.clone()
    }

    /// Looks up a service in the fiber's environment.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.fiber.core().state().env.get::<T>()
    }

    /// Adds a service to the fiber's environment; children forked afterwards
    /// see it.
    pub fn provide<T: Any + Send + Sync>(&self, service: T) {
        let mut state = self.fiber.core().state();
        let env = std::mem::take(&mut state.env);
        state.env = env.with(service);
    }

    /// The supervisor in effect for this fiber.
    #[must_use]
    pub fn supervisor(&self) -> Supervisor {
        self.get(supervisor_ref())
    }

    /// Zips `supervisor` onto the fiber's supervisor; children forked
    /// afterwards report to it.
    pub fn add_supervisor(&self, supervisor: Supervisor) {
        self.update(supervisor_ref(), |current| current.zip(supervisor));
    }

    /// Removes `supervisor` from the fiber's supervisor.
    pub fn remove_supervisor(&self, supervisor: &Supervisor) {
        self.update(supervisor_ref(), |current| current.remove_supervisor(supervisor));
    }

    // ========================================================================
    // Fork and join
    // ========================================================================

    /// Forks a child owned by this fiber. The child starts on the worker
    /// pool and is interrupted if this fiber finishes first.
    pub fn fork<A, E, F, Fut>(&self, body: F) -> RuntimeFiber<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        self.fork_in(FiberScope::local(self.fiber.clone()), body)
    }

    /// Forks a child into the global scope; it outlives this fiber.
    pub fn fork_daemon<A, E, F, Fut>(&self, body: F) -> RuntimeFiber<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        self.fork_in(FiberScope::Global, body)
    }

    /// Forks a child registered with `scope`.
    ///
    /// The child inherits this fiber's flags (minus `WindDown`), a forked copy
    /// of its refs, its environment and its supervisor.
    pub fn fork_in<A, E, F, Fut>(&self, scope: FiberScope, body: F) -> RuntimeFiber<A, E>
    where
        A: Send + 'static,
        E: Send + 'static,
        F: FnOnce(Self) -> Fut + Send + 'static,
        Fut: Future<Output = Result<A, E>> + Send + 'static,
    {
        let child_id = FiberId::new();
        let (flags, refs, env) = {
            let state = self.fiber.core().state();
            (
                state.flags.disable(RuntimeFlag::WIND_DOWN),
                state.refs.fork_as(child_id),
                state.env.clone(),
            )
        };
        let birth = Birth {
            parent: Some(self.fiber.clone()),
            flags,
            refs,
            env,
            scope,
            inline: false,
        };
        spawn_fiber(self.fiber.core().runtime(), child_id, birth, body)
    }

    /// Waits for `fiber`, merges its refs and flags into this fiber, and
    /// returns its result.
    #[must_use]
    pub fn join<A, E>(&self, fiber: RuntimeFiber<A, E>) -> Join<A, E> {
        Join {
            cx: self.clone(),
            fiber: Some(fiber),
        }
    }

    /// Merges a finished child's refs into this fiber, then applies the
    /// child's flag changes except `Interruption` and `WindDown`.
    pub fn inherit_all(&self, child: &FiberHandle) {
        let (child_refs, delta) = {
            let state = child.core().state();
            let delta = state
                .forked_flags
                .diff(state.flags)
                .exclude(RuntimeFlag::INTERRUPTION)
                .exclude(RuntimeFlag::WIND_DOWN);
            (state.refs.clone(), delta)
        };
        let id = self.id();
        let mut state = self.fiber.core().state();
        state.refs.join_as(id, &child_refs);
        state.flags = state.flags.patch(delta);
        trace!(fiber_id = %id, child = %child.id(), flags = %delta, "inherited child state");
    }

    /// The fiber's live children.
    #[must_use]
    pub fn children(&self) -> Vec<FiberHandle> {
        self.fiber.child_list()
    }
}

impl fmt::Debug for FiberCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberCx").field("fiber", &self.id()).finish()
    }
}

/// Future returned by [`FiberCx::with_flags`].
#[must_use = "futures do nothing unless polled"]
pub struct WithFlags<F: Future> {
    cx: FiberCx,
    patch: RuntimeFlagsPatch,
    /// Set while the patch is applied.
    revert: Option<RuntimeFlagsPatch>,
    future: Pin<Box<F>>,
    finished: bool,
    /// Held back while an interruption is due at region exit.
    output: Option<F::Output>,
}

impl<F: Future> Unpin for WithFlags<F> {}

impl<F: Future> WithFlags<F> {
    fn exit_region(&mut self) {
        if let Some(revert) = self.revert.take() {
            self.cx.update_flags(revert);
        }
    }
}

impl<F: Future> Future for WithFlags<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        if !this.finished {
            if this.revert.is_none() {
                let before = this.cx.flags();
                let inside = before.patch(this.patch);
                this.cx.update_flags(before.diff(inside));
                this.revert = Some(inside.diff(before));
                // Entering an interruptible region honors a pending interrupt.
                if this.cx.interrupt_due() {
                    return Poll::Pending;
                }
            }
            let Poll::Ready(output) = this.future.as_mut().poll(cx) else {
                return Poll::Pending;
            };
            this.exit_region();
            this.finished = true;
            this.output = Some(output);
        }
        if this.cx.interrupt_due() {
            return Poll::Pending;
        }
        this.output.take().map_or(Poll::Pending, Poll::Ready)
    }
}

impl<F: Future> Drop for WithFlags<F> {
    fn drop(&mut self) {
        self.exit_region();
    }
}

/// Future returned by [`FiberCx::checkpoint`].
#[must_use = "futures do nothing unless polled"]
pub struct Checkpoint {
    cx: FiberCx,
}

impl Future for Checkpoint {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.cx.interrupt_due() {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}

/// Future returned by [`FiberCx::yield_now`].
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    fiber: FiberHandle,
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        self.fiber.tell(FiberMessage::YieldNow);
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Future returned by [`FiberCx::join`].
#[must_use = "futures do nothing unless polled"]
pub struct Join<A, E> {
    cx: FiberCx,
    fiber: Option<RuntimeFiber<A, E>>,
}

impl<A, E> Future for Join<A, E> {
    type Output = Result<A, Cause<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let Some(fiber) = this.fiber.as_mut() else {
            return Poll::Ready(Err(Cause::die("join polled after completion")));
        };
        let Poll::Ready(exit) = Pin::new(fiber).poll(cx) else {
            return Poll::Pending;
        };
        if let Some(fiber) = this.fiber.take() {
            this.cx.inherit_all(fiber.handle());
        }
        Poll::Ready(exit.into_result())
    }
}
