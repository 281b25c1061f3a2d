//! Messages delivered to a fiber's mailbox.

use super::{ExitSlot, FiberHandle, FiberStatus};
use crate::types::{Cause, Defect, ErasedExit, Exit};
use core::fmt;
use std::future::Future;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A callback run on the fiber's own drain with access to its handle and
/// status.
pub type StatefulFn = Box<dyn FnOnce(&FiberHandle, FiberStatus) + Send>;

/// A message to a fiber.
///
/// Messages are processed one at a time, in the order they were sent, by
/// whichever thread holds the fiber's drain claim.
pub enum FiberMessage {
    /// Requests interruption. Causes accumulate; the fiber honors them the
    /// next time it is interruptible.
    InterruptSignal(Cause),
    /// Runs a callback against the fiber's state.
    Stateful(StatefulFn),
    /// Continues the fiber's body.
    Resume(Continuation),
    /// Offers to give up the current thread.
    YieldNow,
}

impl FiberMessage {
    /// Builds a `Stateful` message from a closure.
    pub fn stateful<F>(f: F) -> Self
    where
        F: FnOnce(&FiberHandle, FiberStatus) + Send + 'static,
    {
        Self::Stateful(Box::new(f))
    }

    /// The message kind, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InterruptSignal(_) => "interrupt_signal",
            Self::Stateful(_) => "stateful",
            Self::Resume(_) => "resume",
            Self::YieldNow => "yield_now",
        }
    }
}

impl fmt::Debug for FiberMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InterruptSignal(cause) => f.debug_tuple("InterruptSignal").field(cause).finish(),
            other => f.write_str(other.kind()),
        }
    }
}

/// The suspended remainder of a fiber's body.
pub struct Continuation(pub(crate) Box<dyn FiberBody>);

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Continuation(..)")
    }
}

/// A fiber body with its result type erased.
///
/// The typed exit is written to the fiber's exit slot; the drain loop only
/// sees the erased shape.
pub(crate) trait FiberBody: Send {
    /// Polls the body. Panics are captured as defects.
    fn poll_body(&mut self, cx: &mut Context<'_>) -> Poll<ErasedExit>;

    /// Abandons the body, dropping its future, and records `cause` as the
    /// exit.
    fn interrupt(self: Box<Self>, cause: Cause) -> ErasedExit;
}

/// Where a typed body is in its life.
enum Stage<G, F> {
    /// Not polled yet; the future is built on first poll.
    Init(G),
    Running(Pin<Box<F>>),
    Spent,
}

/// A fiber body whose future is built from `start` on the fiber's first poll,
/// so constructing it runs on the fiber and panics become defects.
pub(crate) struct TypedBody<A, E, G, F> {
    stage: Stage<G, F>,
    slot: Arc<ExitSlot<A, E>>,
}

impl<A, E, G, F> TypedBody<A, E, G, F> {
    pub(crate) fn new(start: G, slot: Arc<ExitSlot<A, E>>) -> Self {
        Self {
            stage: Stage::Init(start),
            slot,
        }
    }
}

impl<A, E, G, F> FiberBody for TypedBody<A, E, G, F>
where
    A: Send + 'static,
    E: Send + 'static,
    G: FnOnce() -> F + Send + 'static,
    F: Future<Output = Result<A, E>> + Send + 'static,
{
    fn poll_body(&mut self, cx: &mut Context<'_>) -> Poll<ErasedExit> {
        let stage = &mut self.stage;
        let polled = catch_unwind(AssertUnwindSafe(|| {
            if let Stage::Init(_) = stage {
                if let Stage::Init(start) = mem::replace(stage, Stage::Spent) {
                    *stage = Stage::Running(Box::pin(start()));
                }
            }
            match stage {
                Stage::Running(future) => future.as_mut().poll(cx),
                Stage::Init(_) | Stage::Spent => Poll::Pending,
            }
        }));
        let exit = match polled {
            Ok(Poll::Pending) => return Poll::Pending,
            Ok(Poll::Ready(result)) => Exit::from(result),
            Err(payload) => Exit::Failure(Cause::Die(Defect::from_panic(payload.as_ref()))),
        };
        self.stage = Stage::Spent;
        Poll::Ready(self.slot.store(exit))
    }

    fn interrupt(self: Box<Self>, cause: Cause) -> ErasedExit {
        let Self { stage, slot } = *self;
        let mut cause = cause.widen::<E>();
        if let Err(payload) = catch_unwind(AssertUnwindSafe(move || drop(stage))) {
            cause = cause.then(Cause::Die(Defect::from_panic(payload.as_ref())));
        }
        slot.store(Exit::Failure(cause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FiberId;
    use std::task::Waker;

    fn noop_cx<R>(f: impl FnOnce(&mut Context<'_>) -> R) -> R {
        let waker = Waker::from(Arc::new(crate::fiber::waker::NoopWaker));
        let mut cx = Context::from_waker(&waker);
        f(&mut cx)
    }

    #[test]
    fn typed_body_records_success() {
        let slot = Arc::new(ExitSlot::<u8, ()>::new());
        let mut body = TypedBody::new(|| async { Ok::<_, ()>(7_u8) }, slot.clone());
        let erased = noop_cx(|cx| body.poll_body(cx));
        assert!(matches!(erased, Poll::Ready(Exit::Success(()))));
        assert_eq!(slot.take(), Some(Exit::Success(7)));
    }

    #[test]
    fn typed_body_captures_panic() {
        let slot = Arc::new(ExitSlot::<u8, ()>::new());
        let mut body = TypedBody::new(
            || {
                if true {
                    panic!("kaboom");
                }
                async { Ok::<u8, ()>(0) }
            },
            slot.clone(),
        );
        let erased = noop_cx(|cx| body.poll_body(cx));
        assert!(matches!(erased, Poll::Ready(Exit::Failure(Cause::Die(_)))));
        let exit = slot.take().expect("exit recorded");
        assert_eq!(exit.cause().and_then(|c| c.defects().first().map(|d| d.message().to_string())), Some("kaboom".to_string()));
    }

    #[test]
    fn interrupt_drops_future_and_records_cause() {
        struct Finalizer(Arc<std::sync::atomic::AtomicBool>);
        impl Drop for Finalizer {
            fn drop(&mut self) {
                self.0.store(true, std::sync::atomic::Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let guard = Finalizer(dropped.clone());
        let slot = Arc::new(ExitSlot::<(), ()>::new());
        let mut body: Box<dyn FiberBody> = Box::new(TypedBody::new(
            move || async move {
                let _guard = guard;
                std::future::pending::<()>().await;
                Ok(())
            },
            slot.clone(),
        ));
        assert!(noop_cx(|cx| body.poll_body(cx)).is_pending());
        assert!(!dropped.load(std::sync::atomic::Ordering::SeqCst));
        let erased = body.interrupt(Cause::interrupt(FiberId::new_for_test(3)));
        assert!(erased.is_interrupted());
        assert!(dropped.load(std::sync::atomic::Ordering::SeqCst));
        assert!(slot.take().is_some_and(|e| e.is_interrupted()));
    }

    #[test]
    fn message_kinds() {
        assert_eq!(FiberMessage::YieldNow.kind(), "yield_now");
        assert_eq!(FiberMessage::stateful(|_, _| {}).kind(), "stateful");
        let dbg = format!("{:?}", FiberMessage::InterruptSignal(Cause::interrupt(FiberId::NONE)));
        assert!(dbg.starts_with("InterruptSignal"), "{dbg}");
    }
}
