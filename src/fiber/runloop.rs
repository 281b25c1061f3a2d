//! The per-fiber state machine and its drain loop.
//!
//! A fiber's state is only mutated by the thread holding its mailbox claim,
//! with two exceptions that go through their own locks: wakers flip the
//! suspension state, and observers may be attached from anywhere.

use super::message::{Continuation, FiberMessage, StatefulFn};
use super::waker::FiberWaker;
use super::{FiberHandle, FiberStatus, Mailbox};
use crate::fiber_ref::FiberRefs;
use crate::runtime::{Environment, RuntimeShared};
use crate::supervisor::{supervisor_ref, Supervisor};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{Cause, ErasedExit, FiberId, RuntimeFlags};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

thread_local! {
    static CURRENT_FIBER: RefCell<Option<FiberHandle>> = const { RefCell::new(None) };
    static DRAINING: RefCell<Vec<FiberId>> = const { RefCell::new(Vec::new()) };
}

/// A callback run once with a fiber's exit.
pub(crate) type Observer = Box<dyn FnOnce(&ErasedExit) + Send>;

/// Fiber state owned by the drainer.
pub(crate) struct FiberState {
    pub(crate) flags: RuntimeFlags,
    /// The flags the fiber was forked with; joins merge only what changed.
    pub(crate) forked_flags: RuntimeFlags,
    pub(crate) refs: FiberRefs,
    pub(crate) env: Environment,
    pub(crate) children: BTreeMap<FiberId, FiberHandle>,
    /// Interruption requested but not yet honored.
    pub(crate) interrupted: Cause,
}

enum Suspension {
    /// A `Resume` is queued or about to be.
    Idle,
    /// The body is being polled; `woken` records a wake during the poll.
    Polling { woken: bool },
    /// Waiting for a waker.
    Parked(Continuation),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drained {
    Empty,
    Yielded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Yield,
}

pub(crate) struct FiberCore {
    id: FiberId,
    mailbox: Mailbox,
    state: Mutex<FiberState>,
    suspension: Mutex<Suspension>,
    completion: Completion,
    /// Whether this fiber counts towards runtime metrics.
    metered: bool,
    runtime: Arc<RuntimeShared>,
}

impl FiberCore {
    pub(crate) fn new(
        id: FiberId,
        flags: RuntimeFlags,
        refs: FiberRefs,
        env: Environment,
        runtime: Arc<RuntimeShared>,
    ) -> Arc<Self> {
        let metered = flags.runtime_metrics();
        if metered {
            runtime.metrics.record_start();
        }
        Arc::new(Self {
            id,
            mailbox: Mailbox::new(),
            state: Mutex::new(FiberState {
                flags,
                forked_flags: flags,
                refs,
                env,
                children: BTreeMap::new(),
                interrupted: Cause::Empty,
            }),
            suspension: Mutex::new(Suspension::Idle),
            completion: Completion::new(),
            metered,
            runtime,
        })
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.runtime
    }

    pub(crate) fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FiberState> {
        self.state.lock()
    }

    pub(crate) fn flags(&self) -> RuntimeFlags {
        self.state.lock().flags
    }

    pub(crate) fn supervisor(&self) -> Supervisor {
        self.state.lock().refs.get_or_default(supervisor_ref())
    }

    pub(crate) fn is_done(&self) -> bool {
        matches!(*self.suspension.lock(), Suspension::Done)
    }

    pub(crate) fn status(&self) -> FiberStatus {
        let flags = self.flags();
        match *self.suspension.lock() {
            Suspension::Done => FiberStatus::Done,
            Suspension::Parked(_) => FiberStatus::Suspended { flags },
            Suspension::Idle | Suspension::Polling { .. } => FiberStatus::Running { flags },
        }
    }

    /// Returns true if the current thread is inside this fiber's drain.
    pub(crate) fn is_draining_here(&self) -> bool {
        DRAINING.with(|ids| ids.borrow().contains(&self.id))
    }

    /// Takes the pending interruption if the fiber may be interrupted now.
    pub(crate) fn take_interrupt_if_interruptible(&self) -> Option<Cause> {
        let mut state = self.state.lock();
        if state.flags.interruptible() && !state.interrupted.is_empty() {
            Some(mem::take(&mut state.interrupted))
        } else {
            None
        }
    }

    pub(crate) fn interrupt_pending(&self) -> bool {
        let state = self.state.lock();
        state.flags.interruptible() && !state.interrupted.is_empty()
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Enqueues `message` and drains on the calling thread if no other
    /// thread is draining.
    pub(crate) fn tell(self: &Arc<Self>, message: FiberMessage) {
        self.mailbox.push(message);
        self.drain_if_idle();
    }

    /// Enqueues `message` and leaves the drain to the worker pool.
    pub(crate) fn tell_later(self: &Arc<Self>, message: FiberMessage) {
        self.mailbox.push(message);
        self.schedule_drain();
    }

    /// Queues the body and starts draining, inline or on the pool.
    pub(crate) fn start(self: &Arc<Self>, body: Continuation, inline: bool) {
        if inline {
            self.tell(FiberMessage::Resume(body));
        } else {
            self.tell_later(FiberMessage::Resume(body));
        }
    }

    fn schedule_drain(self: &Arc<Self>) {
        let core = Arc::clone(self);
        self.runtime.pool.execute(move || core.drain_if_idle());
    }

    pub(crate) fn drain_if_idle(self: &Arc<Self>) {
        loop {
            if !self.mailbox.try_claim() {
                return;
            }
            let drained = self.drain();
            self.mailbox.release();
            if drained == Drained::Yielded && !self.runtime.pool.is_shutdown() {
                trace!(fiber_id = %self.id, "fiber yielded its thread");
                self.schedule_drain();
                return;
            }
            if self.mailbox.is_empty() {
                return;
            }
        }
    }

    /// Wakes a parked body, or notes the wake if the body is mid-poll.
    pub(crate) fn wake(self: &Arc<Self>) {
        let mut suspension = self.suspension.lock();
        match &mut *suspension {
            Suspension::Polling { woken } => {
                *woken = true;
                return;
            }
            Suspension::Parked(_) => {}
            Suspension::Idle | Suspension::Done => return,
        }
        let Suspension::Parked(body) = mem::replace(&mut *suspension, Suspension::Idle) else {
            return;
        };
        drop(suspension);
        self.tell_later(FiberMessage::Resume(body));
    }

    // ========================================================================
    // Drain loop
    // ========================================================================

    fn drain(self: &Arc<Self>) -> Drained {
        let handle = FiberHandle::from_core(Arc::clone(self));
        let _drain = DrainGuard::enter(&handle, self.flags().current_fiber());
        let mut ops = 0_u32;
        while let Some(message) = self.mailbox.pop() {
            if self.metered {
                self.runtime.metrics.record_message();
            }
            trace!(fiber_id = %self.id, kind = message.kind(), "processing message");
            let step = match message {
                FiberMessage::InterruptSignal(cause) => {
                    self.on_interrupt_signal(&handle, cause);
                    Step::Continue
                }
                FiberMessage::Stateful(f) => {
                    self.on_stateful(&handle, f);
                    Step::Continue
                }
                FiberMessage::Resume(body) => self.on_resume(&handle, body, &mut ops),
                FiberMessage::YieldNow => {
                    if !self.is_done() && self.flags().cooperative_yielding() {
                        Step::Yield
                    } else {
                        Step::Continue
                    }
                }
            };
            if step == Step::Yield {
                return Drained::Yielded;
            }
        }
        Drained::Empty
    }

    fn on_interrupt_signal(self: &Arc<Self>, handle: &FiberHandle, cause: Cause) {
        let interruptible = {
            let mut state = self.state.lock();
            state.interrupted = mem::take(&mut state.interrupted).then(cause);
            state.flags.interruptible()
        };
        debug!(fiber_id = %self.id, interruptible, "interrupt signal received");
        if !interruptible {
            return;
        }
        let parked = {
            let mut suspension = self.suspension.lock();
            if matches!(*suspension, Suspension::Parked(_)) {
                match mem::replace(&mut *suspension, Suspension::Idle) {
                    Suspension::Parked(body) => Some(body),
                    _ => None,
                }
            } else {
                None
            }
        };
        if let Some(body) = parked {
            if let Some(cause) = self.take_interrupt_if_interruptible() {
                self.finish(handle, body.0.interrupt(cause));
            }
        }
    }

    fn on_stateful(&self, handle: &FiberHandle, f: StatefulFn) {
        let status = self.status();
        guarded(self.id, "stateful message", || f(handle, status));
    }

    fn on_resume(self: &Arc<Self>, handle: &FiberHandle, body: Continuation, ops: &mut u32) -> Step {
        if self.is_done() {
            return Step::Continue;
        }
        if let Some(cause) = self.take_interrupt_if_interruptible() {
            self.finish(handle, body.0.interrupt(cause));
            return Step::Continue;
        }

        *self.suspension.lock() = Suspension::Polling { woken: false };
        let supervisor = self.supervisor();
        let flags = self.flags();
        guarded(self.id, "supervisor on_resume", || supervisor.on_resume(handle));
        if flags.op_supervision() {
            guarded(self.id, "supervisor on_effect", || supervisor.on_effect(handle));
        }

        let waker = FiberWaker::waker_for(self);
        let mut cx = Context::from_waker(&waker);
        let mut body = body.0;
        if let Poll::Ready(exit) = body.poll_body(&mut cx) {
            self.finish(handle, exit);
            return Step::Continue;
        }

        if let Some(cause) = self.take_interrupt_if_interruptible() {
            self.finish(handle, body.interrupt(cause));
            return Step::Continue;
        }

        {
            let mut suspension = self.suspension.lock();
            if matches!(*suspension, Suspension::Polling { woken: true }) {
                *suspension = Suspension::Idle;
                drop(suspension);
                self.mailbox.push(FiberMessage::Resume(Continuation(body)));
            } else {
                *suspension = Suspension::Parked(Continuation(body));
            }
        }
        guarded(self.id, "supervisor on_suspend", || supervisor.on_suspend(handle));

        *ops += 1;
        let budget = self.runtime.max_ops_before_yield;
        if self.flags().cooperative_yielding() && *ops >= budget && !self.mailbox.is_empty() {
            Step::Yield
        } else {
            Step::Continue
        }
    }

    /// Completes the fiber: supervisor, metrics, children, observers, then
    /// joiners, in that order.
    fn finish(self: &Arc<Self>, handle: &FiberHandle, exit: ErasedExit) {
        *self.suspension.lock() = Suspension::Done;
        let (children, supervisor) = {
            let mut state = self.state.lock();
            (
                mem::take(&mut state.children),
                state.refs.get_or_default(supervisor_ref()),
            )
        };
        debug!(
            fiber_id = %self.id,
            exit = exit.label(),
            children = children.len(),
            "fiber finished"
        );
        guarded(self.id, "supervisor on_end", || supervisor.on_end(&exit, handle));
        if self.metered {
            self.runtime.metrics.record_exit(&exit);
        }
        for child in children.into_values() {
            child
                .core()
                .tell(FiberMessage::InterruptSignal(Cause::interrupt(self.id)));
        }
        self.completion.complete(self.id, &exit);
    }

    // ========================================================================
    // Completion
    // ========================================================================

    pub(crate) fn add_observer(&self, observer: Observer) {
        self.completion.add_observer(self.id, observer);
    }

    pub(crate) fn poll_exit(&self, waker: Option<&Waker>) -> Option<ErasedExit> {
        self.completion.poll(waker)
    }

    pub(crate) fn await_exit(&self) -> ErasedExit {
        self.completion.wait()
    }
}

/// Runs `f`, logging instead of unwinding if it panics.
///
/// Callbacks run while the mailbox claim is held; a panic escaping here would
/// leave the fiber claimed forever.
fn guarded(fiber_id: FiberId, what: &'static str, f: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(f)) {
        let defect = crate::types::Defect::from_panic(payload.as_ref());
        warn!(fiber_id = %fiber_id, callback = what, panic = %defect, "fiber callback panicked");
    }
}

struct DrainGuard {
    previous: Option<Option<FiberHandle>>,
}

impl DrainGuard {
    fn enter(handle: &FiberHandle, track_current: bool) -> Self {
        DRAINING.with(|ids| ids.borrow_mut().push(handle.id()));
        let previous = track_current
            .then(|| CURRENT_FIBER.with(|current| current.replace(Some(handle.clone()))));
        Self { previous }
    }
}

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|ids| {
            ids.borrow_mut().pop();
        });
        if let Some(previous) = self.previous.take() {
            CURRENT_FIBER.with(|current| *current.borrow_mut() = previous);
        }
    }
}

/// The fiber being drained on this thread, if it runs with `CurrentFiber`.
pub(crate) fn current_fiber() -> Option<FiberHandle> {
    CURRENT_FIBER.with(|current| current.borrow().clone())
}

#[derive(Default)]
struct CompletionState {
    exit: Option<ErasedExit>,
    observers: Vec<Observer>,
    wakers: Vec<Waker>,
}

/// The exit of a fiber plus everyone waiting on it.
struct Completion {
    state: Mutex<CompletionState>,
    done: Condvar,
}

impl Completion {
    fn new() -> Self {
        Self {
            state: Mutex::new(CompletionState::default()),
            done: Condvar::new(),
        }
    }

    /// Observers attached after completion run immediately.
    fn add_observer(&self, fiber_id: FiberId, observer: Observer) {
        let mut state = self.state.lock();
        if let Some(exit) = state.exit.clone() {
            drop(state);
            guarded(fiber_id, "exit observer", || observer(&exit));
        } else {
            state.observers.push(observer);
        }
    }

    /// Runs observers, including any attached while they run, then publishes
    /// the exit to joiners.
    fn complete(&self, fiber_id: FiberId, exit: &ErasedExit) {
        let wakers = loop {
            let batch = {
                let mut state = self.state.lock();
                if state.observers.is_empty() {
                    state.exit = Some(exit.clone());
                    break mem::take(&mut state.wakers);
                }
                mem::take(&mut state.observers)
            };
            for observer in batch {
                guarded(fiber_id, "exit observer", || observer(exit));
            }
        };
        self.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }

    fn poll(&self, waker: Option<&Waker>) -> Option<ErasedExit> {
        let mut state = self.state.lock();
        if state.exit.is_none() {
            if let Some(waker) = waker {
                if !state.wakers.iter().any(|w| w.will_wake(waker)) {
                    state.wakers.push(waker.clone());
                }
            }
        }
        state.exit.clone()
    }

    fn wait(&self) -> ErasedExit {
        let mut state = self.state.lock();
        loop {
            if let Some(exit) = &state.exit {
                return exit.clone();
            }
            self.done.wait(&mut state);
        }
    }
}
