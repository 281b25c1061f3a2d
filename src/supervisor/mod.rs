//! Composable fiber lifecycle observers.
//!
//! A [`Supervisor`] is told when fibers start, end, suspend, resume and (with
//! `OpSupervision` enabled) take a step. Supervisors form a closed set of
//! variants combined with [`zip`](Supervisor::zip); a zipped pair forwards
//! every event to its left side, then its right side, synchronously on the
//! thread that is running the fiber.
//!
//! Two supervisors are equal when they are built from the same set of leaves.
//! Every constructor call creates a new leaf identity, so equality is identity
//! of leaves rather than comparison of behavior.
//!
//! The supervisor in effect for a fiber is itself a fiber ref (see
//! [`supervisor_ref`]) reconciled with [`SupervisorPatch`].

mod patch;

pub use patch::{SupervisorDiffer, SupervisorPatch};

use crate::fiber::FiberHandle;
use crate::fiber_ref::FiberRef;
use crate::runtime::Environment;
use crate::types::{ErasedExit, FiberId, SupervisorId};
use core::fmt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

/// The value a supervisor reports.
#[derive(Clone)]
pub enum SupervisorValue {
    /// Nothing to report.
    Unit,
    /// The fibers currently alive under the supervisor.
    Fibers(Vec<FiberHandle>),
    /// A caller-supplied value.
    Value(Arc<dyn Any + Send + Sync>),
    /// The values of a zipped pair.
    Pair(Box<SupervisorValue>, Box<SupervisorValue>),
}

impl SupervisorValue {
    /// Downcasts a [`Value`](Self::Value).
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Self::Value(v) => v.downcast_ref(),
            _ => None,
        }
    }

    /// The fiber ids of a [`Fibers`](Self::Fibers) value.
    #[must_use]
    pub fn fiber_ids(&self) -> Option<Vec<FiberId>> {
        match self {
            Self::Fibers(fibers) => Some(fibers.iter().map(FiberHandle::id).collect()),
            _ => None,
        }
    }
}

impl fmt::Debug for SupervisorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "Unit"),
            Self::Fibers(fibers) => f
                .debug_tuple("Fibers")
                .field(&fibers.iter().map(FiberHandle::id).collect::<Vec<_>>())
                .finish(),
            Self::Value(_) => write!(f, "Value(..)"),
            Self::Pair(left, right) => f.debug_tuple("Pair").field(left).field(right).finish(),
        }
    }
}

/// An ordered set of live fibers shared between a supervisor and its owner.
#[derive(Clone, Default)]
pub struct LiveFibers(Arc<Mutex<BTreeMap<FiberId, FiberHandle>>>);

impl LiveFibers {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The fibers in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<FiberHandle> {
        self.0.lock().values().cloned().collect()
    }

    /// The fiber ids in order.
    #[must_use]
    pub fn ids(&self) -> Vec<FiberId> {
        self.0.lock().keys().copied().collect()
    }

    /// Returns true if `id` is in the set.
    #[must_use]
    pub fn contains(&self, id: FiberId) -> bool {
        self.0.lock().contains_key(&id)
    }

    /// Number of fibers in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    fn insert(&self, fiber: &FiberHandle) {
        self.0.lock().insert(fiber.id(), fiber.clone());
    }

    fn remove(&self, id: FiberId) {
        self.0.lock().remove(&id);
    }
}

impl fmt::Debug for LiveFibers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.ids()).finish()
    }
}

type ValueMap = dyn Fn(SupervisorValue) -> SupervisorValue + Send + Sync;

/// A composable observer of fiber lifecycle events.
#[derive(Clone)]
pub enum Supervisor {
    /// Ignores every event and reports a fixed value.
    Const {
        /// Leaf identity.
        id: SupervisorId,
        /// The reported value.
        value: SupervisorValue,
    },
    /// Tracks the fibers it sees start until they end.
    Track {
        /// Leaf identity.
        id: SupervisorId,
        /// The tracked fibers.
        fibers: LiveFibers,
    },
    /// Mirrors live fibers into a set owned by someone else.
    FibersIn {
        /// Leaf identity.
        id: SupervisorId,
        /// The externally owned set.
        fibers: LiveFibers,
    },
    /// Broadcasts every event to both sides, left first.
    Zip(Arc<Supervisor>, Arc<Supervisor>),
    /// Delegates events to `underlying` but reports a mapped value.
    Proxy {
        /// Leaf identity.
        id: SupervisorId,
        /// The supervisor that observes events.
        underlying: Arc<Supervisor>,
        /// Maps the underlying value.
        map: Arc<ValueMap>,
    },
}

impl Supervisor {
    /// The empty supervisor: observes nothing, reports `Unit`.
    #[must_use]
    pub const fn none() -> Self {
        Self::Const {
            id: SupervisorId::NONE,
            value: SupervisorValue::Unit,
        }
    }

    /// A supervisor reporting `value` and ignoring every event.
    #[must_use]
    pub fn from_value<T: Any + Send + Sync>(value: T) -> Self {
        Self::Const {
            id: SupervisorId::next(),
            value: SupervisorValue::Value(Arc::new(value)),
        }
    }

    /// A supervisor tracking live fibers.
    #[must_use]
    pub fn track() -> Self {
        Self::Track {
            id: SupervisorId::next(),
            fibers: LiveFibers::new(),
        }
    }

    /// A supervisor mirroring live fibers into `fibers`.
    #[must_use]
    pub fn fibers_in(fibers: LiveFibers) -> Self {
        Self::FibersIn {
            id: SupervisorId::next(),
            fibers,
        }
    }

    /// A supervisor observing like `self` and reporting `f(self.value())`.
    #[must_use]
    pub fn map<F>(self, f: F) -> Self
    where
        F: Fn(SupervisorValue) -> SupervisorValue + Send + Sync + 'static,
    {
        Self::Proxy {
            id: SupervisorId::next(),
            underlying: Arc::new(self),
            map: Arc::new(f),
        }
    }

    /// Returns true for the empty supervisor.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::Const { id, .. } if *id == SupervisorId::NONE)
    }

    /// The leaf id, or `None` for a zipped pair.
    #[must_use]
    pub fn id(&self) -> Option<SupervisorId> {
        match self {
            Self::Const { id, .. }
            | Self::Track { id, .. }
            | Self::FibersIn { id, .. }
            | Self::Proxy { id, .. } => Some(*id),
            Self::Zip(..) => None,
        }
    }

    /// Combines two supervisors. The empty supervisor is dropped from either
    /// side.
    #[must_use]
    pub fn zip(self, that: Self) -> Self {
        if self.is_none() {
            that
        } else if that.is_none() {
            self
        } else {
            Self::Zip(Arc::new(self), Arc::new(that))
        }
    }

    /// The supervisor's current value.
    #[must_use]
    pub fn value(&self) -> SupervisorValue {
        match self {
            Self::Const { value, .. } => value.clone(),
            Self::Track { fibers, .. } | Self::FibersIn { fibers, .. } => {
                SupervisorValue::Fibers(fibers.snapshot())
            }
            Self::Zip(left, right) => {
                SupervisorValue::Pair(Box::new(left.value()), Box::new(right.value()))
            }
            Self::Proxy {
                underlying, map, ..
            } => map(underlying.value()),
        }
    }

    /// Removes `that` wherever it occurs in the composition.
    ///
    /// Returns the empty supervisor if `self` equals `that`, recurses through
    /// zipped pairs, and otherwise leaves `self` unchanged.
    #[must_use]
    pub fn remove_supervisor(&self, that: &Self) -> Self {
        if self == that {
            Self::none()
        } else if let Self::Zip(left, right) = self {
            left.remove_supervisor(that)
                .zip(right.remove_supervisor(that))
        } else {
            self.clone()
        }
    }

    /// The leaves of the composition keyed by id; the empty supervisor has
    /// no leaves.
    #[must_use]
    pub fn to_set(&self) -> BTreeMap<SupervisorId, Self> {
        let mut leaves = BTreeMap::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Zip(left, right) => {
                    stack.push(right);
                    stack.push(left);
                }
                leaf if leaf.is_none() => {}
                leaf => {
                    if let Some(id) = leaf.id() {
                        leaves.insert(id, leaf.clone());
                    }
                }
            }
        }
        leaves
    }

    /// Leaves in event delivery order.
    #[must_use]
    pub fn leaf_ids(&self) -> Vec<SupervisorId> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Zip(left, right) => {
                    stack.push(right);
                    stack.push(left);
                }
                leaf => out.extend(leaf.id().filter(|id| *id != SupervisorId::NONE)),
            }
        }
        out
    }

    /// Called when `fiber` is forked, before it runs.
    pub fn on_start(&self, env: &Environment, parent: Option<&FiberHandle>, fiber: &FiberHandle) {
        match self {
            Self::Const { .. } => {}
            Self::Track { fibers, .. } | Self::FibersIn { fibers, .. } => fibers.insert(fiber),
            Self::Zip(left, right) => {
                left.on_start(env, parent, fiber);
                right.on_start(env, parent, fiber);
            }
            Self::Proxy { underlying, .. } => underlying.on_start(env, parent, fiber),
        }
    }

    /// Called when `fiber` terminates with `exit`.
    pub fn on_end(&self, exit: &ErasedExit, fiber: &FiberHandle) {
        match self {
            Self::Const { .. } => {}
            Self::Track { fibers, .. } | Self::FibersIn { fibers, .. } => fibers.remove(fiber.id()),
            Self::Zip(left, right) => {
                left.on_end(exit, fiber);
                right.on_end(exit, fiber);
            }
            Self::Proxy { underlying, .. } => underlying.on_end(exit, fiber),
        }
    }

    /// Called before every step of `fiber` when `OpSupervision` is enabled.
    pub fn on_effect(&self, fiber: &FiberHandle) {
        match self {
            Self::Const { .. } | Self::Track { .. } | Self::FibersIn { .. } => {}
            Self::Zip(left, right) => {
                left.on_effect(fiber);
                right.on_effect(fiber);
            }
            Self::Proxy { underlying, .. } => underlying.on_effect(fiber),
        }
    }

    /// Called when `fiber` suspends.
    pub fn on_suspend(&self, fiber: &FiberHandle) {
        match self {
            Self::Const { .. } | Self::Track { .. } | Self::FibersIn { .. } => {}
            Self::Zip(left, right) => {
                left.on_suspend(fiber);
                right.on_suspend(fiber);
            }
            Self::Proxy { underlying, .. } => underlying.on_suspend(fiber),
        }
    }

    /// Called when `fiber` resumes.
    pub fn on_resume(&self, fiber: &FiberHandle) {
        match self {
            Self::Const { .. } | Self::Track { .. } | Self::FibersIn { .. } => {}
            Self::Zip(left, right) => {
                left.on_resume(fiber);
                right.on_resume(fiber);
            }
            Self::Proxy { underlying, .. } => underlying.on_resume(fiber),
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::none()
    }
}

impl PartialEq for Supervisor {
    fn eq(&self, other: &Self) -> bool {
        let mine = self.to_set();
        let theirs = other.to_set();
        mine.len() == theirs.len() && mine.keys().eq(theirs.keys())
    }
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const { id, .. } if *id == SupervisorId::NONE => write!(f, "None"),
            Self::Const { id, .. } => write!(f, "Const({id})"),
            Self::Track { id, .. } => write!(f, "Track({id})"),
            Self::FibersIn { id, .. } => write!(f, "FibersIn({id})"),
            Self::Zip(left, right) => write!(f, "Zip({left:?}, {right:?})"),
            Self::Proxy { id, underlying, .. } => write!(f, "Proxy({id}, {underlying:?})"),
        }
    }
}

/// The fiber ref holding the supervisor in effect for each fiber.
///
/// Forked children inherit the parent's supervisor unchanged; joins merge the
/// child's added and removed supervisors into the parent.
pub fn supervisor_ref() -> &'static FiberRef<Supervisor> {
    static CURRENT: OnceLock<FiberRef<Supervisor>> = OnceLock::new();
    CURRENT.get_or_init(|| {
        FiberRef::with_differ(Supervisor::none(), SupervisorDiffer, SupervisorPatch::Empty)
    })
}
