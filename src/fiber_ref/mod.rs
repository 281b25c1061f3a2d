//! Per-fiber contextual references.
//!
//! A [`FiberRef`] is a typed handle to a value that every fiber sees its own
//! copy of. Values live in the fiber's [`FiberRefs`]; a ref that a fiber has
//! never written reads as the ref's initial value.
//!
//! Each ref carries:
//!
//! - a value-level [`Differ`] used to reconcile the ref across fork and join
//!   (replace-on-update unless the ref supplies its own),
//! - a *fork* patch applied to the parent's value when a child is forked,
//! - a *join* function merging a finished child's value into the parent's.
//!
//! Refs are stored type-erased so that one map can hold refs of any type.
//! A stored value whose type does not match its ref is a programming error and
//! panics.

mod patch;
mod refs;

pub use patch::{FiberRefsDiffer, FiberRefsPatch};
pub use refs::FiberRefs;

use crate::patch::{Differ, UpdateDiffer};
use crate::types::FiberRefId;
use core::fmt;
use std::any::Any;
use std::cmp::Ordering;
use std::marker::PhantomData;
use std::sync::Arc;

/// A type-erased fiber ref value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// A type-erased value-level patch.
pub type AnyPatch = Arc<dyn Any + Send + Sync>;

type JoinFn = dyn Fn(&AnyValue, &AnyValue) -> AnyValue + Send + Sync;

fn downcast<T: 'static>(value: &(dyn Any + Send + Sync), what: &str) -> T
where
    T: Clone,
{
    match value.downcast_ref::<T>() {
        Some(v) => v.clone(),
        None => panic!(
            "fiber ref {what} has type {}, which does not match its ref",
            std::any::type_name::<T>()
        ),
    }
}

/// Object-safe view of a value-level differ.
trait ErasedDiffer: Send + Sync {
    fn diff(&self, old: &AnyValue, new: &AnyValue) -> AnyPatch;
    fn combine(&self, first: &AnyPatch, second: &AnyPatch) -> AnyPatch;
    fn patch(&self, patch: &AnyPatch, old: &AnyValue) -> AnyValue;
    fn values_equal(&self, a: &AnyValue, b: &AnyValue) -> bool;
}

struct TypedDiffer<D>(D);

impl<D> ErasedDiffer for TypedDiffer<D>
where
    D: Differ + Send + Sync + 'static,
    D::Value: Clone + PartialEq + Send + Sync + 'static,
    D::Patch: Clone + Send + Sync + 'static,
{
    fn diff(&self, old: &AnyValue, new: &AnyValue) -> AnyPatch {
        let old: D::Value = downcast(old.as_ref(), "value");
        let new: D::Value = downcast(new.as_ref(), "value");
        Arc::new(self.0.diff(&old, &new))
    }

    fn combine(&self, first: &AnyPatch, second: &AnyPatch) -> AnyPatch {
        let first: D::Patch = downcast(first.as_ref(), "patch");
        let second: D::Patch = downcast(second.as_ref(), "patch");
        Arc::new(self.0.combine(first, second))
    }

    fn patch(&self, patch: &AnyPatch, old: &AnyValue) -> AnyValue {
        let patch: D::Patch = downcast(patch.as_ref(), "patch");
        let old: D::Value = downcast(old.as_ref(), "value");
        Arc::new(self.0.patch(&patch, &old))
    }

    fn values_equal(&self, a: &AnyValue, b: &AnyValue) -> bool {
        Arc::ptr_eq(a, b) || {
            let a: D::Value = downcast(a.as_ref(), "value");
            let b: D::Value = downcast(b.as_ref(), "value");
            a == b
        }
    }
}

struct FiberRefInner {
    id: FiberRefId,
    initial: AnyValue,
    differ: Box<dyn ErasedDiffer>,
    fork: AnyPatch,
    join: Box<JoinFn>,
}

/// The type-erased identity of a [`FiberRef`], used as a map key.
///
/// Keys compare by ref id.
#[derive(Clone)]
pub struct FiberRefKey(Arc<FiberRefInner>);

impl FiberRefKey {
    /// The ref's id.
    #[must_use]
    pub fn id(&self) -> FiberRefId {
        self.0.id
    }

    pub(crate) fn initial(&self) -> &AnyValue {
        &self.0.initial
    }

    pub(crate) fn diff(&self, old: &AnyValue, new: &AnyValue) -> AnyPatch {
        self.0.differ.diff(old, new)
    }

    pub(crate) fn combine(&self, first: &AnyPatch, second: &AnyPatch) -> AnyPatch {
        self.0.differ.combine(first, second)
    }

    pub(crate) fn patch(&self, patch: &AnyPatch, old: &AnyValue) -> AnyValue {
        self.0.differ.patch(patch, old)
    }

    pub(crate) fn fork_patch(&self) -> &AnyPatch {
        &self.0.fork
    }

    pub(crate) fn join(&self, parent: &AnyValue, child: &AnyValue) -> AnyValue {
        (self.0.join)(parent, child)
    }

    pub(crate) fn values_equal(&self, a: &AnyValue, b: &AnyValue) -> bool {
        self.0.differ.values_equal(a, b)
    }
}

impl PartialEq for FiberRefKey {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for FiberRefKey {}

impl PartialOrd for FiberRefKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FiberRefKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl fmt::Debug for FiberRefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FiberRefKey({})", self.id())
    }
}

/// A typed per-fiber reference.
pub struct FiberRef<A> {
    key: FiberRefKey,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for FiberRef<A> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A> fmt::Debug for FiberRef<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberRef")
            .field("id", &self.key.id())
            .field("type", &std::any::type_name::<A>())
            .finish()
    }
}

impl<A> FiberRef<A>
where
    A: Clone + PartialEq + Send + Sync + 'static,
{
    /// A ref with replace-on-update semantics: forks copy the parent's value
    /// and joins take the child's.
    #[must_use]
    pub fn new(initial: A) -> Self {
        Self::with_differ(initial, UpdateDiffer::new(), None)
    }

    /// A ref whose joins merge with `join(parent, child)`.
    #[must_use]
    pub fn with_join<J>(initial: A, join: J) -> Self
    where
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        Self::custom(initial, UpdateDiffer::new(), None, join)
    }

    /// A ref reconciled by `differ`; forked children receive the parent's
    /// value patched with `fork`.
    #[must_use]
    pub fn with_differ<D>(initial: A, differ: D, fork: D::Patch) -> Self
    where
        D: Differ<Value = A> + Send + Sync + 'static,
        D::Patch: Clone + Send + Sync + 'static,
    {
        Self::custom(initial, differ, fork, |_parent: &A, child: &A| child.clone())
    }

    /// A ref with every behavior supplied by the caller.
    #[must_use]
    pub fn custom<D, J>(initial: A, differ: D, fork: D::Patch, join: J) -> Self
    where
        D: Differ<Value = A> + Send + Sync + 'static,
        D::Patch: Clone + Send + Sync + 'static,
        J: Fn(&A, &A) -> A + Send + Sync + 'static,
    {
        let join: Box<JoinFn> = Box::new(move |parent: &AnyValue, child: &AnyValue| {
            let parent: A = downcast(parent.as_ref(), "value");
            let child: A = downcast(child.as_ref(), "value");
            Arc::new(join(&parent, &child)) as AnyValue
        });
        let inner = FiberRefInner {
            id: FiberRefId::next(),
            initial: Arc::new(initial),
            differ: Box::new(TypedDiffer(differ)),
            fork: Arc::new(fork),
            join,
        };
        Self {
            key: FiberRefKey(Arc::new(inner)),
            _marker: PhantomData,
        }
    }

    /// The ref's id.
    #[must_use]
    pub fn id(&self) -> FiberRefId {
        self.key.id()
    }

    /// The value a fiber sees before it writes the ref.
    #[must_use]
    pub fn initial(&self) -> A {
        downcast(self.key.initial().as_ref(), "initial value")
    }

    /// The type-erased key.
    #[must_use]
    pub fn key(&self) -> &FiberRefKey {
        &self.key
    }

    pub(crate) fn erase_value(value: A) -> AnyValue {
        Arc::new(value)
    }

    pub(crate) fn value_of(value: &AnyValue) -> A {
        downcast(value.as_ref(), "value")
    }
}
