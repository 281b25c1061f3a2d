//! Failure provenance.
//!
//! A [`Cause`] records *why* a fiber did not succeed. Typed failures, defects
//! (panics) and interruptions all share one tree so that composed failures,
//! such as a cleanup that panicked while the fiber was being interrupted, keep
//! every piece of information.
//!
//! Trees can grow deep on long-lived fibers, so traversals walk them with an
//! explicit stack.

use super::id::FiberId;
use core::fmt;
use std::any::Any;
use std::collections::BTreeSet;
use std::convert::Infallible;

/// An unexpected failure captured from a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defect {
    message: String,
}

impl Defect {
    /// Creates a defect with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Creates a defect from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// The cause of a fiber's failure.
///
/// The default error type is [`Infallible`]: causes that travel through
/// mailboxes (interrupt signals) cannot carry typed failures, and are widened
/// into the fiber's own error type when it exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cause<E = Infallible> {
    /// No failure.
    Empty,
    /// An expected, typed failure.
    Fail(E),
    /// An unexpected failure (panic).
    Die(Defect),
    /// Interruption by the given fiber.
    Interrupt(FiberId),
    /// Two causes that happened one after the other.
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    /// Two causes that happened concurrently.
    Parallel(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// A typed failure.
    #[must_use]
    pub const fn fail(error: E) -> Self {
        Self::Fail(error)
    }

    /// A defect with the given message.
    #[must_use]
    pub fn die(message: impl Into<String>) -> Self {
        Self::Die(Defect::new(message))
    }

    /// Interruption by `fiber_id`.
    #[must_use]
    pub const fn interrupt(fiber_id: FiberId) -> Self {
        Self::Interrupt(fiber_id)
    }

    /// Sequential composition; `Empty` is the identity on both sides.
    #[must_use]
    pub fn then(self, that: Self) -> Self {
        match (self, that) {
            (Self::Empty, that) => that,
            (this, Self::Empty) => this,
            (this, that) => Self::Sequential(Box::new(this), Box::new(that)),
        }
    }

    /// Parallel composition; `Empty` is the identity on both sides.
    #[must_use]
    pub fn both(self, that: Self) -> Self {
        match (self, that) {
            (Self::Empty, that) => that,
            (this, Self::Empty) => this,
            (this, that) => Self::Parallel(Box::new(this), Box::new(that)),
        }
    }

    /// Leaf nodes in left-to-right order.
    fn leaves(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Sequential(left, right) | Self::Parallel(left, right) => {
                    stack.push(right);
                    stack.push(left);
                }
                leaf => out.push(leaf),
            }
        }
        out
    }

    /// Returns true if the cause contains no failure of any kind.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.leaves().iter().all(|leaf| matches!(leaf, Self::Empty))
    }

    /// Returns true if any leaf is an interruption.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.leaves()
            .iter()
            .any(|leaf| matches!(leaf, Self::Interrupt(_)))
    }

    /// Returns true if the cause is interruption and nothing else.
    #[must_use]
    pub fn is_interrupted_only(&self) -> bool {
        let leaves = self.leaves();
        leaves.iter().any(|leaf| matches!(leaf, Self::Interrupt(_)))
            && leaves
                .iter()
                .all(|leaf| matches!(leaf, Self::Interrupt(_) | Self::Empty))
    }

    /// Returns true if any leaf is a defect.
    #[must_use]
    pub fn is_die(&self) -> bool {
        self.leaves().iter().any(|leaf| matches!(leaf, Self::Die(_)))
    }

    /// Returns true if any leaf is a typed failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.leaves().iter().any(|leaf| matches!(leaf, Self::Fail(_)))
    }

    /// Every fiber that contributed an interruption.
    #[must_use]
    pub fn interruptors(&self) -> BTreeSet<FiberId> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Self::Interrupt(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Typed failures in left-to-right order.
    #[must_use]
    pub fn failures(&self) -> Vec<&E> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Self::Fail(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Defects in left-to-right order.
    #[must_use]
    pub fn defects(&self) -> Vec<&Defect> {
        self.leaves()
            .into_iter()
            .filter_map(|leaf| match leaf {
                Self::Die(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    /// Maps every typed failure.
    pub fn map<E2, F>(self, mut f: F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        self.map_with(&mut f)
    }

    fn map_with<E2, F>(self, f: &mut F) -> Cause<E2>
    where
        F: FnMut(E) -> E2,
    {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(e) => Cause::Fail(f(e)),
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Sequential(l, r) => {
                let l = l.map_with(f);
                Cause::Sequential(Box::new(l), Box::new(r.map_with(f)))
            }
            Self::Parallel(l, r) => {
                let l = l.map_with(f);
                Cause::Parallel(Box::new(l), Box::new(r.map_with(f)))
            }
        }
    }

    /// A structural copy with every typed failure replaced by `()`.
    ///
    /// Observers see exits of arbitrary fibers through this erased form.
    #[must_use]
    pub fn erase(&self) -> Cause<()> {
        match self {
            Self::Empty => Cause::Empty,
            Self::Fail(_) => Cause::Fail(()),
            Self::Die(d) => Cause::Die(d.clone()),
            Self::Interrupt(id) => Cause::Interrupt(*id),
            Self::Sequential(l, r) => Cause::Sequential(Box::new(l.erase()), Box::new(r.erase())),
            Self::Parallel(l, r) => Cause::Parallel(Box::new(l.erase()), Box::new(r.erase())),
        }
    }

    /// Drops typed failures, keeping defects and interruptions.
    #[must_use]
    pub fn strip_failures(self) -> Cause {
        match self {
            Self::Empty | Self::Fail(_) => Cause::Empty,
            Self::Die(d) => Cause::Die(d),
            Self::Interrupt(id) => Cause::Interrupt(id),
            Self::Sequential(l, r) => l.strip_failures().then(r.strip_failures()),
            Self::Parallel(l, r) => l.strip_failures().both(r.strip_failures()),
        }
    }
}

impl Cause<Infallible> {
    /// Widens an untyped cause into any error type.
    #[must_use]
    pub fn widen<E>(self) -> Cause<E> {
        self.map(|never| match never {})
    }
}

impl<E> Default for Cause<E> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Fail(e) => write!(f, "Fail({e:?})"),
            Self::Die(d) => write!(f, "Die({})", d.message()),
            Self::Interrupt(id) => write!(f, "Interrupt({id})"),
            Self::Sequential(l, r) => write!(f, "Sequential({l}, {r})"),
            Self::Parallel(l, r) => write!(f, "Parallel({l}, {r})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn then_treats_empty_as_identity() {
        let c: Cause<&str> = Cause::Empty.then(Cause::fail("x"));
        assert_eq!(c, Cause::fail("x"));
        let c: Cause<&str> = Cause::fail("x").then(Cause::Empty);
        assert_eq!(c, Cause::fail("x"));
    }

    #[test]
    fn interruptors_accumulate_in_sequence() {
        let a = FiberId::new_for_test(1);
        let b = FiberId::new_for_test(2);
        let cause: Cause = Cause::interrupt(a).then(Cause::interrupt(b));
        assert!(cause.is_interrupted_only());
        assert_eq!(cause.interruptors().into_iter().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn deep_sequential_chain_does_not_overflow_traversal() {
        let mut cause: Cause = Cause::Empty;
        for i in 0..100_000 {
            cause = Cause::Sequential(
                Box::new(cause),
                Box::new(Cause::interrupt(FiberId::new_for_test(i))),
            );
        }
        assert_eq!(cause.interruptors().len(), 100_000);
        // Iterative teardown so dropping the chain cannot blow the stack.
        let mut node = cause;
        while let Cause::Sequential(left, _) = node {
            node = *left;
        }
    }

    #[test]
    fn failures_and_defects_are_reported_in_order() {
        let cause = Cause::fail(1)
            .then(Cause::die("boom"))
            .both(Cause::fail(2));
        assert_eq!(cause.failures(), vec![&1, &2]);
        assert_eq!(cause.defects()[0].message(), "boom");
        assert!(cause.is_die());
        assert!(!cause.is_interrupted());
    }

    #[test]
    fn widen_and_strip_failures() {
        let untyped: Cause = Cause::interrupt(FiberId::NONE).then(Cause::die("late"));
        let typed: Cause<String> = untyped.clone().widen();
        assert_eq!(typed.clone().strip_failures(), untyped);
        assert_eq!(
            typed.to_string(),
            "Sequential(Interrupt(None), Die(late))"
        );
    }

    #[test]
    fn defect_from_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("kaboom");
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "kaboom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(Defect::from_panic(payload.as_ref()).message(), "unknown panic");
    }
}
