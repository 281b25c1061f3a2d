//! The generic patch algebra.
//!
//! Runtime flags, fiber refs and supervisors all propagate across fork and
//! join as *deltas* rather than snapshots. A child receives the parent's
//! current configuration, and when it finishes only the changes the child made
//! are merged back, so concurrent changes made by the parent survive.
//!
//! Every [`Differ`] must satisfy three laws:
//!
//! 1. `patch(empty, a) == a`
//! 2. `patch(combine(p, q), a) == patch(q, patch(p, a))`
//! 3. `patch(diff(a, b), a) == b`
//!
//! `combine` is sequential: `p` applies first.

pub(crate) mod chain;
mod flags;

pub use flags::{RuntimeFlagsDiffer, RuntimeFlagsPatch};

use std::fmt;
use std::marker::PhantomData;

/// Computes, composes and applies patches for values of one type.
pub trait Differ {
    /// The value being patched.
    type Value;
    /// The delta between two values.
    type Patch;

    /// The patch that changes nothing.
    fn empty(&self) -> Self::Patch;

    /// The patch that turns `old` into `new`.
    fn diff(&self, old: &Self::Value, new: &Self::Value) -> Self::Patch;

    /// Sequential composition: `first`, then `second`.
    fn combine(&self, first: Self::Patch, second: Self::Patch) -> Self::Patch;

    /// Applies `patch` to `old`.
    fn patch(&self, patch: &Self::Patch, old: &Self::Value) -> Self::Value;
}

/// A differ whose patch is "replace with this value" or "keep".
///
/// This is what every [`FiberRef`](crate::fiber_ref::FiberRef) uses unless it
/// supplies a differ of its own.
pub struct UpdateDiffer<T>(PhantomData<fn() -> T>);

impl<T> UpdateDiffer<T> {
    /// Creates the differ.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for UpdateDiffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for UpdateDiffer<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for UpdateDiffer<T> {}

impl<T> fmt::Debug for UpdateDiffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpdateDiffer")
    }
}

impl<T: Clone + PartialEq> Differ for UpdateDiffer<T> {
    type Value = T;
    type Patch = Option<T>;

    fn empty(&self) -> Option<T> {
        None
    }

    fn diff(&self, old: &T, new: &T) -> Option<T> {
        if old == new {
            None
        } else {
            Some(new.clone())
        }
    }

    fn combine(&self, first: Option<T>, second: Option<T>) -> Option<T> {
        second.or(first)
    }

    fn patch(&self, patch: &Option<T>, old: &T) -> T {
        patch.as_ref().unwrap_or(old).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_differ_laws() {
        let d = UpdateDiffer::<String>::new();
        let a = "a".to_string();
        let b = "b".to_string();
        let c = "c".to_string();

        assert_eq!(d.patch(&d.empty(), &a), a);
        assert_eq!(d.patch(&d.diff(&a, &b), &a), b);
        assert_eq!(d.diff(&a, &a), None);

        let combined = d.combine(d.diff(&a, &b), d.diff(&b, &c));
        assert_eq!(d.patch(&combined, &a), c);
    }

    #[test]
    fn combine_with_empty_second_keeps_first() {
        let d = UpdateDiffer::<u32>::new();
        let p = d.combine(Some(5), d.empty());
        assert_eq!(d.patch(&p, &1), 5);
    }
}
