//! Patches over [`FiberRefs`].

use super::{AnyPatch, AnyValue, FiberRefKey, FiberRefs};
use crate::patch::chain::{self, Chain};
use crate::patch::Differ;
use crate::types::FiberId;
use core::fmt;
use std::mem;

/// The delta between two [`FiberRefs`].
///
/// Dropping, cloning and formatting walk `AndThen` trees iteratively, so a
/// patch may nest arbitrarily deep.
#[derive(Default)]
pub enum FiberRefsPatch {
    /// Changes nothing.
    #[default]
    Empty,
    /// Sets a ref the old map did not hold.
    Add(FiberRefKey, AnyValue),
    /// Removes a ref the new map does not hold.
    Remove(FiberRefKey),
    /// Patches a ref held by both maps, using the ref's own differ.
    Update(FiberRefKey, AnyPatch),
    /// Applies the first patch, then the second.
    AndThen(Box<FiberRefsPatch>, Box<FiberRefsPatch>),
}

impl FiberRefsPatch {
    /// The patch that turns `old` into `new`.
    ///
    /// Refs only in `new` are added, refs only in `old` are removed, and refs
    /// whose current values differ are updated through their differ.
    #[must_use]
    pub fn diff(old: &FiberRefs, new: &FiberRefs) -> Self {
        let mut patch = Self::Empty;
        for (key, new_value) in new.current_values() {
            let step = match old.get_erased(key) {
                Some(old_value) if key.values_equal(old_value, new_value) => continue,
                Some(old_value) => Self::Update(key.clone(), key.diff(old_value, new_value)),
                None => Self::Add(key.clone(), new_value.clone()),
            };
            patch = patch.combine(step);
        }
        for key in old.refs() {
            if new.get_erased(key).is_none() {
                patch = patch.combine(Self::Remove(key.clone()));
            }
        }
        patch
    }

    /// Sequential composition: `self`, then `that`.
    ///
    /// Two updates of the same ref fuse into one through the ref's differ.
    #[must_use]
    pub fn combine(self, that: Self) -> Self {
        if self.is_empty() {
            return that;
        }
        if that.is_empty() {
            return self;
        }
        if let (Self::Update(key, first), Self::Update(other, second)) = (&self, &that) {
            if key == other {
                return Self::Update(key.clone(), key.combine(first, second));
            }
        }
        Self::AndThen(Box::new(self), Box::new(that))
    }

    /// Returns true if the patch is `Empty`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Applies the patch to `old`, recording writes as `fiber_id`.
    ///
    /// `AndThen` nodes are interpreted with an explicit work list: the first
    /// patch is fully applied before the second is looked at.
    #[must_use]
    pub fn apply(&self, fiber_id: FiberId, old: &FiberRefs) -> FiberRefs {
        let mut refs = old.clone();
        let mut work: Vec<&Self> = vec![self];
        while let Some(head) = work.pop() {
            match head {
                Self::Empty => {}
                Self::Add(key, value) => refs.update_as_erased(fiber_id, key, value.clone()),
                Self::Remove(key) => refs.delete_erased(key),
                Self::Update(key, patch) => {
                    let current = refs.get_or_default_erased(key);
                    let value = key.patch(patch, &current);
                    refs.update_as_erased(fiber_id, key, value);
                }
                Self::AndThen(first, second) => {
                    work.push(second);
                    work.push(first);
                }
            }
        }
        refs
    }
}

impl Chain for FiberRefsPatch {
    fn halves(&self) -> Option<(&Self, &Self)> {
        match self {
            Self::AndThen(first, second) => Some((first, second)),
            _ => None,
        }
    }

    fn take_halves(&mut self) -> Option<(Self, Self)> {
        match self {
            Self::AndThen(first, second) => Some((mem::take(&mut **first), mem::take(&mut **second))),
            _ => None,
        }
    }

    fn join(first: Self, second: Self) -> Self {
        Self::AndThen(Box::new(first), Box::new(second))
    }

    fn clone_leaf(&self) -> Self {
        match self {
            Self::Add(key, value) => Self::Add(key.clone(), value.clone()),
            Self::Remove(key) => Self::Remove(key.clone()),
            Self::Update(key, patch) => Self::Update(key.clone(), patch.clone()),
            Self::Empty | Self::AndThen(..) => Self::Empty,
        }
    }

    fn fmt_leaf(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add(key, _) => write!(f, "Add({})", key.id()),
            Self::Remove(key) => write!(f, "Remove({})", key.id()),
            Self::Update(key, _) => write!(f, "Update({})", key.id()),
            Self::Empty | Self::AndThen(..) => write!(f, "Empty"),
        }
    }
}

impl Clone for FiberRefsPatch {
    fn clone(&self) -> Self {
        chain::clone(self)
    }
}

impl Drop for FiberRefsPatch {
    fn drop(&mut self) {
        chain::unlink(self);
    }
}

impl fmt::Debug for FiberRefsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        chain::fmt(self, f)
    }
}

/// The [`Differ`] over [`FiberRefs`] for one writing fiber.
#[derive(Debug, Clone, Copy)]
pub struct FiberRefsDiffer {
    fiber_id: FiberId,
}

impl FiberRefsDiffer {
    /// A differ that records patched values as written by `fiber_id`.
    #[must_use]
    pub const fn new(fiber_id: FiberId) -> Self {
        Self { fiber_id }
    }
}

impl Differ for FiberRefsDiffer {
    type Value = FiberRefs;
    type Patch = FiberRefsPatch;

    fn empty(&self) -> FiberRefsPatch {
        FiberRefsPatch::Empty
    }

    fn diff(&self, old: &FiberRefs, new: &FiberRefs) -> FiberRefsPatch {
        FiberRefsPatch::diff(old, new)
    }

    fn combine(&self, first: FiberRefsPatch, second: FiberRefsPatch) -> FiberRefsPatch {
        first.combine(second)
    }

    fn patch(&self, patch: &FiberRefsPatch, old: &FiberRefs) -> FiberRefs {
        patch.apply(self.fiber_id, old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiber_ref::FiberRef;

    fn fid(n: u64) -> FiberId {
        FiberId::new_for_test(n)
    }

    #[test]
    fn diff_of_identical_maps_is_empty() {
        let r = FiberRef::new(1_u32);
        let mut refs = FiberRefs::new();
        refs.update_as(fid(1), &r, 2);
        assert!(FiberRefsPatch::diff(&refs, &refs.clone()).is_empty());
    }

    #[test]
    fn diff_emits_add_update_remove() {
        let kept = FiberRef::new(0_u32);
        let added = FiberRef::new(String::new());
        let removed = FiberRef::new(false);

        let mut old = FiberRefs::new();
        old.update_as(fid(1), &kept, 1);
        old.update_as(fid(1), &removed, true);

        let mut new = FiberRefs::new();
        new.update_as(fid(1), &kept, 2);
        new.update_as(fid(1), &added, "x".to_string());

        let patch = FiberRefsPatch::diff(&old, &new);
        let rendered = format!("{patch:?}");
        assert!(rendered.contains("Update"), "{rendered}");
        assert!(rendered.contains("Add"), "{rendered}");
        assert!(rendered.contains("Remove"), "{rendered}");

        let patched = patch.apply(fid(9), &old);
        assert_eq!(patched, new);
        assert_eq!(patched.get(&removed), None);
    }

    #[test]
    fn and_then_applies_first_before_second() {
        let r = FiberRef::new(0_i32);
        let set_one = FiberRefsPatch::Add(r.key().clone(), FiberRef::erase_value(1_i32));
        let remove = FiberRefsPatch::Remove(r.key().clone());

        let refs = FiberRefs::new();
        let patched = set_one.clone().combine(remove.clone()).apply(fid(1), &refs);
        assert_eq!(patched.get(&r), None);
        let patched = remove.combine(set_one).apply(fid(1), &refs);
        assert_eq!(patched.get(&r), Some(1));
    }

    #[test]
    fn updates_of_one_ref_fuse() {
        let r = FiberRef::new(0_u32);
        let mut one = FiberRefs::new();
        one.update_as(fid(1), &r, 1);
        let mut two = one.clone();
        two.update_as(fid(1), &r, 2);
        let mut five = two.clone();
        five.update_as(fid(1), &r, 5);

        let patch = FiberRefsPatch::diff(&one, &two).combine(FiberRefsPatch::diff(&two, &five));
        assert!(matches!(patch, FiberRefsPatch::Update(..)), "{patch:?}");
        assert_eq!(patch.apply(fid(1), &one).get(&r), Some(5));
    }

    #[test]
    fn deep_patch_chains_apply_iteratively() {
        let r = FiberRef::new(0_u64);
        let mut patch = FiberRefsPatch::Empty;
        for i in 0..10_000_u64 {
            patch = patch.combine(FiberRefsPatch::Add(r.key().clone(), FiberRef::erase_value(i)));
        }
        let patched = patch.apply(fid(1), &FiberRefs::new());
        assert_eq!(patched.get(&r), Some(9_999));
    }

    #[test]
    fn deep_patch_chains_clone_render_and_drop_on_a_small_stack() {
        let outcome = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let r = FiberRef::new(0_u64);
                let mut patch = FiberRefsPatch::Empty;
                for i in 0..200_000_u64 {
                    patch = patch
                        .combine(FiberRefsPatch::Add(r.key().clone(), FiberRef::erase_value(i)));
                }
                let copy = patch.clone();
                let rendered = format!("{copy:?}");
                assert!(rendered.starts_with("AndThen(AndThen("));
                let value = copy.apply(fid(1), &FiberRefs::new()).get(&r);
                drop(patch);
                drop(copy);
                value
            })
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(outcome, Some(199_999));
    }
}
