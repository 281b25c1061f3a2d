//! The per-fiber ref map.

use super::{AnyValue, FiberRef, FiberRefKey};
use crate::types::FiberId;
use core::fmt;
use std::collections::BTreeMap;

/// One ref's history: `(writer, value)` pairs, current value last.
type Stack = Vec<(FiberId, AnyValue)>;

/// The values of every ref a fiber has written.
///
/// Each ref keeps a stack of values tagged with the fiber that wrote them.
/// The stack is what lets [`join_as`](Self::join_as) find the value a child
/// started from, so that only the child's own changes are merged back.
///
/// Equality compares current values only.
#[derive(Clone, Default)]
pub struct FiberRefs {
    locals: BTreeMap<FiberRefKey, Stack>,
}

impl FiberRefs {
    /// An empty ref map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of refs with a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locals.len()
    }

    /// Returns true if no ref has a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }

    /// The refs that have a value.
    pub fn refs(&self) -> impl Iterator<Item = &FiberRefKey> {
        self.locals.keys()
    }

    /// The current value of `fiber_ref`, if the map holds one.
    #[must_use]
    pub fn get<A>(&self, fiber_ref: &FiberRef<A>) -> Option<A>
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        self.get_erased(fiber_ref.key()).map(FiberRef::<A>::value_of)
    }

    /// The current value of `fiber_ref`, or its initial value.
    #[must_use]
    pub fn get_or_default<A>(&self, fiber_ref: &FiberRef<A>) -> A
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        self.get(fiber_ref).unwrap_or_else(|| fiber_ref.initial())
    }

    /// Sets `fiber_ref` to `value` on behalf of `fiber_id`.
    pub fn update_as<A>(&mut self, fiber_id: FiberId, fiber_ref: &FiberRef<A>, value: A)
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        self.update_as_erased(fiber_id, fiber_ref.key(), FiberRef::erase_value(value));
    }

    /// Removes `fiber_ref` from the map; it reads as its initial value again.
    pub fn delete<A>(&mut self, fiber_ref: &FiberRef<A>)
    where
        A: Clone + PartialEq + Send + Sync + 'static,
    {
        self.delete_erased(fiber_ref.key());
    }

    pub(crate) fn get_erased(&self, key: &FiberRefKey) -> Option<&AnyValue> {
        self.locals
            .get(key)
            .and_then(|stack| stack.last())
            .map(|(_, value)| value)
    }

    pub(crate) fn get_or_default_erased(&self, key: &FiberRefKey) -> AnyValue {
        self.get_erased(key)
            .unwrap_or_else(|| key.initial())
            .clone()
    }

    /// Consecutive writes by the same fiber replace each other instead of
    /// growing the stack.
    pub(crate) fn update_as_erased(&mut self, fiber_id: FiberId, key: &FiberRefKey, value: AnyValue) {
        let stack = self.locals.entry(key.clone()).or_default();
        match stack.last_mut() {
            Some((writer, current)) if *writer == fiber_id => {
                if !key.values_equal(current, &value) {
                    *current = value;
                }
            }
            _ => stack.push((fiber_id, value)),
        }
    }

    pub(crate) fn delete_erased(&mut self, key: &FiberRefKey) {
        self.locals.remove(key);
    }

    pub(crate) fn current_values(&self) -> impl Iterator<Item = (&FiberRefKey, &AnyValue)> {
        self.locals
            .iter()
            .filter_map(|(key, stack)| stack.last().map(|(_, value)| (key, value)))
    }

    /// The refs a child forked as `child_id` starts with.
    ///
    /// Every ref's fork patch is applied to the current value; refs whose value
    /// changes get a new stack entry owned by the child.
    #[must_use]
    pub fn fork_as(&self, child_id: FiberId) -> Self {
        let locals = self
            .locals
            .iter()
            .map(|(key, stack)| {
                let mut stack = stack.clone();
                if let Some((_, old)) = stack.last() {
                    let new = key.patch(key.fork_patch(), old);
                    if !key.values_equal(old, &new) {
                        stack.push((child_id, new));
                    }
                }
                (key.clone(), stack)
            })
            .collect();
        Self { locals }
    }

    /// Merges a finished child's refs into `self`, writing as `fiber_id`.
    ///
    /// For each ref the child changed, the child's delta relative to the value
    /// it started from is applied to the parent's current value and then
    /// passed through the ref's join function. Parent changes made since the
    /// fork are preserved.
    pub fn join_as(&mut self, fiber_id: FiberId, child: &Self) {
        for (key, child_stack) in &child.locals {
            let Some((child_writer, child_value)) = child_stack.last() else {
                continue;
            };
            if *child_writer == fiber_id {
                continue;
            }

            let Some(parent_stack) = self.locals.get(key) else {
                if key.values_equal(child_value, key.initial()) {
                    continue;
                }
                let joined = key.join(key.initial(), child_value);
                self.locals.insert(key.clone(), vec![(fiber_id, joined)]);
                continue;
            };

            let (ancestor, child_modified) = find_ancestor(key, parent_stack, child_stack);
            if !child_modified {
                continue;
            }

            let delta = key.diff(&ancestor, child_value);
            let Some((parent_writer, old)) = parent_stack.last() else {
                continue;
            };
            let new = key.join(old, &key.patch(&delta, old));
            if key.values_equal(old, &new) {
                continue;
            }
            let parent_writer = *parent_writer;
            if let Some(stack) = self.locals.get_mut(key) {
                if parent_writer == fiber_id {
                    if let Some(top) = stack.last_mut() {
                        top.1 = new;
                    }
                } else {
                    stack.push((fiber_id, new));
                }
            }
        }
    }
}

/// Walks both stacks from the top down until they meet at a common writer.
///
/// Returns the child's value at the meeting point and whether the child wrote
/// anything above it. Stacks are ordered by fiber id, which grows
/// monotonically, so the younger writer is always the one to skip.
fn find_ancestor(key: &FiberRefKey, parent_stack: &Stack, child_stack: &Stack) -> (AnyValue, bool) {
    let mut parent_len = parent_stack.len();
    let mut child_len = child_stack.len();
    let mut child_modified = false;
    while parent_len > 0 && child_len > 0 {
        let (parent_id, _) = &parent_stack[parent_len - 1];
        let (child_id, child_value) = &child_stack[child_len - 1];
        match parent_id.cmp(child_id) {
            std::cmp::Ordering::Less => {
                child_len -= 1;
                child_modified = true;
            }
            std::cmp::Ordering::Greater => parent_len -= 1,
            std::cmp::Ordering::Equal => return (child_value.clone(), child_modified),
        }
    }
    (key.initial().clone(), true)
}

impl PartialEq for FiberRefs {
    fn eq(&self, other: &Self) -> bool {
        self.locals.len() == other.locals.len()
            && self.current_values().zip(other.current_values()).all(
                |((key_a, value_a), (key_b, value_b))| {
                    key_a == key_b && key_a.values_equal(value_a, value_b)
                },
            )
    }
}

impl fmt::Debug for FiberRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.locals
                    .iter()
                    .map(|(key, stack)| (key.id(), stack.iter().map(|(id, _)| *id).collect::<Vec<_>>())),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fid(n: u64) -> FiberId {
        FiberId::new_for_test(n)
    }

    #[test]
    fn unset_ref_reads_initial() {
        let r = FiberRef::new("init".to_string());
        let refs = FiberRefs::new();
        assert_eq!(refs.get(&r), None);
        assert_eq!(refs.get_or_default(&r), "init");
    }

    #[test]
    fn update_by_same_fiber_collapses() {
        let r = FiberRef::new(0_u32);
        let mut refs = FiberRefs::new();
        refs.update_as(fid(1), &r, 1);
        refs.update_as(fid(1), &r, 2);
        assert_eq!(refs.locals[r.key()].len(), 1);
        refs.update_as(fid(2), &r, 3);
        assert_eq!(refs.locals[r.key()].len(), 2);
        assert_eq!(refs.get(&r), Some(3));
    }

    #[test]
    fn delete_restores_initial() {
        let r = FiberRef::new(5_i32);
        let mut refs = FiberRefs::new();
        refs.update_as(fid(1), &r, 9);
        refs.delete(&r);
        assert_eq!(refs.get_or_default(&r), 5);
        assert!(refs.is_empty());
    }

    #[test]
    fn join_takes_child_change() {
        let r = FiberRef::new(0_u32);
        let mut parent = FiberRefs::new();
        parent.update_as(fid(1), &r, 10);

        let mut child = parent.fork_as(fid(2));
        child.update_as(fid(2), &r, 20);

        parent.join_as(fid(1), &child);
        assert_eq!(parent.get(&r), Some(20));
    }

    #[test]
    fn join_ignores_untouched_child() {
        let r = FiberRef::new(0_u32);
        let mut parent = FiberRefs::new();
        parent.update_as(fid(1), &r, 10);
        let child = parent.fork_as(fid(2));
        parent.update_as(fid(1), &r, 11);

        parent.join_as(fid(1), &child);
        assert_eq!(parent.get(&r), Some(11));
    }

    #[test]
    fn join_merges_with_join_function() {
        let counter = FiberRef::with_join(0_u64, |parent, child| parent + child);
        let mut parent = FiberRefs::new();
        parent.update_as(fid(1), &counter, 1);
        let mut child = parent.fork_as(fid(2));
        child.update_as(fid(2), &counter, 5);

        parent.join_as(fid(1), &child);
        // The replace differ yields the child's value, then join adds the parent's.
        assert_eq!(parent.get(&counter), Some(6));
    }

    #[test]
    fn join_adds_refs_only_the_child_set() {
        let r = FiberRef::new('a');
        let mut parent = FiberRefs::new();
        let mut child = parent.fork_as(fid(2));
        child.update_as(fid(2), &r, 'b');

        parent.join_as(fid(1), &child);
        assert_eq!(parent.get(&r), Some('b'));

        let untouched = FiberRef::new('z');
        let mut child = parent.fork_as(fid(3));
        child.update_as(fid(3), &untouched, 'z');
        parent.join_as(fid(1), &child);
        assert_eq!(parent.get(&untouched), None);
    }

    #[test]
    fn equality_ignores_history() {
        let r = FiberRef::new(1_u8);
        let mut a = FiberRefs::new();
        a.update_as(fid(1), &r, 7);
        let mut b = FiberRefs::new();
        b.update_as(fid(2), &r, 3);
        b.update_as(fid(3), &r, 7);
        assert_eq!(a, b);
        b.update_as(fid(3), &r, 8);
        assert_ne!(a, b);
    }
}
