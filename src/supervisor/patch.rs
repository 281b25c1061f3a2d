//! Patches over [`Supervisor`] compositions.

use super::Supervisor;
use crate::patch::chain::{self, Chain};
use crate::patch::Differ;
use std::fmt;
use std::mem;

/// The delta between two supervisor compositions.
#[derive(Default)]
pub enum SupervisorPatch {
    /// Changes nothing.
    #[default]
    Empty,
    /// Zips a supervisor onto the right of the composition.
    AddSupervisor(Supervisor),
    /// Removes a supervisor wherever it occurs.
    RemoveSupervisor(Supervisor),
    /// Applies the first patch, then the second.
    AndThen(Box<SupervisorPatch>, Box<SupervisorPatch>),
}

impl SupervisorPatch {
    /// The patch that turns `old` into `new`: every leaf only in `new` is
    /// added, then every leaf only in `old` is removed.
    #[must_use]
    pub fn diff(old: &Supervisor, new: &Supervisor) -> Self {
        if old == new {
            return Self::Empty;
        }
        let old_set = old.to_set();
        let new_set = new.to_set();
        let added = new_set
            .iter()
            .filter(|(id, _)| !old_set.contains_key(id))
            .fold(Self::Empty, |patch, (_, s)| {
                patch.combine(Self::AddSupervisor(s.clone()))
            });
        let removed = old_set
            .iter()
            .filter(|(id, _)| !new_set.contains_key(id))
            .fold(Self::Empty, |patch, (_, s)| {
                patch.combine(Self::RemoveSupervisor(s.clone()))
            });
        added.combine(removed)
    }

    /// Sequential composition: `self`, then `that`.
    #[must_use]
    pub fn combine(self, that: Self) -> Self {
        if self.is_empty() {
            that
        } else if that.is_empty() {
            self
        } else {
            Self::AndThen(Box::new(self), Box::new(that))
        }
    }

    /// Returns true if the patch is `Empty`.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Applies the patch to `supervisor` using an explicit work list.
    #[must_use]
    pub fn apply(&self, supervisor: &Supervisor) -> Supervisor {
        let mut current = supervisor.clone();
        let mut work: Vec<&Self> = vec![self];
        while let Some(head) = work.pop() {
            match head {
                Self::Empty => {}
                Self::AddSupervisor(s) => current = current.zip(s.clone()),
                Self::RemoveSupervisor(s) => current = current.remove_supervisor(s),
                Self::AndThen(first, second) => {
                    work.push(second);
                    work.push(first);
                }
            }
        }
        current
    }
}

impl Chain for SupervisorPatch {
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
            Self::AddSupervisor(s) => Self::AddSupervisor(s.clone()),
            Self::RemoveSupervisor(s) => Self::RemoveSupervisor(s.clone()),
            Self::Empty | Self::AndThen(..) => Self::Empty,
        }
    }

    fn fmt_leaf(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddSupervisor(s) => write!(f, "AddSupervisor({s:?})"),
            Self::RemoveSupervisor(s) => write!(f, "RemoveSupervisor({s:?})"),
            Self::Empty | Self::AndThen(..) => f.write_str("Empty"),
        }
    }
}

impl Clone for SupervisorPatch {
    fn clone(&self) -> Self {
        chain::clone(self)
    }
}

impl Drop for SupervisorPatch {
    fn drop(&mut self) {
        chain::unlink(self);
    }
}

impl fmt::Debug for SupervisorPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        chain::fmt(self, f)
    }
}

impl PartialEq for SupervisorPatch {
    fn eq(&self, other: &Self) -> bool {
        chain::eq(self, other, |left, right| match (left, right) {
            (Self::Empty, Self::Empty) => true,
            (Self::AddSupervisor(a), Self::AddSupervisor(b))
            | (Self::RemoveSupervisor(a), Self::RemoveSupervisor(b)) => a == b,
            _ => false,
        })
    }
}

/// The [`Differ`] over supervisors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisorDiffer;

impl Differ for SupervisorDiffer {
    type Value = Supervisor;
    type Patch = SupervisorPatch;

    fn empty(&self) -> SupervisorPatch {
        SupervisorPatch::Empty
    }

    fn diff(&self, old: &Supervisor, new: &Supervisor) -> SupervisorPatch {
        SupervisorPatch::diff(old, new)
    }

    fn combine(&self, first: SupervisorPatch, second: SupervisorPatch) -> SupervisorPatch {
        first.combine(second)
    }

    fn patch(&self, patch: &SupervisorPatch, old: &Supervisor) -> Supervisor {
        patch.apply(old)
    }
}
