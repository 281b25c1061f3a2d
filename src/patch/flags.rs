//! Patches over [`RuntimeFlags`].

use super::Differ;
use crate::types::{RuntimeFlag, RuntimeFlags};
use core::fmt;
use std::collections::BTreeSet;

/// The delta between two [`RuntimeFlags`].
///
/// `active` marks the bits the patch touches; `enabled` marks, among those,
/// the bits that end up on. Bits outside `active` are left alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RuntimeFlagsPatch {
    active: u32,
    enabled: u32,
}

impl RuntimeFlagsPatch {
    /// The patch that changes nothing.
    pub const EMPTY: Self = Self {
        active: 0,
        enabled: 0,
    };

    /// Builds a patch from raw masks; `enabled` is clipped to `active`.
    #[must_use]
    pub const fn from_bits(active: u32, enabled: u32) -> Self {
        let active = RuntimeFlags::from_bits(active).bits();
        Self {
            active,
            enabled: enabled & active,
        }
    }

    /// A patch that turns `flag` on.
    #[must_use]
    pub const fn enable(flag: RuntimeFlag) -> Self {
        Self::from_bits(flag.bits(), flag.bits())
    }

    /// A patch that turns `flag` off.
    #[must_use]
    pub const fn disable(flag: RuntimeFlag) -> Self {
        Self::from_bits(flag.bits(), 0)
    }

    /// Mask of touched bits.
    #[must_use]
    pub const fn active_bits(self) -> u32 {
        self.active
    }

    /// Mask of bits turned on.
    #[must_use]
    pub const fn enabled_bits(self) -> u32 {
        self.enabled
    }

    /// Returns true if the patch touches nothing.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.active == 0
    }

    /// Returns true if the patch touches `flag`.
    #[must_use]
    pub const fn is_active(self, flag: RuntimeFlag) -> bool {
        self.active & flag.bits() != 0
    }

    /// Returns true if the patch turns `flag` on.
    #[must_use]
    pub const fn is_enabled(self, flag: RuntimeFlag) -> bool {
        self.enabled & flag.bits() != 0
    }

    /// Returns true if the patch turns `flag` off.
    #[must_use]
    pub const fn is_disabled(self, flag: RuntimeFlag) -> bool {
        self.is_active(flag) && !self.is_enabled(flag)
    }

    /// Flips the end state of every touched bit.
    #[must_use]
    pub const fn inverse(self) -> Self {
        Self::from_bits(self.active, !self.enabled)
    }

    /// Touches what either patch touches; enables only what both enable.
    #[must_use]
    pub const fn both(self, that: Self) -> Self {
        Self::from_bits(self.active | that.active, self.enabled & that.enabled)
    }

    /// Touches what either patch touches; enables what either enables.
    #[must_use]
    pub const fn either(self, that: Self) -> Self {
        Self::from_bits(self.active | that.active, self.enabled | that.enabled)
    }

    /// Stops touching `flag`.
    #[must_use]
    pub const fn exclude(self, flag: RuntimeFlag) -> Self {
        Self::from_bits(self.active & !flag.bits(), self.enabled)
    }

    /// Sequential composition: `self`, then `that`.
    ///
    /// Where both touch a bit, `that` decides its end state.
    #[must_use]
    pub const fn and_then(self, that: Self) -> Self {
        Self::from_bits(
            self.active | that.active,
            (self.enabled & !that.active) | that.enabled,
        )
    }

    /// Applies the patch.
    #[must_use]
    pub const fn apply(self, flags: RuntimeFlags) -> RuntimeFlags {
        let bits = flags.bits();
        RuntimeFlags::from_bits((bits & (!self.active | self.enabled)) | (self.active & self.enabled))
    }

    /// Flags the patch turns on.
    #[must_use]
    pub fn enabled_set(self) -> BTreeSet<RuntimeFlag> {
        RuntimeFlag::ALL
            .into_iter()
            .filter(|flag| self.is_enabled(*flag))
            .collect()
    }

    /// Flags the patch turns off.
    #[must_use]
    pub fn disabled_set(self) -> BTreeSet<RuntimeFlag> {
        RuntimeFlag::ALL
            .into_iter()
            .filter(|flag| self.is_disabled(*flag))
            .collect()
    }

    /// A deterministic rendering, e.g.
    /// `RuntimeFlagsPatch(enabled = (WindDown), disabled = (Interruption))`.
    #[must_use]
    pub fn render(self) -> String {
        let join = |set: BTreeSet<RuntimeFlag>| {
            set.into_iter()
                .map(RuntimeFlag::name)
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "RuntimeFlagsPatch(enabled = ({}), disabled = ({}))",
            join(self.enabled_set()),
            join(self.disabled_set())
        )
    }
}

impl fmt::Debug for RuntimeFlagsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl fmt::Display for RuntimeFlagsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// The [`Differ`] over [`RuntimeFlags`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeFlagsDiffer;

impl Differ for RuntimeFlagsDiffer {
    type Value = RuntimeFlags;
    type Patch = RuntimeFlagsPatch;

    fn empty(&self) -> RuntimeFlagsPatch {
        RuntimeFlagsPatch::EMPTY
    }

    fn diff(&self, old: &RuntimeFlags, new: &RuntimeFlags) -> RuntimeFlagsPatch {
        old.diff(*new)
    }

    fn combine(&self, first: RuntimeFlagsPatch, second: RuntimeFlagsPatch) -> RuntimeFlagsPatch {
        first.and_then(second)
    }

    fn patch(&self, patch: &RuntimeFlagsPatch, old: &RuntimeFlags) -> RuntimeFlags {
        patch.apply(*old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_of_equal_flags_is_empty() {
        let flags = RuntimeFlags::DEFAULT;
        assert!(flags.diff(flags).is_empty());
        assert_eq!(flags.diff(flags), RuntimeFlagsPatch::EMPTY);
    }

    #[test]
    fn enable_and_disable_patches() {
        let p = RuntimeFlagsPatch::enable(RuntimeFlag::WIND_DOWN);
        assert!(p.is_active(RuntimeFlag::WIND_DOWN));
        assert!(p.is_enabled(RuntimeFlag::WIND_DOWN));
        assert!(RuntimeFlags::NONE.patch(p).wind_down());

        let p = RuntimeFlagsPatch::disable(RuntimeFlag::INTERRUPTION);
        assert!(p.is_disabled(RuntimeFlag::INTERRUPTION));
        assert!(!RuntimeFlags::DEFAULT.patch(p).interruption());
        assert!(RuntimeFlags::DEFAULT.patch(p).cooperative_yielding());
    }

    #[test]
    fn inverse_undoes_a_diff() {
        let old = RuntimeFlags::DEFAULT;
        let new = old
            .disable(RuntimeFlag::INTERRUPTION)
            .enable(RuntimeFlag::WIND_DOWN);
        let p = old.diff(new);
        assert_eq!(new.patch(p.inverse()), old);
    }

    #[test]
    fn and_then_is_sequential() {
        let on = RuntimeFlagsPatch::enable(RuntimeFlag::INTERRUPTION);
        let off = RuntimeFlagsPatch::disable(RuntimeFlag::INTERRUPTION);
        assert!(!RuntimeFlags::NONE.patch(on.and_then(off)).interruption());
        assert!(RuntimeFlags::NONE.patch(off.and_then(on)).interruption());
    }

    #[test]
    fn both_either_exclude() {
        let a = RuntimeFlagsPatch::enable(RuntimeFlag::INTERRUPTION);
        let b = RuntimeFlagsPatch::disable(RuntimeFlag::INTERRUPTION);
        assert!(a.both(b).is_disabled(RuntimeFlag::INTERRUPTION));
        assert!(a.either(b).is_enabled(RuntimeFlag::INTERRUPTION));
        assert!(a.exclude(RuntimeFlag::INTERRUPTION).is_empty());
    }

    #[test]
    fn render_lists_enabled_then_disabled() {
        let p = RuntimeFlags::DEFAULT.diff(
            RuntimeFlags::DEFAULT
                .disable(RuntimeFlag::INTERRUPTION)
                .enable(RuntimeFlag::WIND_DOWN),
        );
        assert_eq!(
            p.render(),
            "RuntimeFlagsPatch(enabled = (WindDown), disabled = (Interruption))"
        );
        assert_eq!(
            RuntimeFlagsPatch::EMPTY.render(),
            "RuntimeFlagsPatch(enabled = (), disabled = ())"
        );
    }
}
