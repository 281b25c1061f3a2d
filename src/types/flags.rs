//! Runtime flags.
//!
//! [`RuntimeFlags`] is an immutable bitset of switches that change how the
//! runtime treats a fiber. Every operation is a pure bitwise transform.
//!
//! | Flag | Bit | Effect |
//! |------|-----|--------|
//! | `Interruption` | 0 | interrupt signals may unwind the fiber |
//! | `CurrentFiber` | 1 | the draining thread publishes the fiber as current |
//! | `OpSupervision` | 2 | the supervisor observes every resumed step |
//! | `RuntimeMetrics` | 3 | lifecycle counters are recorded |
//! | `FiberRoots` | 4 | global-scope fibers are tracked in the root registry |
//! | `WindDown` | 5 | the fiber is cleaning up and ignores interruption |
//! | `CooperativeYielding` | 6 | the fiber yields after its op budget |

use crate::error::ParseFlagError;
use crate::patch::RuntimeFlagsPatch;
use core::fmt;
use std::collections::BTreeSet;
use std::str::FromStr;

const KNOWN_BITS: u32 = 0x7f;

/// A single runtime flag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuntimeFlag(u32);

impl RuntimeFlag {
    /// No flag.
    pub const NONE: Self = Self(0);
    /// Interrupt signals may unwind the fiber.
    pub const INTERRUPTION: Self = Self(1 << 0);
    /// The draining thread publishes the fiber as the current fiber.
    pub const CURRENT_FIBER: Self = Self(1 << 1);
    /// The supervisor observes every resumed step.
    pub const OP_SUPERVISION: Self = Self(1 << 2);
    /// Lifecycle metrics are recorded.
    pub const RUNTIME_METRICS: Self = Self(1 << 3);
    /// Global-scope fibers are tracked in the root registry.
    pub const FIBER_ROOTS: Self = Self(1 << 4);
    /// The fiber is winding down and ignores interruption.
    pub const WIND_DOWN: Self = Self(1 << 5);
    /// The fiber yields after exhausting its op budget.
    pub const COOPERATIVE_YIELDING: Self = Self(1 << 6);

    /// Every real flag, in bit order.
    pub const ALL: [Self; 7] = [
        Self::INTERRUPTION,
        Self::CURRENT_FIBER,
        Self::OP_SUPERVISION,
        Self::RUNTIME_METRICS,
        Self::FIBER_ROOTS,
        Self::WIND_DOWN,
        Self::COOPERATIVE_YIELDING,
    ];

    /// Returns the flag's bit.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns the flag's name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0x01 => "Interruption",
            0x02 => "CurrentFiber",
            0x04 => "OpSupervision",
            0x08 => "RuntimeMetrics",
            0x10 => "FiberRoots",
            0x20 => "WindDown",
            0x40 => "CooperativeYielding",
            _ => "None",
        }
    }
}

impl fmt::Debug for RuntimeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RuntimeFlag({})", self.name())
    }
}

impl fmt::Display for RuntimeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RuntimeFlag {
    type Err = ParseFlagError;

    /// Parses `Interruption`, `interruption`, `wind_down`, `wind-down`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if wanted == "none" {
            return Ok(Self::NONE);
        }
        Self::ALL
            .into_iter()
            .find(|flag| flag.name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ParseFlagError {
                name: s.trim().to_string(),
            })
    }
}

/// An immutable set of runtime flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuntimeFlags(u32);

impl RuntimeFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// `Interruption` and `CooperativeYielding`.
    pub const DEFAULT: Self =
        Self(RuntimeFlag::INTERRUPTION.bits() | RuntimeFlag::COOPERATIVE_YIELDING.bits());

    /// Builds a flag set from raw bits; unknown bits are dropped.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & KNOWN_BITS)
    }

    /// Builds a flag set from individual flags.
    #[must_use]
    pub fn make(flags: &[RuntimeFlag]) -> Self {
        Self(flags.iter().fold(0, |acc, flag| acc | flag.bits()))
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Turns `flag` on.
    #[must_use]
    pub const fn enable(self, flag: RuntimeFlag) -> Self {
        Self(self.0 | flag.bits())
    }

    /// Turns `flag` off.
    #[must_use]
    pub const fn disable(self, flag: RuntimeFlag) -> Self {
        Self(self.0 & !flag.bits())
    }

    /// Turns every flag in `flags` on.
    #[must_use]
    pub const fn enable_all(self, flags: Self) -> Self {
        Self(self.0 | flags.0)
    }

    /// Turns every flag in `flags` off.
    #[must_use]
    pub const fn disable_all(self, flags: Self) -> Self {
        Self(self.0 & !flags.0)
    }

    /// Returns true if `flag` is on.
    #[must_use]
    pub const fn is_enabled(self, flag: RuntimeFlag) -> bool {
        self.0 & flag.bits() != 0
    }

    /// Returns true if `flag` is off.
    #[must_use]
    pub const fn is_disabled(self, flag: RuntimeFlag) -> bool {
        !self.is_enabled(flag)
    }

    /// Whether the `Interruption` bit is set.
    #[must_use]
    pub const fn interruption(self) -> bool {
        self.is_enabled(RuntimeFlag::INTERRUPTION)
    }

    /// Interruption is honored only when `Interruption` is on and `WindDown` is off.
    #[must_use]
    pub const fn interruptible(self) -> bool {
        self.interruption() && !self.wind_down()
    }

    /// Whether the fiber is winding down.
    #[must_use]
    pub const fn wind_down(self) -> bool {
        self.is_enabled(RuntimeFlag::WIND_DOWN)
    }

    /// Whether the fiber yields after its op budget.
    #[must_use]
    pub const fn cooperative_yielding(self) -> bool {
        self.is_enabled(RuntimeFlag::COOPERATIVE_YIELDING)
    }

    /// Whether the draining thread publishes the current fiber.
    #[must_use]
    pub const fn current_fiber(self) -> bool {
        self.is_enabled(RuntimeFlag::CURRENT_FIBER)
    }

    /// Whether the supervisor observes every step.
    #[must_use]
    pub const fn op_supervision(self) -> bool {
        self.is_enabled(RuntimeFlag::OP_SUPERVISION)
    }

    /// Whether lifecycle metrics are recorded.
    #[must_use]
    pub const fn runtime_metrics(self) -> bool {
        self.is_enabled(RuntimeFlag::RUNTIME_METRICS)
    }

    /// Whether global-scope fibers are tracked as roots.
    #[must_use]
    pub const fn fiber_roots(self) -> bool {
        self.is_enabled(RuntimeFlag::FIBER_ROOTS)
    }

    /// The patch that turns `self` into `new`.
    #[must_use]
    pub const fn diff(self, new: Self) -> RuntimeFlagsPatch {
        RuntimeFlagsPatch::from_bits(self.0 ^ new.0, new.0)
    }

    /// Applies `patch` to `self`.
    #[must_use]
    pub const fn patch(self, patch: RuntimeFlagsPatch) -> Self {
        patch.apply(self)
    }

    /// Iterates over the enabled flags in bit order.
    pub fn iter(self) -> impl Iterator<Item = RuntimeFlag> {
        RuntimeFlag::ALL
            .into_iter()
            .filter(move |flag| self.is_enabled(*flag))
    }

    /// The enabled flags as a set.
    #[must_use]
    pub fn to_set(self) -> BTreeSet<RuntimeFlag> {
        self.iter().collect()
    }

    /// A deterministic listing of the enabled flags, e.g.
    /// `RuntimeFlags(Interruption, CooperativeYielding)`.
    #[must_use]
    pub fn render(self) -> String {
        let names: Vec<&str> = self.iter().map(RuntimeFlag::name).collect();
        format!("RuntimeFlags({})", names.join(", "))
    }
}

impl Default for RuntimeFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<RuntimeFlag> for RuntimeFlags {
    fn from(flag: RuntimeFlag) -> Self {
        Self(flag.bits())
    }
}

impl fmt::Debug for RuntimeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl fmt::Display for RuntimeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl FromStr for RuntimeFlags {
    type Err = ParseFlagError;

    /// Parses a comma-separated list of flag names. The empty string is `NONE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .try_fold(Self::NONE, |acc, part| Ok(acc.enable(part.parse()?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags() {
        let flags = RuntimeFlags::default();
        assert!(flags.interruption());
        assert!(flags.cooperative_yielding());
        assert!(!flags.wind_down());
        assert_eq!(flags.render(), "RuntimeFlags(Interruption, CooperativeYielding)");
    }

    #[test]
    fn none_has_no_bits() {
        assert_eq!(RuntimeFlags::NONE.bits(), 0);
        assert_eq!(RuntimeFlags::NONE.iter().count(), 0);
        assert_eq!(RuntimeFlags::NONE.render(), "RuntimeFlags()");
    }

    #[test]
    fn enable_disable_round_trip() {
        let flags = RuntimeFlags::NONE
            .enable(RuntimeFlag::FIBER_ROOTS)
            .enable(RuntimeFlag::OP_SUPERVISION);
        assert!(flags.fiber_roots());
        assert!(flags.op_supervision());
        let flags = flags.disable(RuntimeFlag::FIBER_ROOTS);
        assert!(flags.is_disabled(RuntimeFlag::FIBER_ROOTS));
        assert!(flags.is_enabled(RuntimeFlag::OP_SUPERVISION));
    }

    #[test]
    fn enable_all_disable_all() {
        let mask = RuntimeFlags::make(&[RuntimeFlag::WIND_DOWN, RuntimeFlag::RUNTIME_METRICS]);
        let flags = RuntimeFlags::DEFAULT.enable_all(mask);
        assert!(flags.wind_down() && flags.runtime_metrics());
        assert_eq!(flags.disable_all(mask), RuntimeFlags::DEFAULT);
    }

    #[test]
    fn from_bits_drops_unknown_bits() {
        assert_eq!(RuntimeFlags::from_bits(0xff80), RuntimeFlags::NONE);
        assert_eq!(RuntimeFlags::from_bits(0x41), RuntimeFlags::DEFAULT);
    }

    #[test]
    fn parse_flag_names() {
        assert_eq!(
            "wind_down".parse::<RuntimeFlag>().unwrap(),
            RuntimeFlag::WIND_DOWN
        );
        assert_eq!(
            "Cooperative-Yielding".parse::<RuntimeFlag>().unwrap(),
            RuntimeFlag::COOPERATIVE_YIELDING
        );
        assert_eq!("none".parse::<RuntimeFlag>().unwrap(), RuntimeFlag::NONE);
        let err = "turbo".parse::<RuntimeFlag>().unwrap_err();
        assert_eq!(err.name, "turbo");
    }

    #[test]
    fn parse_flag_lists() {
        let flags: RuntimeFlags = "Interruption, FiberRoots".parse().unwrap();
        assert_eq!(
            flags,
            RuntimeFlags::make(&[RuntimeFlag::INTERRUPTION, RuntimeFlag::FIBER_ROOTS])
        );
        assert_eq!("".parse::<RuntimeFlags>().unwrap(), RuntimeFlags::NONE);
        assert!("Interruption,,Bogus".parse::<RuntimeFlags>().is_err());
    }

    #[test]
    fn render_is_deterministic_bit_order() {
        let flags = RuntimeFlags::make(&[
            RuntimeFlag::COOPERATIVE_YIELDING,
            RuntimeFlag::CURRENT_FIBER,
            RuntimeFlag::INTERRUPTION,
        ]);
        assert_eq!(
            flags.to_string(),
            "RuntimeFlags(Interruption, CurrentFiber, CooperativeYielding)"
        );
    }
}
