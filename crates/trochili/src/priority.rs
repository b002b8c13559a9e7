//! Thread priorities and the occupied-level bitmap.
//!
//! Numerically lower values are more urgent: priority 0 preempts everything,
//! [`Priority::LOWEST`] is reserved for the idle thread.

use core::fmt;

/// Number of distinct priority levels.
pub const PRIORITY_LEVELS: usize = 32;

/// Scheduling priority of a thread or ceiling of a mutex.
///
/// The derived ordering is the numeric one, so `a < b` means `a` is *more*
/// urgent than `b`. Prefer [`Priority::is_higher_than`] in scheduling code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Priority(u8);

impl Priority {
    /// Most urgent level.
    pub const HIGHEST: Priority = Priority(0);

    /// Least urgent level, used by the idle thread.
    pub const LOWEST: Priority = Priority(PRIORITY_LEVELS as u8 - 1);

    /// Creates a priority, panicking when `raw` is outside `0..PRIORITY_LEVELS`.
    pub const fn new(raw: u8) -> Self {
        assert!((raw as usize) < PRIORITY_LEVELS, "priority out of range");
        Self(raw)
    }

    /// Creates a priority, returning `None` when `raw` is out of range.
    pub const fn try_new(raw: u8) -> Option<Self> {
        if (raw as usize) < PRIORITY_LEVELS {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns true if `self` preempts `other`.
    pub const fn is_higher_than(self, other: Priority) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Priority {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "P{}", self.0);
    }
}

/// One bit per priority level; bit `n` set means level `n` is occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PriorityMask(u32);

impl PriorityMask {
    pub const EMPTY: Self = Self(0);

    pub const fn new() -> Self {
        Self::EMPTY
    }

    pub fn set(&mut self, priority: Priority) {
        self.0 |= 1u32 << priority.0;
    }

    pub fn clear(&mut self, priority: Priority) {
        self.0 &= !(1u32 << priority.0);
    }

    pub const fn is_set(&self, priority: Priority) -> bool {
        self.0 & (1u32 << priority.0) != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Most urgent occupied level (lowest set bit).
    pub const fn highest(&self) -> Option<Priority> {
        if self.0 == 0 {
            None
        } else {
            Some(Priority(self.0.trailing_zeros() as u8))
        }
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }
}
