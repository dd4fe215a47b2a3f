// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel ABI definitions, shared between the kernel and application code.
//!
//! This crate plays the role a pair of configuration headers would play in a
//! C kernel: it fixes the compile-time shape of the system (task count,
//! priority classes, event partition, time width) and defines the types that
//! cross the application/kernel boundary. The kernel sizes all of its static
//! tables from the constants in here.

#![cfg_attr(not(test), no_std)]

/// Number of application tasks. The kernel adds one implicit descriptor for
/// the idle task, at index `TASK_COUNT`.
pub const TASK_COUNT: usize = 4;

/// Number of priority classes. Class numbers run 0..`PRIO_CLASS_COUNT`;
/// higher numbers are scheduled first.
pub const PRIO_CLASS_COUNT: usize = 3;

/// Capacity of each per-class ready list. Every task of a class can be ready
/// at once, so this must be sized for the worst case the application can
/// produce.
pub const MAX_TASKS_PER_PRIO_CLASS: usize = 4;

/// Number of counting-semaphore events, occupying event bits
/// `0..SEMAPHORE_COUNT`.
pub const SEMAPHORE_COUNT: usize = 2;

/// Number of mutex events, occupying event bits
/// `SEMAPHORE_COUNT..SEMAPHORE_COUNT + MUTEX_COUNT`.
pub const MUTEX_COUNT: usize = 1;

/// Number of application interrupts wired to broadcast events. Each one
/// consumes a broadcast bit from 13 downward and tightens the cap on
/// semaphore + mutex bits.
pub const APPLICATION_INTERRUPT_COUNT: usize = 0;

/// Start values of the semaphore counters, applied at kernel start.
pub const SEMAPHORE_INITIAL: [SemCount; SEMAPHORE_COUNT] = [0, 0];

// Compile-time validation of the configuration, so a bad combination fails
// the build rather than the target.
const _: () = {
    assert!(TASK_COUNT <= 127);
    assert!(TASK_COUNT == 0 || PRIO_CLASS_COUNT >= 1);
    assert!(PRIO_CLASS_COUNT <= 255);
    assert!(MAX_TASKS_PER_PRIO_CLASS >= 1);
    assert!(SEMAPHORE_COUNT <= 8);
    assert!(APPLICATION_INTERRUPT_COUNT <= 2);
    assert!(SEMAPHORE_COUNT + MUTEX_COUNT <= 14 - APPLICATION_INTERRUPT_COUNT);
};

/// The system time and every timing parameter of the API, in tick units.
///
/// The counter is cyclic; all comparisons against it must go through the
/// wrap-aware helpers in the kernel, never a naive `<`. The width bounds the
/// longest expressible timeout and the reliability of overrun recognition,
/// so it is configurable here (8, 16, or 32 bits; both aliases must change
/// together).
pub type Ticks = u16;

/// Signed companion of [`Ticks`], used for wrap-aware "is this in the past"
/// tests.
pub type TicksDelta = i16;

/// Width of a semaphore counter. Bounds how many units of a pooled resource
/// a single semaphore can hold.
pub type SemCount = u8;

/// A task entry function. Invoked exactly once, with the event set that made
/// the task run the first time; it must never return. (The primed stack
/// contains a return address pointing at a reset trap, so a stray return is
/// caught rather than running off into random memory.)
pub type TaskEntry = fn(EventSet) -> !;

/// A set of events, represented as the 16-bit wire format shared between
/// tasks and interrupt service routines.
///
/// Bit positions are statically partitioned by the configuration above:
/// semaphores from bit 0, then mutexes, then broadcast events, with bit 14
/// the absolute timer and bit 15 the delay timer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct EventSet(pub u16);

/// General purpose event, posted explicitly by `post_event`.
pub const EVT_SEMAPHORE_00: EventSet = EventSet(1 << 0);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_SEMAPHORE_01: EventSet = EventSet(1 << 1);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_MUTEX_00: EventSet = EventSet(1 << 2);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_03: EventSet = EventSet(1 << 3);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_04: EventSet = EventSet(1 << 4);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_05: EventSet = EventSet(1 << 5);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_06: EventSet = EventSet(1 << 6);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_07: EventSet = EventSet(1 << 7);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_08: EventSet = EventSet(1 << 8);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_09: EventSet = EventSet(1 << 9);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_10: EventSet = EventSet(1 << 10);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_11: EventSet = EventSet(1 << 11);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_12: EventSet = EventSet(1 << 12);
/// General purpose event, posted explicitly by `post_event`.
pub const EVT_EVENT_13: EventSet = EventSet(1 << 13);
/// The task's absolute timer reached its due time.
pub const EVT_ABSOLUTE_TIMER: EventSet = EventSet(1 << 14);
/// The task's delay timer counted down to zero.
pub const EVT_DELAY_TIMER: EventSet = EventSet(1 << 15);

impl EventSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// All counting-semaphore bits.
    pub const SEMAPHORES: Self = Self(((1u32 << SEMAPHORE_COUNT) - 1) as u16);

    /// All mutex bits.
    pub const MUTEXES: Self = Self(
        (((1u32 << (SEMAPHORE_COUNT + MUTEX_COUNT)) - 1) as u16)
            & !Self::SEMAPHORES.0,
    );

    /// The two timer bits. These can never be posted; they are set only by
    /// the tick handler.
    pub const TIMERS: Self = Self(EVT_ABSOLUTE_TIMER.0 | EVT_DELAY_TIMER.0);

    /// Broadcast bits: everything that is neither a sync object nor a timer.
    pub const BROADCASTS: Self =
        Self(!(Self::SEMAPHORES.0 | Self::MUTEXES.0 | Self::TIMERS.0));

    /// Fabricates a set from its wire representation.
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the wire representation.
    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Checks whether every bit of `other` is also in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Checks whether `self` and `other` share any bit.
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns `self` with the bits of `other` removed.
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl core::ops::BitOr for EventSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign for EventSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl core::ops::BitAnd for EventSet {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl core::ops::BitAndAssign for EventSet {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl core::ops::BitXor for EventSet {
    type Output = Self;
    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl core::ops::Not for EventSet {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

/// The static classification of a single event bit.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventKind {
    /// Counted ownership of one unit of a pooled resource.
    Semaphore,
    /// Binary ownership token.
    Mutex,
    /// Uncounted signal delivered to every interested waiter.
    Broadcast,
    /// Fires when the system time reaches the task's due time.
    AbsoluteTimer,
    /// Fires when the task's countdown reaches zero.
    DelayTimer,
}

/// Classifies event bit `bit` (0..16) according to the configured partition.
pub const fn classify(bit: u8) -> EventKind {
    let mask = 1u16 << bit;
    if mask & EventSet::SEMAPHORES.0 != 0 {
        EventKind::Semaphore
    } else if mask & EventSet::MUTEXES.0 != 0 {
        EventKind::Mutex
    } else if mask == EVT_ABSOLUTE_TIMER.0 {
        EventKind::AbsoluteTimer
    } else if mask == EVT_DELAY_TIMER.0 {
        EventKind::DelayTimer
    } else {
        EventKind::Broadcast
    }
}

/// Indicates the priority class of a task.
///
/// Priority classes are small numbers starting from zero, and numerically
/// *higher* classes are scheduled first. This type deliberately does not
/// implement `PartialOrd`/`Ord`, to keep us from confusing ourselves about
/// whether `>` means "compares greater" or "runs first" at call sites.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[repr(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Checks if `self` is strictly more important than `other`, i.e. its
    /// tasks preempt tasks of `other`.
    pub fn is_more_important_than(self, other: Self) -> bool {
        self.0 > other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_partition_is_disjoint_and_covers_the_word() {
        let s = EventSet::SEMAPHORES.0;
        let m = EventSet::MUTEXES.0;
        let b = EventSet::BROADCASTS.0;
        let t = EventSet::TIMERS.0;
        assert_eq!(s & m, 0);
        assert_eq!((s | m) & b, 0);
        assert_eq!((s | m | b) & t, 0);
        assert_eq!(s | m | b | t, 0xFFFF);
    }

    #[test]
    fn classification_matches_partition_masks() {
        for bit in 0..16u8 {
            let mask = EventSet(1 << bit);
            let expected = if EventSet::SEMAPHORES.contains(mask) {
                EventKind::Semaphore
            } else if EventSet::MUTEXES.contains(mask) {
                EventKind::Mutex
            } else if mask == EVT_ABSOLUTE_TIMER {
                EventKind::AbsoluteTimer
            } else if mask == EVT_DELAY_TIMER {
                EventKind::DelayTimer
            } else {
                EventKind::Broadcast
            };
            assert_eq!(classify(bit), expected, "bit {bit}");
        }
    }

    #[test]
    fn configured_partition_lands_where_the_scenarios_expect() {
        assert_eq!(EventSet::SEMAPHORES, EventSet(0x0003));
        assert_eq!(EventSet::MUTEXES, EVT_MUTEX_00);
        assert!(EventSet::BROADCASTS.contains(EVT_EVENT_03));
        assert!(EventSet::BROADCASTS.contains(EVT_EVENT_13));
        assert_eq!(EVT_ABSOLUTE_TIMER.0, 0x4000);
        assert_eq!(EVT_DELAY_TIMER.0, 0x8000);
    }

    #[test]
    fn higher_class_number_is_more_important() {
        assert!(Priority(2).is_more_important_than(Priority(1)));
        assert!(!Priority(1).is_more_important_than(Priority(1)));
        assert!(!Priority(0).is_more_important_than(Priority(1)));
    }

    #[test]
    fn set_operations() {
        let a = EVT_EVENT_03 | EVT_EVENT_04;
        assert!(a.contains(EVT_EVENT_03));
        assert!(!a.contains(EVT_EVENT_05));
        assert!(a.intersects(EVT_EVENT_04 | EVT_EVENT_05));
        assert_eq!(a.difference(EVT_EVENT_03), EVT_EVENT_04);
        assert!(EventSet::EMPTY.is_empty());
        assert_eq!(a & EVT_EVENT_03, EVT_EVENT_03);
        assert_eq!(a ^ a, EventSet::EMPTY);
    }
}
