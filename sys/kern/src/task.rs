// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Implementation of tasks.
//!
//! A task has no explicit state field; being running, ready, or suspended is
//! a matter of which scheduler list holds its index (see `sched`). What
//! lives here is everything task-local: the saved machine state, the static
//! configuration, the two timers, and the accumulated event state that the
//! resume predicate is evaluated against.

use abi::{
    EventSet, Priority, TaskEntry, Ticks, EVT_ABSOLUTE_TIMER, EVT_DELAY_TIMER,
};

use crate::time;

/// Smallest stack a task may be configured with: the 37-byte context frame
/// plus working headroom for one nested interrupt entry.
pub const MIN_STACK_SIZE: usize = 50;

/// Checks the structural rules every wait condition must obey: the mask
/// must name at least one event, must not request both timers at once, and
/// with `all` must include at least one non-timer bit (timers are pure OR
/// terms and cannot carry a conjunction by themselves).
///
/// Shared between the wait entry and the stored resume condition, so a
/// malformed mask is caught even when free sync objects would satisfy it on
/// the spot.
pub(crate) fn validate_wait_condition(mask: EventSet, all: bool) {
    uassert!(!mask.is_empty());
    uassert!(!mask.contains(EventSet::TIMERS));
    uassert!(!all || !mask.difference(EventSet::TIMERS).is_empty());
}

/// Internal representation of a task.
///
/// The fields of this struct are private to this module so that the event
/// and timer invariants can be maintained in one place. Notably,
/// `posted_events` carries double duty: while the task is suspended it
/// accumulates the satisfied part of the wait mask, and at switch-in time a
/// nonzero value is the marker that the task is parked inside
/// `wait_for_event` and owed a return value.
#[repr(C)] // so location of SavedState is predictable
#[derive(Debug)]
pub struct Task {
    /// Saved machine state. Must stay the first field.
    save: crate::arch::SavedState,
    /// Priority class; higher numbers run first.
    priority: Priority,
    /// The one-shot entry function. `None` until configured, and forever
    /// `None` for the idle descriptor.
    entry: Option<TaskEntry>,
    /// Statically owned stack area.
    stack_base: *mut u8,
    stack_size: u16,
    /// Absolute tick at which the absolute-timer event fires next.
    due_at: Ticks,
    /// Countdown for the delay-timer event; 0 means inactive.
    delay_ticks: Ticks,
    /// Time-slice length in ticks; 0 disables round-robin for this task.
    #[cfg(feature = "round-robin")]
    rr_reload: Ticks,
    /// Remaining slice of the current activation.
    #[cfg(feature = "round-robin")]
    rr_counter: Ticks,
    /// Events received while suspended and not yet consumed by the resumed
    /// task.
    posted_events: EventSet,
    /// Events awaited.
    wait_mask: EventSet,
    /// Resume on the full non-timer mask rather than on any bit.
    wait_for_all: bool,
    /// Recognized deadline misses on the absolute timer; saturates.
    overrun_count: u8,
}

impl Task {
    /// An unconfigured descriptor, the state every table slot starts in.
    pub(crate) const fn empty() -> Self {
        Task {
            save: crate::arch::SavedState::INIT,
            priority: Priority(0),
            entry: None,
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            due_at: 0,
            delay_ticks: 0,
            #[cfg(feature = "round-robin")]
            rr_reload: 0,
            #[cfg(feature = "round-robin")]
            rr_counter: 0,
            posted_events: EventSet::EMPTY,
            wait_mask: EventSet::EMPTY,
            wait_for_all: false,
            overrun_count: 0,
        }
    }

    /// Records the static configuration. Happens exactly once, before the
    /// kernel starts.
    pub(crate) fn configure(
        &mut self,
        entry: TaskEntry,
        priority: Priority,
        stack: &'static mut [u8],
    ) {
        self.entry = Some(entry);
        self.priority = priority;
        self.stack_base = stack.as_mut_ptr();
        self.stack_size = stack.len() as u16;
    }

    /// Sets the round-robin time-slice length; 0 leaves round-robin off for
    /// this task.
    #[cfg(feature = "round-robin")]
    pub(crate) fn set_rr_reload(&mut self, rr_reload: Ticks) {
        self.rr_reload = rr_reload;
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.entry.is_some()
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn posted_events(&self) -> EventSet {
        self.posted_events
    }

    pub(crate) fn wait_mask(&self) -> EventSet {
        self.wait_mask
    }

    /// ORs events into the accumulated set. Callers apply the wait mask
    /// themselves, because delivery of sync objects needs to know which bits
    /// actually landed.
    pub(crate) fn insert_posted(&mut self, events: EventSet) {
        self.posted_events |= events;
    }

    /// Overwrites the accumulated set; used by the wait path when claiming
    /// already-free sync objects, where the running task's set is empty by
    /// invariant.
    pub(crate) fn set_posted(&mut self, events: EventSet) {
        self.posted_events = events;
    }

    /// The resume predicate: decides whether the accumulated events satisfy
    /// the recorded wait condition.
    ///
    /// Waiting for "any" resumes on the first bit. Waiting for "all" demands
    /// the complete non-timer part of the mask, but a requested timer bit
    /// stays a disjunctive timeout: it resumes the task by itself.
    pub(crate) fn is_resumable(&self) -> bool {
        let posted = self.posted_events;
        if !self.wait_for_all {
            !posted.is_empty()
        } else {
            (posted ^ self.wait_mask)
                .difference(EventSet::TIMERS)
                .is_empty()
                || posted.intersects(self.wait_mask & EventSet::TIMERS)
        }
    }

    /// Consumes the pending resume cause, if any.
    ///
    /// Nonzero accumulated events mark a task that suspended inside
    /// `wait_for_event` and has not run since; the value taken here is what
    /// that call returns. A task preempted from the ready state keeps zero
    /// here, and gets `None`: its register state is complete and must not be
    /// disturbed.
    pub(crate) fn take_resume_cause(&mut self) -> Option<EventSet> {
        if self.posted_events.is_empty() {
            None
        } else {
            Some(core::mem::take(&mut self.posted_events))
        }
    }

    /// Records the condition under which the task resumes next. Shared
    /// between the wait path and task initialization (the start condition is
    /// stored with exactly the same rules).
    ///
    /// The mask must be nonempty, must not request both timers, and with
    /// `all` must contain at least one non-timer bit; anything else is a
    /// configuration error.
    pub(crate) fn store_resume_condition(
        &mut self,
        mask: EventSet,
        all: bool,
        timeout: Ticks,
        now: Ticks,
    ) {
        validate_wait_condition(mask, all);

        if mask.intersects(EVT_ABSOLUTE_TIMER) {
            // The new due time is relative to the previous one, not to now;
            // that is what makes the absolute timer drift-free for regular
            // tasks.
            self.due_at = self.due_at.wrapping_add(timeout);
            if time::is_due_or_past(self.due_at, now) {
                // The intended activation is already behind us.
                self.overrun_count = self.overrun_count.saturating_add(1);
                if cfg!(feature = "overrun-due-next-tick") {
                    self.due_at = now.wrapping_add(1);
                }
            }
        } else {
            // The call is not synchronized with the tick, so the stated
            // timeout is a minimum and the extra tick absorbs the phase
            // uncertainty. At the numeric edge the increment is skipped
            // rather than wrapped to zero, which would disarm the timer.
            self.delay_ticks = match timeout.checked_add(1) {
                Some(t) => t,
                None => timeout,
            };
        }
        self.wait_mask = mask;
        self.wait_for_all = all;
    }

    /// Advances the task's timers by one tick, accumulating timer events as
    /// they fire. Returns whether the accumulated set changed.
    pub(crate) fn service_timers(&mut self, now: Ticks) -> bool {
        let before = self.posted_events;
        if now == self.due_at {
            // Re-setting an already pending absolute-timer bit cannot
            // happen: the bit is never an AND term, so the first occurrence
            // resumes the task before a second tick could match.
            self.posted_events |= EVT_ABSOLUTE_TIMER & self.wait_mask;
        }
        if self.delay_ticks > 0 {
            self.delay_ticks -= 1;
            if self.delay_ticks == 0 {
                self.posted_events |= EVT_DELAY_TIMER & self.wait_mask;
            }
        }
        before != self.posted_events
    }

    /// Reloads the round-robin slice; done whenever the task earns a fresh
    /// activation.
    #[cfg(feature = "round-robin")]
    pub(crate) fn reload_slice(&mut self) {
        self.rr_counter = self.rr_reload;
    }

    /// Burns one tick of the running task's slice. Returns true when the
    /// slice just expired; the counter is reloaded for the next activation
    /// either way.
    #[cfg(feature = "round-robin")]
    pub(crate) fn tick_slice(&mut self) -> bool {
        if self.rr_counter != 0 {
            self.rr_counter -= 1;
            if self.rr_counter == 0 {
                self.reload_slice();
                return true;
            }
        }
        false
    }

    pub(crate) fn overrun_count(&self) -> u8 {
        self.overrun_count
    }

    /// Read-and-clear of the overrun counter, for callers that accumulate it
    /// into a wider count.
    pub(crate) fn take_overrun_count(&mut self) -> u8 {
        core::mem::take(&mut self.overrun_count)
    }

    /// Writes the initial context image onto the task's stack and records
    /// the resulting stack pointer. Unused stack is left holding the
    /// sentinel pattern for the reserve inspector.
    pub(crate) fn prime_stack(&mut self) {
        uassert!(!self.stack_base.is_null());
        uassert!(self.stack_size as usize >= MIN_STACK_SIZE);
        if let Some(entry) = self.entry {
            // Safety: the area was handed to `configure` as an exclusive
            // `'static` slice and the task has not started running on it.
            let stack = unsafe {
                core::slice::from_raw_parts_mut(
                    self.stack_base,
                    self.stack_size as usize,
                )
            };
            let sp = crate::arch::prepare_task_stack(stack, entry);
            self.save.set_stack_pointer(sp);
        }
    }

    /// Counts still-virgin sentinel bytes from the bottom of the stack up.
    ///
    /// The count is advisory: a live data byte can coincide with the
    /// sentinel, making the result optimistic by a byte or two, and the
    /// deepest stack excursion may simply not have happened yet. Treat it as
    /// an upper bound when trimming stack sizes.
    pub(crate) fn stack_reserve(&self) -> u16 {
        uassert!(!self.stack_base.is_null());
        let mut n = 0;
        while n < self.stack_size {
            // Volatile: the task may be live and scribbling above here.
            let byte = unsafe {
                core::ptr::read_volatile(self.stack_base.add(n as usize))
            };
            if byte != crate::arch::STACK_SENTINEL {
                break;
            }
            n += 1;
        }
        n
    }

    pub(crate) fn save(&self) -> &crate::arch::SavedState {
        &self.save
    }

    pub(crate) fn save_mut(&mut self) -> &mut crate::arch::SavedState {
        &mut self.save
    }

    #[cfg(test)]
    pub(crate) fn due_at(&self) -> Ticks {
        self.due_at
    }

    #[cfg(test)]
    pub(crate) fn delay_ticks(&self) -> Ticks {
        self.delay_ticks
    }

    /// Test-only: builds a descriptor with just a priority, for exercising
    /// the scheduler lists.
    #[cfg(test)]
    pub(crate) fn stub(priority: u8) -> Self {
        let mut t = Self::empty();
        t.priority = Priority(priority);
        t
    }

    /// Test-only: sets a wait condition without the configuration checks,
    /// for enumerating the predicate over ill-formed masks too.
    #[cfg(test)]
    pub(crate) fn force_wait_condition(&mut self, mask: EventSet, all: bool) {
        self.wait_mask = mask;
        self.wait_for_all = all;
    }
}
