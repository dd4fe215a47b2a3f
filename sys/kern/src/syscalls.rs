// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The kernel API exposed to task code.
//!
//! The two calls that can switch tasks, [`post_event`] and
//! [`wait_for_event`], are pseudo software interrupts: thin wrappers around
//! assembly trampolines that save the caller's context, run the delivery
//! logic from `events` with interrupts masked, and return on whatever
//! context the scheduler picked. The remaining calls are ordinary functions
//! that bracket their state access with an interrupt-free section.

use abi::{EventSet, Ticks, EVT_ABSOLUTE_TIMER, EVT_DELAY_TIMER, TASK_COUNT};

/// Posts a set of events to the suspended tasks.
///
/// Broadcast bits reach every task waiting on them; mutex and semaphore
/// bits are handed to the highest-priority, longest-waiting eligible task,
/// with the surplus flowing back into the kernel stores. May preempt the
/// caller if the delivery resumes a more important task; the call returns
/// once the caller has the CPU again. The caller stays ready throughout, so
/// even the idle task may post.
///
/// `mask` must not contain the timer bits.
pub fn post_event(mask: EventSet) {
    post_trampoline(mask.bits())
}

/// Suspends the calling task until a combination of events appears or a
/// timeout elapses. Returns the set of events that caused the resume.
///
/// With `all` false the first awaited event resumes the task; with `all`
/// true every awaited non-timer event is required, while a requested timer
/// bit remains a disjunctive timeout. If the wait can be satisfied from
/// already-free mutexes and semaphore units, the call returns immediately
/// without suspending.
///
/// `timeout` names ticks on the delay timer, or the increment of the
/// task's due time if the mask requests the absolute timer. A delay
/// timeout of zero is allowed and yields the CPU for up to one tick.
///
/// Must not be called by the idle task.
pub fn wait_for_event(mask: EventSet, all: bool, timeout: Ticks) -> EventSet {
    EventSet::from_bits(wait_trampoline(mask.bits(), all, timeout))
}

#[cfg(target_arch = "avr")]
fn post_trampoline(mask: u16) {
    extern "C" {
        fn kern_post_event_trampoline(mask: u16);
    }
    // Safety: the trampoline masks interrupts and preserves the full caller
    // context.
    unsafe { kern_post_event_trampoline(mask) }
}

#[cfg(target_arch = "avr")]
fn wait_trampoline(mask: u16, all: bool, timeout: u16) -> u16 {
    extern "C" {
        fn kern_wait_for_event_trampoline(
            mask: u16,
            all: bool,
            timeout: u16,
        ) -> u16;
    }
    // Safety: the trampoline masks interrupts; the u16 it returns is the
    // resume cause popped from the injected r24/r25 slot.
    unsafe { kern_wait_for_event_trampoline(mask, all, timeout) }
}

// The entries only exist where a context can actually be switched; the
// host stand-in has no tasks to run.
#[cfg(not(target_arch = "avr"))]
fn post_trampoline(_mask: u16) {
    panic!("kernel entry without a target");
}

#[cfg(not(target_arch = "avr"))]
fn wait_trampoline(_mask: u16, _all: bool, _timeout: u16) -> u16 {
    panic!("kernel entry without a target");
}

/// Delays the calling task without looking at other events. A delay of `n`
/// means anything from `n` to `n + 1` ticks; zero yields to class peers for
/// up to one tick.
pub fn delay(timeout: Ticks) -> EventSet {
    wait_for_event(EVT_DELAY_TIMER, false, timeout)
}

/// Suspends the calling task until a point in time `delta` ticks after its
/// previous due time.
///
/// Because the reference is the previous due time rather than now, a task
/// looping on this call runs at an exact period regardless of its own
/// execution time; that also makes lateness detectable, see
/// [`task_overrun_count`]. `delta` must be nonzero and below half the timer
/// range, or overrun recognition turns unreliable.
pub fn suspend_till_time(delta: Ticks) -> EventSet {
    wait_for_event(EVT_ABSOLUTE_TIMER, false, delta)
}

/// Reads a task's overrun counter: the number of recognized misses of its
/// absolute-timer deadline, saturating at 255. With `reset` the counter is
/// atomically read and cleared, for callers accumulating it into a wider
/// count.
pub fn task_overrun_count(index: usize, reset: bool) -> u8 {
    uassert!(index < TASK_COUNT);
    crate::arch::interrupt_free(|| {
        // Safety: interrupts are masked for the duration of the access.
        unsafe {
            crate::startup::with_kernel(|k| {
                if reset {
                    k.tasks[index].take_overrun_count()
                } else {
                    k.tasks[index].overrun_count()
                }
            })
        }
    })
}

/// Counts the still-unused bytes at the bottom of a task's stack, by
/// scanning for the priming sentinel. Advisory, and linear in the stack
/// size; call it from idle or a diagnosis build, not from anything with a
/// deadline.
pub fn stack_reserve(index: usize) -> u16 {
    uassert!(index < TASK_COUNT);
    crate::arch::interrupt_free(|| {
        // Safety: interrupts are masked for the duration of the access.
        unsafe {
            crate::startup::with_kernel(|k| k.tasks[index].stack_reserve())
        }
    })
}

/// Opens a bracket in which no task switch can occur, by masking the
/// interrupt sources that could cause one.
///
/// Brackets do not nest: the leave call unmasks unconditionally, so an
/// inner pair would re-enable switching for the rest of the outer bracket.
/// Nesting is an application error. Keep brackets short; the tick is not
/// counted while one is open.
pub fn enter_critical_section() {
    crate::arch::disable_interrupts();
}

/// Counterpart of [`enter_critical_section`].
pub fn leave_critical_section() {
    // Safety: undoes the matching enter. The application contract is that
    // the pair brackets task code, never a kernel entry.
    unsafe { crate::arch::enable_interrupts() }
}
