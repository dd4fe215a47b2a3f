// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Event delivery: the logic halves of `post_event` and `wait_for_event`.
//!
//! Both run with interrupts globally disabled, entered either from a task
//! through the software-interrupt trampolines or (for posting) from an
//! application ISR; the two origins share this code so the semantics cannot
//! drift apart. The functions mutate the scheduler state and report whether
//! a context switch is required; actually performing the switch is the
//! arch layer's business.

use abi::{EventSet, Ticks, SEMAPHORE_COUNT};

use crate::sched::{Sched, HAS_SYNC_OBJECTS, IDLE};
use crate::task::{validate_wait_condition, Task};

/// Posts a set of events, delivering them as one atomic step before any
/// reselection: broadcast bits go to every waiting task, mutex and
/// semaphore bits to the first eligible task in suspended-list order, which
/// is highest priority first and FIFO within a class. Whatever sync-object
/// bits no task wanted flow back into their stores.
///
/// Timer bits cannot be posted; trying is a configuration error.
///
/// Returns whether a context switch is required.
#[must_use]
pub fn post(sched: &mut Sched, tasks: &mut [Task], mask: EventSet) -> bool {
    uassert!(!mask.intersects(EventSet::TIMERS));

    let broadcast = mask.difference(EventSet::SEMAPHORES | EventSet::MUTEXES);
    let mut mtx_to_deliver = mask & EventSet::MUTEXES;
    let mut sem_to_deliver = mask & EventSet::SEMAPHORES;

    #[cfg(debug_assertions)]
    let all_released_mutexes = mtx_to_deliver;

    let mut reselect = false;
    let mut pos = 0;
    while pos < sched.suspended_count() {
        let idx = sched.suspended(pos);
        let became_ready = {
            let t = &mut tasks[idx];

            // A mutex is boolean: granting one to a task that already holds
            // it means the application lost track of ownership.
            #[cfg(debug_assertions)]
            uassert!(!t.posted_events().intersects(all_released_mutexes));

            let before = t.posted_events();

            // Broadcast bits are not consumed by delivery; mutex bits are.
            let got = (broadcast | mtx_to_deliver) & t.wait_mask();
            t.insert_posted(got);
            mtx_to_deliver = mtx_to_deliver.difference(got);

            // A semaphore unit goes to a task that awaits the bit and has
            // not already received it in an earlier post.
            let sems = (sem_to_deliver & t.wait_mask())
                .difference(t.posted_events());
            t.insert_posted(sems);
            sem_to_deliver = sem_to_deliver.difference(sems);

            before != t.posted_events() && t.is_resumable()
        };
        if became_ready {
            sched.resume_task(pos, tasks);
            reselect = true;
            // The removal shifted the next candidate into this position.
        } else {
            pos += 1;
        }
    }

    // Undelivered semaphore units accumulate in the counters for later
    // acquisition.
    for i in 0..SEMAPHORE_COUNT {
        if sem_to_deliver.intersects(EventSet::from_bits(1 << i)) {
            sched.produce_semaphore(i);
        }
    }

    // Undelivered mutexes become free again. Releasing a mutex that already
    // is free means the application released something it never acquired.
    #[cfg(debug_assertions)]
    uassert!(!sched.mutexes_free().intersects(all_released_mutexes));
    sched.return_mutexes(mtx_to_deliver);

    reselect && sched.select_active()
}

/// Records a wait condition for the running task and suspends it, unless
/// already-free synchronization objects satisfy the condition on the spot.
///
/// Returns whether the task actually suspended. Either way the resume cause
/// travels through the task's accumulated event set, from where the
/// context-switch code delivers it as the call's return value.
///
/// The idle task has nothing to suspend into; calling this from it is a
/// configuration error.
#[must_use]
pub fn wait(
    sched: &mut Sched,
    tasks: &mut [Task],
    mask: EventSet,
    all: bool,
    timeout: Ticks,
) -> bool {
    let cur = sched.current();
    uassert!(cur != IDLE);
    // Checked up front: the fast path below must not let an ill-formed mask
    // slip through just because it happens to be satisfiable.
    validate_wait_condition(mask, all);

    if HAS_SYNC_OBJECTS {
        // Claim whatever requested sync objects are free right now. The
        // running task's accumulated set is empty by invariant, so this is
        // an assignment, not an accumulation.
        let mut granted = sched.take_free_mutexes(mask);
        for i in 0..SEMAPHORE_COUNT {
            let bit = EventSet::from_bits(1 << i);
            if mask.intersects(bit) && sched.try_take_semaphore(i) {
                granted |= bit;
            }
        }
        tasks[cur].set_posted(granted);

        // Timer bits never need waiting for; they are pure OR terms.
        let satisfied = if all {
            (granted ^ mask).difference(EventSet::TIMERS).is_empty()
        } else {
            !granted.is_empty()
        };
        if satisfied {
            return false;
        }
    }

    // Commit to suspension: record the resume condition, step off the ready
    // head, and file into the suspended list at the priority-ordered
    // position.
    let now = sched.now();
    tasks[cur].store_resume_condition(mask, all, timeout, now);
    let class = tasks[cur].priority().0 as usize;
    sched.remove_ready_head(class, cur);
    sched.insert_suspended(cur, tasks);

    // The caller just left the ready set, so this always switches, to the
    // next ready task or to idle.
    let switched = sched.select_active();
    uassert!(switched);
    true
}
