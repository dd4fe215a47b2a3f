// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The system tick: the one place the kernel's clock advances.
//!
//! Invoked from the tick ISR with interrupts globally disabled. Most ticks
//! change nothing and the cost is one pass over the suspended list; only
//! when a timer fires or a time slice runs out does the running-task
//! selection get re-run.

use crate::sched::Sched;
use crate::task::Task;

/// Handles one tick: advances the system time, serves every suspended
/// task's timers, burns the running task's round-robin slice, and re-selects
/// the running task if any of that changed the ready set. Returns whether a
/// context switch is required.
#[must_use]
pub fn on_tick(sched: &mut Sched, tasks: &mut [Task]) -> bool {
    let now = sched.advance_time();

    let mut reselect = false;

    // Serve the timers of every suspended task. Resuming a task removes it
    // from the list and shifts the tail down, putting the next candidate at
    // the same position.
    let mut pos = 0;
    while pos < sched.suspended_count() {
        let idx = sched.suspended(pos);
        let fired = tasks[idx].service_timers(now);
        if fired && tasks[idx].is_resumable() {
            sched.resume_task(pos, tasks);
            reselect = true;
        } else {
            pos += 1;
        }
    }

    // Round-robin applies to the running task only. It cannot lose
    // readiness here, just the head position of its class.
    #[cfg(feature = "round-robin")]
    {
        let cur = sched.current();
        if tasks[cur].tick_slice() {
            let class = tasks[cur].priority().0 as usize;
            if sched.ready_count(class) > 1 {
                sched.rotate_ready(class);
                reselect = true;
            }
        }
    }

    reselect && sched.select_active()
}
