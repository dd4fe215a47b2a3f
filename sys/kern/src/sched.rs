// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scheduler state: the ready and suspended lists, the running-task
//! selection, and the stores backing the synchronization objects.
//!
//! Tasks refer to each other only by index into the task table; the lists
//! here hold indices, never references. The running task is not tracked
//! separately from readiness: it occupies position 0 of its priority class's
//! ready list, which makes `select_active` a single scan and makes
//! round-robin rotation a cyclic move of that list. The idle descriptor (at
//! index `IDLE`) is in no list; it is `current` exactly when every ready
//! list is empty.

use abi::{
    EventSet, SemCount, Ticks, MAX_TASKS_PER_PRIO_CLASS, MUTEX_COUNT,
    PRIO_CLASS_COUNT, SEMAPHORE_COUNT, SEMAPHORE_INITIAL, TASK_COUNT,
};

use crate::task::Task;

/// Index of the implicit idle descriptor, one past the application tasks.
pub const IDLE: usize = TASK_COUNT;

/// Whether any synchronization objects are configured. Decides if the
/// suspended list carries a priority order (the post walk relies on it for
/// token handout) or is a plain bag.
pub(crate) const HAS_SYNC_OBJECTS: bool = SEMAPHORE_COUNT + MUTEX_COUNT > 0;

/// The kernel's mutable scheduling state. One instance exists, inside the
/// kernel global; unit tests build their own.
#[derive(Debug)]
pub struct Sched {
    /// Cyclic system time, advanced by the tick handler.
    now: Ticks,
    /// Per-class ready lists; position 0 of the highest nonempty class is
    /// the running task.
    ready: [[usize; MAX_TASKS_PER_PRIO_CLASS]; PRIO_CLASS_COUNT],
    ready_count: [usize; PRIO_CLASS_COUNT],
    /// Suspended tasks, in decreasing priority order (FIFO within a class)
    /// when sync objects are configured.
    suspended: [usize; TASK_COUNT],
    suspended_count: usize,
    /// The running task.
    current: usize,
    /// The task being switched out, for the context-switch code.
    outgoing: usize,
    /// One bit per mutex event; set means free.
    mutexes_free: EventSet,
    /// Free units per semaphore event.
    semaphores: [SemCount; SEMAPHORE_COUNT],
}

impl Sched {
    pub(crate) const fn new() -> Self {
        Sched {
            // Chosen so the very first tick handler invocation observes
            // time zero.
            now: Ticks::MAX,
            ready: [[0; MAX_TASKS_PER_PRIO_CLASS]; PRIO_CLASS_COUNT],
            ready_count: [0; PRIO_CLASS_COUNT],
            suspended: [0; TASK_COUNT],
            suspended_count: 0,
            current: IDLE,
            outgoing: IDLE,
            mutexes_free: EventSet::MUTEXES,
            semaphores: SEMAPHORE_INITIAL,
        }
    }

    pub(crate) fn now(&self) -> Ticks {
        self.now
    }

    /// Clocks the system time by one tick, cyclic overrun intended.
    pub(crate) fn advance_time(&mut self) -> Ticks {
        self.now = self.now.wrapping_add(1);
        self.now
    }

    pub(crate) fn current(&self) -> usize {
        self.current
    }

    pub(crate) fn outgoing(&self) -> usize {
        self.outgoing
    }

    /// Makes the head of the highest nonempty ready class the running task,
    /// falling back to idle when everything is suspended. Records the old
    /// running task in `outgoing` and reports whether the two differ, i.e.
    /// whether a context switch is needed.
    #[must_use]
    pub(crate) fn select_active(&mut self) -> bool {
        let mut next = IDLE;
        for class in (0..PRIO_CLASS_COUNT).rev() {
            if self.ready_count[class] > 0 {
                next = self.ready[class][0];
                break;
            }
        }
        self.outgoing = self.current;
        self.current = next;
        crate::fail::note_dispatch(self.current);
        self.current != self.outgoing
    }

    pub(crate) fn ready_count(&self, class: usize) -> usize {
        self.ready_count[class]
    }

    #[cfg(test)]
    pub(crate) fn ready(&self, class: usize, pos: usize) -> usize {
        self.ready[class][pos]
    }

    /// Appends a task at the tail of its class's ready list.
    pub(crate) fn push_ready(&mut self, class: usize, idx: usize) {
        let n = self.ready_count[class];
        uassert!(n < MAX_TASKS_PER_PRIO_CLASS);
        self.ready[class][n] = idx;
        self.ready_count[class] = n + 1;
    }

    /// Removes the head of a ready class, shifting the tail down. The head
    /// is the running task by construction, and the caller names it so the
    /// structure can be cross-checked.
    pub(crate) fn remove_ready_head(&mut self, class: usize, idx: usize) {
        let n = self.ready_count[class];
        uassert!(n > 0);
        uassert!(self.ready[class][0] == idx);
        for i in 0..n - 1 {
            self.ready[class][i] = self.ready[class][i + 1];
        }
        self.ready_count[class] = n - 1;
    }

    /// Cyclically moves the head of a ready class to its tail; the next
    /// task in line becomes the preemption candidate.
    pub(crate) fn rotate_ready(&mut self, class: usize) {
        let n = self.ready_count[class];
        uassert!(n > 1);
        let head = self.ready[class][0];
        for i in 0..n - 1 {
            self.ready[class][i] = self.ready[class][i + 1];
        }
        self.ready[class][n - 1] = head;
    }

    pub(crate) fn suspended_count(&self) -> usize {
        self.suspended_count
    }

    pub(crate) fn suspended(&self, pos: usize) -> usize {
        self.suspended[pos]
    }

    /// Inserts a task into the suspended list.
    ///
    /// With sync objects configured the list is kept in decreasing priority
    /// order and a new arrival goes behind its class peers, who have been
    /// waiting longer; the post walk then hands tokens to the
    /// highest-priority, longest-waiting eligible task by plain front-to-back
    /// iteration. Without sync objects the order carries no meaning and the
    /// task is appended.
    pub(crate) fn insert_suspended(&mut self, idx: usize, tasks: &[Task]) {
        let pos = if HAS_SYNC_OBJECTS {
            let prio = tasks[idx].priority();
            let mut pos = 0;
            while pos < self.suspended_count {
                let other = tasks[self.suspended[pos]].priority();
                if prio.is_more_important_than(other) {
                    break;
                }
                pos += 1;
            }
            pos
        } else {
            self.suspended_count
        };
        let mut i = self.suspended_count;
        while i > pos {
            self.suspended[i] = self.suspended[i - 1];
            i -= 1;
        }
        self.suspended[pos] = idx;
        self.suspended_count += 1;
    }

    /// Moves the suspended task at list position `pos` to the tail of its
    /// class's ready list. A voluntary re-suspend earns a complete new
    /// round-robin slice, so the slice counter is reloaded on this
    /// transition.
    pub(crate) fn resume_task(&mut self, pos: usize, tasks: &mut [Task]) {
        let idx = self.suspended[pos];
        #[cfg(feature = "round-robin")]
        tasks[idx].reload_slice();
        self.suspended_count -= 1;
        for i in pos..self.suspended_count {
            self.suspended[i] = self.suspended[i + 1];
        }
        let class = tasks[idx].priority().0 as usize;
        self.push_ready(class, idx);
    }

    pub(crate) fn mutexes_free(&self) -> EventSet {
        self.mutexes_free
    }

    /// Hands the caller every currently free mutex requested in `mask`,
    /// clearing them from the store. Non-mutex bits in `mask` are ignored.
    pub(crate) fn take_free_mutexes(&mut self, mask: EventSet) -> EventSet {
        let granted = mask & self.mutexes_free;
        self.mutexes_free = self.mutexes_free.difference(mask);
        granted
    }

    /// Returns undeliverable released mutexes to the free set.
    pub(crate) fn return_mutexes(&mut self, mask: EventSet) {
        self.mutexes_free |= mask;
    }

    pub(crate) fn semaphore(&self, i: usize) -> SemCount {
        self.semaphores[i]
    }

    /// Consumes one unit of semaphore `i` if any is free.
    pub(crate) fn try_take_semaphore(&mut self, i: usize) -> bool {
        if self.semaphores[i] > 0 {
            self.semaphores[i] -= 1;
            true
        } else {
            false
        }
    }

    /// Accumulates one released unit nobody was waiting for. Overflowing the
    /// counter means the application produces more units than the configured
    /// width can hold.
    pub(crate) fn produce_semaphore(&mut self, i: usize) {
        self.semaphores[i] = self.semaphores[i].wrapping_add(1);
        uassert!(self.semaphores[i] != 0);
    }
}
