// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel configuration and startup.
//!
//! The kernel state is one statically allocated value, constructed at
//! compile time and owned by this module. Before `start_kernel` the boot
//! context fills it in through `initialize_task`; afterwards every access
//! happens inside an interrupts-disabled kernel entry. `with_kernel` is the
//! single doorway for both phases.

use core::cell::UnsafeCell;

use abi::{EventSet, Priority, TaskEntry, Ticks, TASK_COUNT};

use crate::sched::Sched;
use crate::task::Task;

/// The whole of the kernel's mutable state: the scheduler and the task
/// table. The extra table slot at index `TASK_COUNT` is the idle task; it
/// has no entry function and its "stack" is whatever the platform booted
/// on, so it never gets configured or primed.
pub(crate) struct Kernel {
    pub(crate) sched: Sched,
    pub(crate) tasks: [Task; TASK_COUNT + 1],
}

impl Kernel {
    pub(crate) const fn new() -> Self {
        const EMPTY: Task = Task::empty();
        Kernel {
            sched: Sched::new(),
            tasks: [EMPTY; TASK_COUNT + 1],
        }
    }

    /// Implementation of [`initialize_task`]; tests drive this directly on
    /// their own instances.
    pub(crate) fn initialize_task(
        &mut self,
        index: usize,
        entry: TaskEntry,
        prio_class: u8,
        #[cfg(feature = "round-robin")] rr_reload: Ticks,
        stack: &'static mut [u8],
        start_mask: EventSet,
        start_all: bool,
        start_timeout: Ticks,
    ) {
        uassert!(index < TASK_COUNT);
        uassert!((prio_class as usize) < abi::PRIO_CLASS_COUNT);
        uassert!(!self.tasks[index].is_configured());
        uassert!(!start_mask.is_empty());
        // Start conditions wait on broadcast or timer events only. A task
        // that needs to own a sync object from the beginning issues an
        // explicit wait as its first action instead.
        uassert!(
            !start_mask.intersects(EventSet::SEMAPHORES | EventSet::MUTEXES)
        );

        let t = &mut self.tasks[index];
        t.configure(entry, Priority(prio_class), stack);
        #[cfg(feature = "round-robin")]
        t.set_rr_reload(rr_reload);
        t.store_resume_condition(
            start_mask,
            start_all,
            start_timeout,
            self.sched.now(),
        );
    }

    /// Primes every configured task's stack and files every task into the
    /// suspended list with its start condition pending. Leaves idle as the
    /// running task.
    pub(crate) fn start(&mut self) {
        let Kernel { sched, tasks } = self;
        for index in 0..TASK_COUNT {
            uassert!(tasks[index].is_configured());
            tasks[index].prime_stack();
            sched.insert_suspended(index, tasks);
        }
    }
}

// Safety: single-core system. Every access is funneled through
// `with_kernel`, whose contract demands mutual exclusion (boot context or
// interrupts globally disabled).
struct KernelCell(UnsafeCell<Kernel>);
unsafe impl Sync for KernelCell {}

static KERNEL: KernelCell = KernelCell(UnsafeCell::new(Kernel::new()));

/// Grants access to the kernel state.
///
/// # Safety
///
/// The caller must hold the system's one big lock: either the kernel has
/// not started yet, or interrupts are globally disabled for the duration.
/// Re-entering from inside the closure is undefined.
pub(crate) unsafe fn with_kernel<R>(body: impl FnOnce(&mut Kernel) -> R) -> R {
    unsafe { body(&mut *KERNEL.0.get()) }
}

/// Application-supplied boot hooks.
///
/// These are plain function pointers so a default table can be built in
/// const context; an application overrides individual fields with struct
/// update syntax on `Hooks::default()`.
pub struct Hooks {
    /// Configures and unmasks the interrupt that clocks the kernel. The
    /// default enables the TIMER2 overflow interrupt; an application using
    /// another timer replaces this and accepts responsibility for the tick
    /// ISR vector.
    pub enable_tick_interrupt: fn(),
    /// Hardware setup for the application interrupts declared with
    /// `application_interrupt!`. Defaults to doing nothing.
    pub enable_application_interrupts: fn(),
    /// The idle body. Called in an endless loop from the idle task; it may
    /// return freely and must never wait.
    pub idle: fn(),
}

fn nothing() {}

impl Default for Hooks {
    fn default() -> Self {
        Hooks {
            enable_tick_interrupt: crate::arch::default_enable_tick_interrupt,
            enable_application_interrupts: nothing,
            idle: nothing,
        }
    }
}

/// Records the static configuration of one task.
///
/// Must be called exactly once per task index, before [`start_kernel`];
/// calling it after the kernel has started is undefined. The stack area is
/// handed over for good and must outlive the program, hence `'static`.
///
/// The start condition (`start_mask`, `start_all`, `start_timeout`) is the
/// wait the task is born into, with the same meaning as the parameters of
/// `wait_for_event`.
pub fn initialize_task(
    index: usize,
    entry: TaskEntry,
    prio_class: u8,
    #[cfg(feature = "round-robin")] rr_reload: Ticks,
    stack: &'static mut [u8],
    start_mask: EventSet,
    start_all: bool,
    start_timeout: Ticks,
) {
    // Safety: configuration time; the tick interrupt does not exist yet.
    #[cfg(feature = "round-robin")]
    unsafe {
        with_kernel(|k| {
            k.initialize_task(
                index, entry, prio_class, rr_reload, stack, start_mask,
                start_all, start_timeout,
            )
        })
    }
    #[cfg(not(feature = "round-robin"))]
    unsafe {
        with_kernel(|k| {
            k.initialize_task(
                index, entry, prio_class, stack, start_mask, start_all,
                start_timeout,
            )
        })
    }
}

/// Finishes kernel setup and starts scheduling. Does not return: the rest
/// of the boot context becomes the idle task.
///
/// Every task index must have been configured via [`initialize_task`]
/// before this point.
pub fn start_kernel(hooks: Hooks) -> ! {
    klog!("perch: starting");
    // Safety: boot context, tick interrupt not yet enabled.
    unsafe { with_kernel(|k| k.start()) };

    (hooks.enable_tick_interrupt)();
    (hooks.enable_application_interrupts)();

    klog!("perch: scheduling");
    // Safety: the state is fully prepared; from here on every kernel entry
    // masks interrupts itself.
    unsafe { crate::arch::enable_interrupts() };

    loop {
        (hooks.idle)();
    }
}
