// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architecture support for AVR (ATmega2560).
//!
//! # Kernel entry points
//!
//! Every way into the kernel is an interrupt, real or pretend:
//!
//! - The system tick ISR (`__vector_15`, TIMER2 overflow in the default
//!   configuration) clocks the kernel time and may switch tasks.
//! - `post_event` and `wait_for_event` are *pseudo software interrupts*: an
//!   ordinary `call` into a naked assembly trampoline that starts with `cli`
//!   and ends with `reti`, so it behaves exactly like a hardware interrupt
//!   as far as context handling and interrupt re-enabling are concerned.
//! - Application interrupts declared with [`application_interrupt!`] reuse
//!   the post-event trampoline body with a constant event argument, so an
//!   ISR-posted event takes the identical delivery path as a task-posted
//!   one.
//!
//! Each entry pushes the interrupted context onto the running task's own
//! stack, hands the resulting stack pointer to a Rust entry function, and
//! resumes on whatever stack pointer that function returns. The entire
//! context switch therefore reduces to "return a different number", which
//! keeps the assembly small and the scheduling logic portable.
//!
//! # The r24/r25 special case
//!
//! A task suspended inside `wait_for_event` must receive the 16-bit resume
//! cause as that call's return value, which the avr ABI places in r24:r25.
//! The wait trampoline deliberately saves the context *without* that
//! register pair; the two bytes are pushed synthetically just before the
//! restore pops them (see `push_resume_cause`). A nonzero `posted_events`
//! at switch-in time is the marker distinguishing "parked in wait" from
//! "preempted while ready"; preempted tasks get their real r24/r25 back
//! from the full save done by the tick and post entries.

use abi::TaskEntry;
use zerocopy::{Immutable, IntoBytes};

use crate::startup::Kernel;

macro_rules! uassert {
    ($cond:expr) => {
        // Assertion-grade checks are a debug diagnostic; production builds
        // trust their callers.
        if cfg!(debug_assertions) && !$cond {
            panic!("Assertion failed!");
        }
    };
}

// There is no kernel-owned serial port on this target, so klog! compiles to
// nothing. The call sites stay, for ports that have somewhere to print.
macro_rules! klog {
    ($s:expr) => {};
    ($s:expr, $($tt:tt)*) => {};
}

/// Context push sequence shared by every kernel entry, minus the r24/r25
/// argument/return pair (see the module docs). The program counter is
/// already on the stack from the `call` or interrupt dispatch; SREG travels
/// through r0.
#[doc(hidden)]
#[macro_export]
macro_rules! __perch_push_context_without_r24_r25 {
    () => {
        "push r0
        in r0, 0x3f
        push r0
        push r1
        push r2
        push r3
        push r4
        push r5
        push r6
        push r7
        push r8
        push r9
        push r10
        push r11
        push r12
        push r13
        push r14
        push r15
        push r16
        push r17
        push r18
        push r19
        push r20
        push r21
        push r22
        push r23
        push r26
        push r27
        push r28
        push r29
        push r30
        push r31
        "
    };
}

/// Inverse of the push sequences: restores the full context, ending with
/// SREG and r0. The `ret`/`reti` that follows restores the program counter.
#[doc(hidden)]
#[macro_export]
macro_rules! __perch_pop_context {
    () => {
        "pop r25
        pop r24
        pop r31
        pop r30
        pop r29
        pop r28
        pop r27
        pop r26
        pop r23
        pop r22
        pop r21
        pop r20
        pop r19
        pop r18
        pop r17
        pop r16
        pop r15
        pop r14
        pop r13
        pop r12
        pop r11
        pop r10
        pop r9
        pop r8
        pop r7
        pop r6
        pop r5
        pop r4
        pop r3
        pop r2
        pop r1
        pop r0
        out 0x3f, r0
        pop r0
        "
    };
}

/// Pattern byte written to unused stack area at priming time. The
/// stack-reserve inspector counts how far up from the stack bottom it
/// survives.
pub const STACK_SENTINEL: u8 = 0x29;

/// Per-task machine state tracked across context switches. Everything else
/// lives on the task's own stack, so the saved stack pointer is the whole
/// of it.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SavedState {
    sp: u16,
}

impl SavedState {
    /// Const form of `default`, for the statically initialized task table.
    pub(crate) const INIT: Self = Self { sp: 0 };

    pub fn stack_pointer(&self) -> u16 {
        self.sp
    }

    pub(crate) fn set_stack_pointer(&mut self, sp: u16) {
        self.sp = sp;
    }
}

/// Byte image of a task context as the restore sequence expects to pop it,
/// in ascending address order. r24/r25 are absent from the image; they are
/// supplied by the return-value injection the first time the task runs.
#[derive(IntoBytes, Immutable)]
#[repr(C)]
struct InitialStackFrame {
    /// r31 down to r26.
    callee_high: [u8; 6],
    /// r23 down to r2.
    gp: [u8; 22],
    /// r1. Compiled code relies on this register holding zero.
    zero_reg: u8,
    sreg: u8,
    /// r0, the compiler's scratch register.
    tmp_reg: u8,
    /// Entry address, most significant byte first. The PC counts words on
    /// this machine, as do function pointer values, so the bytes go onto the
    /// stack as they are.
    entry_pc: [u8; 3],
    /// Synthetic return address for the entry function: the reset vector,
    /// so an accidental return restarts the machine instead of wandering.
    guard_pc: [u8; 3],
}

/// Primes the stack of a not-yet-run task so that the very first context
/// restore enters `entry` with the CPU in a defined state. Returns the value
/// to store as the task's saved stack pointer.
pub fn prepare_task_stack(stack: &mut [u8], entry: TaskEntry) -> u16 {
    for byte in stack.iter_mut() {
        *byte = STACK_SENTINEL;
    }
    let frame_at = stack.len() - core::mem::size_of::<InitialStackFrame>();
    let entry_pc = entry as usize as u32;
    let frame = InitialStackFrame {
        callee_high: [0; 6],
        gp: [0; 22],
        zero_reg: 0,
        // I bit preset, arithmetic flags clear. The flag value barely
        // matters: every context switch re-enables global interrupts on the
        // way out regardless.
        sreg: 0x80,
        tmp_reg: 0,
        entry_pc: [
            (entry_pc >> 16) as u8,
            (entry_pc >> 8) as u8,
            entry_pc as u8,
        ],
        guard_pc: [0, 0, 0],
    };
    stack[frame_at..].copy_from_slice(frame.as_bytes());
    // The hardware stack pointer addresses the first *free* byte below the
    // top of stack; mirror that convention.
    (stack.as_ptr() as usize + frame_at - 1) as u16
}

/// Pushes the 16-bit resume cause onto a task's stack image so the restore
/// sequence pops it into r24/r25. Returns the adjusted stack pointer.
///
/// # Safety
///
/// `sp` must be the saved stack pointer of a task parked inside the wait
/// trampoline (or the live one of the immediate-return path), with at least
/// two free bytes below it.
pub unsafe fn push_resume_cause(sp: u16, cause: u16) -> u16 {
    unsafe {
        // Post-decrement store order, like the hardware: low byte lands in
        // the r24 slot, high byte in the r25 slot.
        core::ptr::write_volatile(sp as *mut u8, cause as u8);
        core::ptr::write_volatile((sp - 1) as *mut u8, (cause >> 8) as u8);
    }
    sp - 2
}

/// Masks all maskable interrupts (`cli`).
pub fn disable_interrupts() {
    avr_device::interrupt::disable();
}

/// Unmasks interrupts (`sei`).
///
/// # Safety
///
/// Must not be called where the kernel relies on an uninterrupted section,
/// i.e. anywhere inside a kernel entry.
pub unsafe fn enable_interrupts() {
    unsafe {
        avr_device::interrupt::enable();
    }
}

/// Runs `body` with interrupts globally masked, restoring the previous mask
/// state afterwards.
pub fn interrupt_free<R>(body: impl FnOnce() -> R) -> R {
    avr_device::interrupt::free(|_| body())
}

/// Default tick source setup: enables the TIMER2 overflow interrupt. The
/// Arduino runtime leaves timer 2 free-running in phase-correct PWM mode at
/// 16 MHz / 64 / 510, about 490 Hz or a 2 ms tick, so enabling the overflow
/// interrupt is all that is needed here. Applications with other plans
/// install their own hook at boot and leave this one unused.
pub fn default_enable_tick_interrupt() {
    const TIMSK2: *mut u8 = 0x70 as *mut u8;
    const TOIE2: u8 = 1 << 0;
    // Safety: read-modify-write of a device register; interrupt-safe because
    // this runs during boot, before the tick is live.
    unsafe {
        core::ptr::write_volatile(
            TIMSK2,
            core::ptr::read_volatile(TIMSK2) | TOIE2,
        );
    }
}

// The system tick ISR: TIMER2 overflow. The full context goes onto the
// interrupted task's stack; the zero register is cleared because the
// interrupted code may have had it dirty mid-multiply.
core::arch::global_asm!(concat!(
    ".global __vector_15\n",
    "__vector_15:\n",
    __perch_push_context_without_r24_r25!(),
    "push r24\n",
    "push r25\n",
    "clr r1\n",
    "in r24, 0x3d\n",
    "in r25, 0x3e\n",
    "call tick_entry\n",
    "out 0x3e, r25\n",
    "out 0x3d, r24\n",
    __perch_pop_context!(),
    "reti\n",
));

// Pseudo software interrupt behind `post_event`. Mask arrives in r24:r25
// per the avr ABI and is passed through; the stack pointer after the save
// becomes the second argument.
core::arch::global_asm!(concat!(
    ".global kern_post_event_trampoline\n",
    "kern_post_event_trampoline:\n",
    "cli\n",
    __perch_push_context_without_r24_r25!(),
    "push r24\n",
    "push r25\n",
    "in r22, 0x3d\n",
    "in r23, 0x3e\n",
    "call post_event_entry\n",
    "out 0x3e, r25\n",
    "out 0x3d, r24\n",
    __perch_pop_context!(),
    "reti\n",
));

// Pseudo software interrupt behind `wait_for_event`. This is the one entry
// that saves the context without r24/r25: the restore pops the resume cause
// in their place. Arguments per the avr ABI: mask r24:r25, all-flag r22,
// timeout r20:r21; the post-save stack pointer rides in r18:r19.
core::arch::global_asm!(concat!(
    ".global kern_wait_for_event_trampoline\n",
    "kern_wait_for_event_trampoline:\n",
    "cli\n",
    __perch_push_context_without_r24_r25!(),
    "in r18, 0x3d\n",
    "in r19, 0x3e\n",
    "call wait_entry\n",
    "out 0x3e, r25\n",
    "out 0x3d, r24\n",
    __perch_pop_context!(),
    "reti\n",
));

/// Rust side of the tick ISR, entered with interrupts disabled and the full
/// context of the interrupted task saved. Returns the stack pointer to
/// resume on.
#[no_mangle]
unsafe extern "C" fn tick_entry(sp: u16) -> u16 {
    // Safety: single entry into kernel state, interrupts globally disabled.
    unsafe {
        crate::startup::with_kernel(|k| {
            let prev = k.sched.current();
            k.tasks[prev].save_mut().set_stack_pointer(sp);
            let switched = crate::tick::on_tick(&mut k.sched, &mut k.tasks);
            finish_switch(k, switched, sp)
        })
    }
}

/// Rust side of the post trampoline and of every application interrupt.
#[no_mangle]
unsafe extern "C" fn post_event_entry(mask: u16, sp: u16) -> u16 {
    // Safety: single entry into kernel state, interrupts globally disabled.
    unsafe {
        crate::startup::with_kernel(|k| {
            let prev = k.sched.current();
            k.tasks[prev].save_mut().set_stack_pointer(sp);
            let switched = crate::events::post(
                &mut k.sched,
                &mut k.tasks,
                abi::EventSet::from_bits(mask),
            );
            finish_switch(k, switched, sp)
        })
    }
}

/// Rust side of the wait trampoline.
#[no_mangle]
unsafe extern "C" fn wait_entry(
    mask: u16,
    all: u8,
    timeout: u16,
    sp: u16,
) -> u16 {
    // Safety: single entry into kernel state, interrupts globally disabled.
    unsafe {
        crate::startup::with_kernel(|k| {
            let prev = k.sched.current();
            k.tasks[prev].save_mut().set_stack_pointer(sp);
            let suspended = crate::events::wait(
                &mut k.sched,
                &mut k.tasks,
                abi::EventSet::from_bits(mask),
                all != 0,
                timeout,
            );
            finish_switch(k, suspended, sp)
        })
    }
}

/// Common exit path of the kernel entries: pick the stack to resume on and,
/// if the task being resumed is parked inside `wait_for_event`, deposit its
/// resume cause where the restore sequence will pop it into r24/r25.
fn finish_switch(k: &mut Kernel, switched: bool, old_sp: u16) -> u16 {
    let next = &mut k.tasks[k.sched.current()];
    let sp = if switched {
        next.save().stack_pointer()
    } else {
        old_sp
    };
    if let Some(cause) = next.take_resume_cause() {
        // Safety: a nonzero resume cause marks a task sitting inside the
        // wait trampoline; its stack has room below the saved pointer.
        unsafe { push_resume_cause(sp, cause.bits()) }
    } else {
        sp
    }
}

/// Defines the interrupt service routine for one application interrupt.
///
/// `$vector` is the linker symbol of the vector, e.g. `"__vector_32"`, and
/// `$event` the broadcast event constant the interrupt posts (bit 13 for
/// application interrupt 0, bit 12 for interrupt 1). The expansion performs
/// the same context save as the tick ISR, loads the event constant as the
/// argument, and runs the shared post-event delivery path, so the semantics
/// are identical to a task calling `post_event` with that constant. The
/// application remains responsible for configuring the hardware to generate
/// the interrupt, via the boot hooks.
#[macro_export]
macro_rules! application_interrupt {
    ($vector:literal, $event:expr) => {
        ::core::arch::global_asm!(
            concat!(
                ".global ", $vector, "\n",
                $vector, ":\n",
                $crate::__perch_push_context_without_r24_r25!(),
                "push r24\n",
                "push r25\n",
                "clr r1\n",
                "ldi r24, {lo}\n",
                "ldi r25, {hi}\n",
                "in r22, 0x3d\n",
                "in r23, 0x3e\n",
                "call post_event_entry\n",
                "out 0x3e, r25\n",
                "out 0x3d, r24\n",
                $crate::__perch_pop_context!(),
                "reti\n",
            ),
            lo = const ($event).bits() as u8,
            hi = const (($event).bits() >> 8) as u8,
        );
    };
}
