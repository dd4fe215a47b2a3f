// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for recording kernel failures such that they can be found by
//! tooling.
//!
//! Every `uassert!` trip and every other kernel panic funnels into [`die`]
//! through the panic handler on bare-metal builds, so the configuration and
//! ownership errors the kernel diagnoses in debug builds (posting timer
//! bits, ill-formed wait masks, the idle task waiting, mutex double
//! release) all end up here, pinned on whoever held the CPU.
//!
//! This module defines the following binary interface to debuggers:
//!
//! - `kern::fail::KERNEL_HAS_FAILED` is a `bool`. It is zero (false) from
//!   reset, and set to one (true) when the kernel reaches [`die`]. Any
//!   other value means the kernel has either not yet booted, or corrupted
//!   memory on the way down.
//!
//! - `kern::fail::KERNEL_EPITAPH` is an array of `u8`, NUL padded. It
//!   opens with a tag naming the context that was running when the kernel
//!   failed (`t3: ` for task index 3, `idle: ` for the idle task, `boot: `
//!   before the first dispatch), followed by as much of the failure reason
//!   (as UTF-8) as fits.
//!
//! On a dead board, reading these two symbols over the debug port is the
//! difference between "it stopped" and knowing which task tripped which
//! assertion.

use core::fmt::{Display, Write};
use core::sync::atomic::{AtomicU8, Ordering};

use abi::TASK_COUNT;

/// Flag that gets set to `true` by all failure reporting functions, giving
/// tools a one-stop-shop for doing kernel triage.
#[used]
static mut KERNEL_HAS_FAILED: bool = false;

/// Sized with the target's few kilobytes of SRAM in mind; failure reasons
/// lose their tails beyond this.
const EPITAPH_LEN: usize = 64;

#[used]
static mut KERNEL_EPITAPH: [u8; EPITAPH_LEN] = [0; EPITAPH_LEN];

/// Value of `RUNNING_TASK` from reset until the scheduler first hands out
/// the CPU; one past the idle slot, so it collides with no real context.
const NEVER_DISPATCHED: u8 = TASK_COUNT as u8 + 1;

/// Table index of the context last handed the CPU. The scheduler publishes
/// every dispatch decision here, purely so a failure can name its task; the
/// kernel itself never reads it back.
static RUNNING_TASK: AtomicU8 = AtomicU8::new(NEVER_DISPATCHED);

/// Called by the scheduler whenever the running task changes.
pub(crate) fn note_dispatch(index: usize) {
    RUNNING_TASK.store(index as u8, Ordering::Relaxed);
}

/// Records `msg` as the kernel's last words, tagged with the running task,
/// and halts.
#[inline(always)]
pub fn die(msg: impl Display) -> ! {
    die_impl(&msg)
}

#[inline(never)]
fn die_impl(msg: &dyn Display) -> ! {
    // Claim the epitaph. A second arrival is a failure inside the failure
    // path; it must not write (the first report is the interesting one) and
    // must not panic (that would recurse), so it goes straight to the halt.
    //
    // Safety: this is the only accessor of the flag, interrupts stay masked
    // on the way down, and the exchange admits one writer per boot.
    let already_failed = unsafe {
        core::ptr::replace(core::ptr::addr_of_mut!(KERNEL_HAS_FAILED), true)
    };
    if !already_failed {
        // Safety: the flag above admits exactly one execution of this arm.
        let buf = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL_EPITAPH) };
        compose_epitaph(buf, RUNNING_TASK.load(Ordering::Relaxed), msg);
    }
    halt()
}

fn halt() -> ! {
    loop {
        // Keeps the empty loop from being optimized into anything clever.
        core::sync::atomic::fence(Ordering::SeqCst);
    }
}

/// Renders the context tag and the failure reason into `buf`, truncating
/// whatever does not fit.
fn compose_epitaph(
    buf: &mut [u8; EPITAPH_LEN],
    running: u8,
    msg: &dyn Display,
) {
    let mut pen = Pen { buf, at: 0 };
    if usize::from(running) == crate::sched::IDLE {
        write!(pen, "idle: ").ok();
    } else if running == NEVER_DISPATCHED {
        write!(pen, "boot: ").ok();
    } else {
        write!(pen, "t{running}: ").ok();
    }
    write!(pen, "{msg}").ok();
}

/// Cursor over the epitaph buffer. Bytes past the end fall on the floor
/// rather than erroring, so formatting never fails mid-message.
struct Pen<'a> {
    buf: &'a mut [u8; EPITAPH_LEN],
    at: usize,
}

impl Write for Pen<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for &byte in s.as_bytes() {
            if self.at == EPITAPH_LEN {
                break;
            }
            self.buf[self.at] = byte;
            self.at += 1;
        }
        Ok(())
    }
}

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
    die(info)
}
