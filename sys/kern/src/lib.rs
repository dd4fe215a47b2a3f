// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Perch kernel.
//!
//! This is a small preemptive real-time kernel for single-core 8-bit
//! microcontrollers. Tasks are fixed at start, synchronize through a 16-bit
//! event vector (broadcast events, counting semaphores, binary mutexes, and
//! two per-task timers), and are scheduled by priority class with optional
//! round-robin time slicing within a class.
//!
//! The code outside the `arch` module is portable; it is developed and
//! tested on the host against the `arch::fake` stand-in and deployed on AVR
//! (ATmega2560).
//!
//! # Design principles
//!
//! 1. Static configuration. The system takes a single shape specified at
//!    compile time, in the `abi` crate; there is no allocator and no dynamic
//!    task creation.
//! 2. A strong preference for safe code where reasonable. The unavoidable
//!    `unsafe` lives at the edges: the context-switch assembly and the
//!    single kernel-state global.
//! 3. A preference for simple and clear algorithms over fast and clever
//!    algorithms. Lists are small arrays that shift; scans are linear.
//!
//! # Error policy
//!
//! The API reports no runtime errors. Configuration errors (posting timer
//! bits, ill-formed wait masks, the idle task waiting) and ownership errors
//! (double-granting or double-releasing a mutex) are programming errors,
//! caught by `uassert!` in debug builds and compiled away in release builds;
//! the kernel trusts its callers there. The overrun counter saturates
//! silently; semaphore overflow on produce is debug-asserted.

#![cfg_attr(target_os = "none", no_std)]

#[macro_use]
pub mod arch;

pub mod events;
pub mod fail;
pub mod sched;
pub mod startup;
pub mod syscalls;
pub mod task;
pub mod tick;
pub mod time;

#[cfg(test)]
mod tests;
