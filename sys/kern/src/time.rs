// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wrap-aware kernel time arithmetic.
//!
//! The system time is a cyclic counter of tick interrupts. Nothing in the
//! kernel may compare tick values with a naive `<`; the only meaningful
//! question is whether a point in time lies in the leading or trailing half
//! of the cycle relative to now, which is what the signed-difference test
//! below computes. The practical consequence for applications is that any
//! deadline more than half the timer range away is indistinguishable from
//! one in the past.

use abi::{Ticks, TicksDelta};

/// Checks whether `due` is at or behind `now` on the cyclic timeline, i.e.
/// not in the future. This is the overrun test: a freshly advanced due time
/// that lands here was missed.
pub fn is_due_or_past(due: Ticks, now: Ticks) -> bool {
    due.wrapping_sub(now) as TicksDelta <= 0
}
