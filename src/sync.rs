//! # Critical sections
//!
//! Interrupt-masking critical section built on the [`crate::platform`]
//! indirection table (`irq_lock` -> critical section -> `irq_unlock`)
//! rather than calling `cortex_m::interrupt::free` directly, so the same
//! code path runs against the host test harness's fake platform table.
//! Shared by the scheduler, every primitive's wait list, and the
//! allocator.
//!
//! Keep critical sections short: this is the one lock in the whole kernel,
//! and it is held by ISRs too.

use crate::platform;

/// Execute a closure with interrupts masked, restoring the prior mask state
/// on exit (including on panic unwind, which does not occur in practice
/// since `panic = "abort"` in this kernel's release profile).
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let prior = platform::irq_lock();
    let result = f();
    platform::irq_unlock(prior);
    result
}
