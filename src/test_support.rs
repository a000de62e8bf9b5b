//! # Host test harness
//!
//! Everything here is `#[cfg(test)]` only. It reinstalls the platform
//! indirection table with a fake, host-runnable implementation and
//! serializes tests so the crate's singleton kernel state (see
//! [`crate::kernel`]) doesn't race across Rust's parallel test runner —
//! the same "small indirection table" the design notes call for.

extern crate std;

use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::platform::{PlatformOps, TaskEntry};

fn test_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Acquire the process-wide test serialization lock and install the fake
/// platform table. Hold the returned guard for the duration of the test.
pub fn lock() -> MutexGuard<'static, ()> {
    let guard = test_lock().lock().unwrap_or_else(|e| e.into_inner());
    unsafe {
        crate::platform::install(FAKE_OPS);
    }
    guard
}

fn fake_tick_count() -> crate::platform::TickCount {
    0
}

fn fake_yield() {}

fn fake_cpu_idle() {}

/// Builds a plausible descending stack pointer without actually encoding
/// a real hardware frame; no test in this crate context-switches into a
/// task for real, so only the address arithmetic needs to be sound.
fn fake_initialize_stack_frame(
    stack_top: *mut u8,
    _entry: TaskEntry,
    _arg: *mut u8,
    _exit_handler: TaskEntry,
) -> *mut u32 {
    unsafe { (stack_top as *mut u32).offset(-8) }
}

fn fake_irq_lock() -> u32 {
    0
}

fn fake_irq_unlock(_prior: u32) {}

fn fake_panic() -> ! {
    panic!("kernel panic: stack or allocator corruption detected");
}

fn fake_notify_ready(_id: crate::task::TaskId) {}

pub const FAKE_OPS: PlatformOps = PlatformOps {
    tick_count: fake_tick_count,
    yield_cpu: fake_yield,
    cpu_idle: fake_cpu_idle,
    initialize_stack_frame: fake_initialize_stack_frame,
    irq_lock: fake_irq_lock,
    irq_unlock: fake_irq_unlock,
    panic: fake_panic,
    notify_ready: fake_notify_ready,
};
