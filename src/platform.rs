//! # Platform contract
//!
//! The five primitives the kernel consumes from the outside world, plus a
//! `panic()` sink, collected into a small indirection table (`PlatformOps`)
//! instead of scattering raw `extern "C"` symbols through the scheduler.
//! Production installs the Cortex-M4 implementations once, during
//! [`crate::kernel::init`]; the host test harness reinstalls a fake table
//! before each test (see [`crate::test_support`]) — this is the "small
//! indirection table" the design notes call for so tests can reinitialize
//! without real hardware.
//!
//! Device drivers, the tick source's own interrupt wiring, and the actual
//! context-switch assembly live in [`crate::arch`]; this module only
//! defines the seam.

use crate::task::TaskId;

/// A task entry function: `fn(arg)`, never returning.
pub type TaskEntry = extern "C" fn(arg: *mut u8) -> !;

/// Ticks, used for durations/timeouts (`task_sleep_ticks`, primitive
/// timeouts). A 32-bit count is plenty for any single wait.
pub type Ticks = u32;

/// Absolute tick count since `scheduler_start()`.
pub type TickCount = u64;

/// Sentinel meaning "wait forever".
pub const TIMEOUT_FOREVER: Ticks = u32::MAX;

/// Sentinel meaning "non-blocking try — do not enqueue the caller".
pub const TIMEOUT_TRY: Ticks = 0;

type TickCountFn = fn() -> TickCount;
type YieldFn = fn();
type CpuIdleFn = fn();
type InitStackFrameFn =
    fn(stack_top: *mut u8, entry: TaskEntry, arg: *mut u8, exit_handler: TaskEntry) -> *mut u32;
type IrqLockFn = fn() -> u32;
type IrqUnlockFn = fn(u32);
type PanicFn = fn() -> !;
type NotifyIdFn = fn(TaskId);

/// The platform indirection table. All fields are plain function pointers
/// so the whole table is `Copy` and const-constructible.
#[derive(Clone, Copy)]
pub struct PlatformOps {
    pub tick_count: TickCountFn,
    pub yield_cpu: YieldFn,
    pub cpu_idle: CpuIdleFn,
    pub initialize_stack_frame: InitStackFrameFn,
    pub irq_lock: IrqLockFn,
    pub irq_unlock: IrqUnlockFn,
    pub panic: PanicFn,
    /// Request that the platform trigger a reschedule for a specific task
    /// that has just been made Ready from ISR context (e.g. after
    /// `task_notify`). On Cortex-M4 this just pends a PendSV; the task id
    /// is informational only and may be ignored.
    pub notify_ready: NotifyIdFn,
}

#[cfg(not(test))]
static mut PLATFORM: PlatformOps = crate::arch::cortex_m4::DEFAULT_OPS;

/// Host builds never reach hardware, so there is no `cortex_m4` module to
/// default to; [`crate::test_support::lock`] overwrites this before every
/// test anyway.
#[cfg(test)]
static mut PLATFORM: PlatformOps = crate::test_support::FAKE_OPS;

/// Replace the installed platform table.
///
/// # Safety
/// Must not be called while any task or ISR may be concurrently reading
/// the table (i.e. only from `scheduler_init`-time setup or a quiesced
/// test harness).
pub unsafe fn install(ops: PlatformOps) {
    PLATFORM = ops;
}

#[inline]
pub fn tick_count() -> TickCount {
    unsafe { (PLATFORM.tick_count)() }
}

#[inline]
pub fn yield_cpu() {
    unsafe { (PLATFORM.yield_cpu)() }
}

#[inline]
pub fn cpu_idle() {
    unsafe { (PLATFORM.cpu_idle)() }
}

#[inline]
pub fn initialize_stack_frame(
    stack_top: *mut u8,
    entry: TaskEntry,
    arg: *mut u8,
    exit_handler: TaskEntry,
) -> *mut u32 {
    unsafe { (PLATFORM.initialize_stack_frame)(stack_top, entry, arg, exit_handler) }
}

#[inline]
pub fn irq_lock() -> u32 {
    unsafe { (PLATFORM.irq_lock)() }
}

#[inline]
pub fn irq_unlock(prior: u32) {
    unsafe { (PLATFORM.irq_unlock)(prior) }
}

#[inline]
pub fn panic() -> ! {
    unsafe { (PLATFORM.panic)() }
}

#[inline]
pub fn notify_ready(id: TaskId) {
    unsafe { (PLATFORM.notify_ready)(id) }
}
