//! # Kernel
//!
//! Owns the single global [`Scheduler`] instance and exposes the public
//! task-management API every application and every blocking primitive
//! builds on. All public functions here serialize access to the
//! scheduler through one critical section via [`with_scheduler`].
//!
//! ## Startup sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::scheduler_init()        ← back the heap, create idle task
//!         ├─► kernel::task_create() / task_create_static()  ← register tasks
//!         └─► kernel::scheduler_start(cp)     ← launch (never returns)
//!               ├─► configure SysTick
//!               ├─► set PendSV/SysTick priorities
//!               └─► start_first_task()
//! ```

use core::cell::UnsafeCell;

use crate::config::HEAP_SIZE_BYTES;
use crate::error::KernelResult;
use crate::global_alloc;
use crate::platform::{self, TaskEntry, Ticks, TickCount, TIMEOUT_FOREVER, TIMEOUT_TRY};
use crate::scheduler::Scheduler;
use crate::sync::critical_section;
use crate::task::TaskId;

/// Backing storage for the heap region handed to the global allocator
/// during `scheduler_init`. A plain byte array so no separate linker
/// section is required.
static HEAP_REGION: UnsafeCell<[u8; HEAP_SIZE_BYTES]> = UnsafeCell::new([0u8; HEAP_SIZE_BYTES]);

struct SchedulerCell(UnsafeCell<Scheduler>);

// Safety: every access to the inner `Scheduler` happens inside
// `with_scheduler`'s critical section, or from an ISR, where the
// processor serializes execution for us.
unsafe impl Sync for SchedulerCell {}

static SCHEDULER: SchedulerCell = SchedulerCell(UnsafeCell::new(Scheduler::new()));

/// Run `f` against the global scheduler inside one critical section.
/// Every kernel entry point, every primitive, and the arch-layer ISR
/// handlers all funnel through this one seam.
pub fn with_scheduler<F, R>(f: F) -> R
where
    F: FnOnce(&mut Scheduler) -> R,
{
    critical_section(|| {
        let scheduler = unsafe { &mut *SCHEDULER.0.get() };
        f(scheduler)
    })
}

/// Initialize the kernel. Backs the global heap with `HEAP_REGION`,
/// resets the scheduler, and creates the idle task.
///
/// Must be called exactly once, before any other kernel function.
///
/// # Safety
/// Must be called from the main thread before the scheduler starts and
/// before any interrupt that could touch the scheduler or the heap is
/// enabled.
pub unsafe fn scheduler_init() {
    global_alloc::init_global_heap(HEAP_REGION.get() as *mut u8, HEAP_SIZE_BYTES);
    with_scheduler(|s| {
        s.reset();
        s.init();
    });
}

/// Create a task with a heap-allocated stack.
pub fn task_create(
    entry: TaskEntry,
    arg: *mut u8,
    stack_size: usize,
    weight: u8,
) -> KernelResult<TaskId> {
    with_scheduler(|s| s.task_create(entry, arg, stack_size, weight))
}

/// Create a task over a caller-supplied static stack buffer; its memory
/// is never reclaimed by garbage collection.
pub fn task_create_static(
    entry: TaskEntry,
    arg: *mut u8,
    buf: *mut u8,
    size: usize,
    weight: u8,
) -> KernelResult<TaskId> {
    with_scheduler(|s| s.task_create_static(entry, arg, buf, size, weight))
}

/// Mark a task for deletion; its slot is reclaimed on the next garbage
/// collection pass.
pub fn task_delete(id: TaskId) -> KernelResult<()> {
    with_scheduler(|s| s.task_delete(id))
}

/// Delete the calling task and yield. Never returns.
pub fn task_exit() -> ! {
    with_scheduler(|s| s.task_exit());
    loop {
        platform::yield_cpu();
    }
}

/// Put the calling task to sleep for `n` ticks (`0` yields without
/// sleeping) and block until the scheduler actually switches away.
pub fn task_sleep_ticks(n: Ticks) {
    with_scheduler(|s| s.task_sleep_ticks(n));
    platform::yield_cpu();
}

/// The id of the currently running task.
pub fn task_get_current() -> TaskId {
    with_scheduler(|s| s.current())
}

/// ISR-safe: notify `id`, OR-ing `value` into its pending notification
/// word and waking it if it is blocked.
pub fn task_notify(id: TaskId, value: u32) -> KernelResult<()> {
    with_scheduler(|s| s.task_notify(id, value))
}

/// Block the calling task until it has a pending notification (or
/// `timeout` ticks elapse), then consume and return the notification
/// value. `clear` selects whether the whole word is zeroed on take or
/// only the consumed bits remain implicitly (the scheduler always
/// clears fully when `clear` is set; callers that want to examine
/// specific bits across multiple notifications should pass `false` and
/// manage their own clearing convention).
pub fn task_notify_wait(clear: bool, timeout: Ticks) -> KernelResult<u32> {
    if let Some(value) = with_scheduler(|s| s.try_take_notification(clear)) {
        return Ok(value);
    }
    if timeout == TIMEOUT_TRY {
        return Err(crate::error::KernelError::Timeout);
    }
    with_scheduler(|s| s.begin_notify_wait(timeout));
    loop {
        platform::yield_cpu();
        if let Some(value) = with_scheduler(|s| s.try_take_notification(clear)) {
            return Ok(value);
        }
        let id = task_get_current();
        let timed_out = with_scheduler(|s| s.is_ready(id)) && timeout != TIMEOUT_FOREVER;
        if timed_out {
            return Err(crate::error::KernelError::Timeout);
        }
    }
}

/// The scheduler's absolute tick count since `scheduler_start`.
pub fn tick_count() -> TickCount {
    with_scheduler(|s| s.tick_count())
}

/// Drive one scheduler tick outside of the real SysTick ISR (exposed
/// for host-side callers that step the clock manually). Returns `true`
/// if a context switch is now due.
pub fn scheduler_tick() -> bool {
    with_scheduler(|s| s.tick())
}

/// Configure SysTick, set interrupt priorities, and launch the first
/// task. **Does not return.**
///
/// # Safety
/// `scheduler_init()` must have already been called, and at least one
/// application task must exist (the idle task alone is enough to run,
/// but a kernel with nothing else to do is unlikely to be useful).
#[cfg(not(test))]
pub unsafe fn scheduler_start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    crate::arch::cortex_m4::configure_systick(&mut core_peripherals.SYST);
    crate::arch::cortex_m4::set_interrupt_priorities();

    let first_sp = with_scheduler(|s| {
        let first = s.start();
        s.tasks()[first as usize].stack_pointer
    });

    crate::arch::cortex_m4::start_first_task(first_sp as *const u32);
    loop {
        platform::cpu_idle();
    }
}
