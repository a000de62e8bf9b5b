//! # Cortex-M4 port
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! context switching via PendSV, SysTick timer configuration, interrupt
//! masking, and stack-frame construction. Everything here implements one
//! entry of [`crate::platform::PlatformOps`]; production wires this port
//! in once via `DEFAULT_OPS`, the host test harness swaps in
//! [`crate::test_support::FAKE_OPS`] instead.
//!
//! ## Context switch mechanism
//!
//! The Cortex-M4 uses a split-stack model: MSP (Main Stack Pointer) for
//! the kernel and interrupt handlers, PSP (Process Stack Pointer) for
//! tasks in Thread mode. On exception entry, the hardware automatically
//! stacks R0-R3, R12, LR, PC, and xPSR onto the process stack; the
//! PendSV handler manually saves and restores R4-R11, completing the
//! full context save/restore.
//!
//! PendSV and SysTick both run at the lowest interrupt priority so a
//! context switch never preempts an application ISR.

use core::arch::asm;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::register::primask;

use crate::config::{SYSTEM_CLOCK_HZ, SYSTICK_FREQ_HZ};
use crate::platform::{PlatformOps, TaskEntry, TickCount};
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick, at `SYSTICK_FREQ_HZ`.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / SYSTICK_FREQ_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority (0xFF on a
/// 4-priority-bit implementation) so neither preempts an application ISR.
pub fn set_interrupt_priorities() {
    unsafe {
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        core::ptr::write_volatile(shpr3, val | (0xFF << 16) | (0xFF << 24));
    }
}

#[inline]
fn trigger_pendsv() {
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

// ---------------------------------------------------------------------------
// PlatformOps implementation
// ---------------------------------------------------------------------------

fn tick_count() -> TickCount {
    crate::kernel::with_scheduler(|s| s.tick_count())
}

fn yield_cpu() {
    trigger_pendsv();
}

fn cpu_idle() {
    cortex_m::asm::wfi();
}

/// Build the initial stack frame for a new task. Lays out the hardware
/// frame (R0-R3, R12, LR, PC, xPSR) PendSV expects to pop on first entry,
/// preceded by a zeroed software frame (R4-R11) so the very first PendSV
/// restore is indistinguishable from a normal one. `arg` goes into R0 so
/// `entry` sees it as its first parameter; `LR` is set to `exit_handler`
/// so a (disallowed, but defended against) normal return from `entry`
/// lands in the kernel's teardown path instead of running off the stack.
fn initialize_stack_frame(
    stack_top: *mut u8,
    entry: TaskEntry,
    arg: *mut u8,
    exit_handler: TaskEntry,
) -> *mut u32 {
    unsafe {
        let mut sp = (stack_top as usize & !0x7) as *mut u32;

        // Hardware-stacked frame, pushed high-to-low: xPSR, PC, LR, R12, R3-R0.
        sp = sp.offset(-1);
        core::ptr::write(sp, 0x0100_0000); // xPSR: Thumb bit set
        sp = sp.offset(-1);
        core::ptr::write(sp, entry as usize as u32); // PC
        sp = sp.offset(-1);
        core::ptr::write(sp, exit_handler as usize as u32); // LR
        sp = sp.offset(-1);
        core::ptr::write(sp, 0); // R12
        sp = sp.offset(-1);
        core::ptr::write(sp, 0); // R3
        sp = sp.offset(-1);
        core::ptr::write(sp, 0); // R2
        sp = sp.offset(-1);
        core::ptr::write(sp, 0); // R1
        sp = sp.offset(-1);
        core::ptr::write(sp, arg as usize as u32); // R0

        // Software-saved frame: R11-R4, popped by PendSV in ascending order.
        for _ in 0..8 {
            sp = sp.offset(-1);
            core::ptr::write(sp, 0);
        }

        sp
    }
}

fn irq_lock() -> u32 {
    let was_active = primask::read().is_active();
    cortex_m::interrupt::disable();
    was_active as u32
}

fn irq_unlock(prior: u32) {
    if prior != 0 {
        unsafe { cortex_m::interrupt::enable() };
    }
}

fn port_panic() -> ! {
    panic!("kernel panic: stack or allocator corruption detected");
}

fn notify_ready(_id: TaskId) {
    trigger_pendsv();
}

pub const DEFAULT_OPS: PlatformOps = PlatformOps {
    tick_count,
    yield_cpu,
    cpu_idle,
    initialize_stack_frame,
    irq_lock,
    irq_unlock,
    panic: port_panic,
    notify_ready,
};

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch to PSP and branch into the first task. Called once from
/// `kernel::scheduler_start`; never returns.
///
/// # Safety
/// Must only be called once, with a valid stack pointer produced by
/// `initialize_stack_frame`.
pub unsafe fn start_first_task(psp: *const u32) {
    asm!(
        "adds r0, #32",        // skip the 8 software-saved registers
        "msr psp, r0",
        "movs r0, #2",         // CONTROL.SPSEL = 1 (use PSP in Thread mode)
        "msr control, r0",
        "isb",
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR, discarded
        "pop {{r5}}",          // PC: task entry point
        "pop {{r6}}",          // xPSR, discarded (processor sets it)
        "cpsie i",
        "bx r5",
        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler: performs the actual context switch.
///
/// # Safety
/// Naked function invoked directly by the NVIC; must follow the exact
/// Cortex-M4 exception entry/exit convention.
#[no_mangle]
#[naked]
pub unsafe extern "C" fn PendSV() {
    asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {save_context}",
        "bl {do_schedule}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        save_context = sym save_current_context,
        do_schedule = sym do_context_switch,
        options(noreturn)
    );
}

/// Save the outgoing task's stack pointer. Called from PendSV.
///
/// # Safety
/// Invoked from assembly context with interrupts masked.
#[no_mangle]
unsafe extern "C" fn save_current_context(psp: *mut u32) {
    crate::kernel::with_scheduler(|s| {
        let current = s.current();
        s.tasks_mut()[current as usize].stack_pointer = psp;
    });
}

/// Run the scheduling decision and return the incoming task's stack
/// pointer. Called from PendSV.
///
/// # Safety
/// Invoked from assembly context.
#[no_mangle]
unsafe extern "C" fn do_context_switch() -> *mut u32 {
    crate::kernel::with_scheduler(|s| {
        let next = s.schedule_next_task();
        s.tasks()[next as usize].stack_pointer
    })
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler: the scheduler tick entry point.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    let needs_reschedule = crate::kernel::with_scheduler(|s| s.tick());
    if needs_reschedule {
        trigger_pendsv();
    }
}
