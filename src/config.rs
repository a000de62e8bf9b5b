//! # Kernel configuration
//!
//! Compile-time constants governing the scheduler and system behavior.
//! All limits are fixed at compile time — no dynamic reconfiguration.

/// Maximum number of tasks the system can manage simultaneously, including
/// the idle task at slot 0. Bounds the static task table.
pub const MAX_TASKS: usize = 16;

/// SysTick frequency in Hz. Determines scheduler tick granularity.
pub const SYSTICK_FREQ_HZ: u32 = 1000;

/// Magic word written at both ends of every task stack. A mismatch on
/// audit means the stack has overflowed or underflowed.
pub const STACK_CANARY: u32 = 0xDEAD_BEEF;

/// Ticks between idle-task garbage-collection / stack-canary sweeps.
pub const GARBAGE_COLLECTION_TICKS: u32 = 100;

/// Smallest stack a dynamically created task may request.
pub const STACK_MIN_SIZE_BYTES: usize = 256;

/// Largest stack a dynamically created task may request.
pub const STACK_MAX_SIZE_BYTES: usize = 8192;

/// Low scheduling weight preset.
pub const WEIGHT_LOW: u8 = 1;
/// Normal (default) scheduling weight preset.
pub const WEIGHT_NORMAL: u8 = 4;
/// High scheduling weight preset.
pub const WEIGHT_HIGH: u8 = 8;

/// Maximum number of concurrently registered software timers.
pub const MAX_TIMERS: usize = 16;

/// Size in bytes of the single contiguous heap region the allocator
/// manages. Supplies task stacks, queue buffers, timer nodes, and
/// event-group bookkeeping.
pub const HEAP_SIZE_BYTES: usize = 64 * 1024;

/// Stack size, in bytes, of the idle task created by `scheduler_init`.
pub const IDLE_STACK_SIZE_BYTES: usize = 512;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
/// Consumed only by the Cortex-M4 port to program SysTick's reload value.
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// All 32 bits of an event group, for callers that want to `wait_bits`
/// on "anything at all" or clear the whole word in one call.
pub const EVENT_GROUP_ALL_BITS: u32 = u32::MAX;
