//! # cadence
//!
//! A small preemptive real-time kernel for single-core Cortex-M4 targets.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application tasks                     │
//! ├────────────────────────────────────────────────────────┤
//! │                  Kernel API (kernel.rs)                  │
//! │   scheduler_init/start · task_create/delete/sleep/notify │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │  Sync primitives   │  Allocator         │
//! │  scheduler.rs│  mutex/semaphore/  │  allocator.rs      │
//! │  ─ tick()    │  queue/event_group │  mempool.rs        │
//! │  ─ schedule()│  ─ wait_queue.rs   │  global_alloc.rs   │
//! │              │  ─ timer.rs        │                    │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │              Task model (task.rs)                        │
//! │      TaskRecord · TaskState · wait-node                  │
//! ├────────────────────────────────────────────────────────┤
//! │            Arch port (arch/cortex_m4.rs)                 │
//! │    PendSV · SysTick · context switch · stack init         │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M4 hardware (Thumb-2)                 │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling model
//!
//! Weighted round-robin: every Ready task carries a weight (one of the
//! `WEIGHT_LOW/NORMAL/HIGH` presets, or any custom `1..=255` value), and
//! the weight sets the length, in ticks, of the time slice it runs for
//! once chosen. Selection scans the Ready set in a circle from the last
//! choice, always picking the highest weight present; equal-weight tasks
//! rotate fairly across repeated selections because the scan resumes
//! just past wherever it last stopped.
//!
//! Priority inheritance: a task blocked on a mutex temporarily boosts the
//! holder's weight to its own if that is higher, and the boost chains
//! through a handoff to whichever waiter is left with the highest
//! request. The boost is undone on unlock, restoring the holder's own
//! base weight.
//!
//! ## Memory model
//!
//! Task stacks, queue buffers, and timer/event-group bookkeeping are
//! heap-allocated from one fixed-size region via a segregated-free-list
//! allocator (`allocator::Heap`), registered as the `#[global_allocator]`
//! in production builds. A task may instead be created over a
//! caller-supplied static buffer, bypassing the heap entirely.
//!
//! ## Host testability
//!
//! The crate links `std` only under `cfg(test)` (`#![cfg_attr(not(test),
//! no_std)]`). The five primitives the kernel needs from the outside
//! world — tick source, yield, idle, stack-frame init, and interrupt
//! masking — are collected into one small indirection table
//! ([`platform::PlatformOps`]); production installs the Cortex-M4 port,
//! the host test harness ([`test_support`]) installs a fake table before
//! each test. Most unit tests drive the scheduler's pure, single-shot
//! methods directly against a locally constructed [`scheduler::Scheduler`]
//! rather than going through the global singleton at all.

#![cfg_attr(not(test), no_std)]

pub mod allocator;
pub mod arch;
pub mod config;
pub mod error;
pub mod event_group;
pub mod global_alloc;
pub mod kernel;
pub mod mempool;
pub mod mutex;
pub mod platform;
pub mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod sync;
pub mod task;
pub mod timer;
pub mod wait_queue;

#[cfg(test)]
pub mod test_support;
