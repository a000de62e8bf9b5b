//! # Task record
//!
//! Defines the per-task control block and its state machine. Every
//! blocking primitive ultimately manipulates these fields; the record
//! itself never reaches into a primitive — the relationship is strictly
//! one-directional: a primitive owns a wait list of task ids, a task owns
//! one embedded wait-list link it is spliced into at a time.
//!
//! ```text
//!   ┌──────────┐  schedule_next_task()  ┌─────────┐
//!   │  Ready   │ ──────────────────────►│ Running │
//!   └──────────┘                        └─────────┘
//!        ▲                                   │
//!        │          preempt / yield          │
//!        └───────────────────────────────────┘
//!        │                                   │
//!        │ wake (signal / timeout)   block on primitive / sleep
//!        │                                   ▼
//!   ┌──────────┐                       ┌───────────┐
//!   │ Sleeping │ ◄──────────────────── │  Blocked  │
//!   └──────────┘    (timeout given)    └───────────┘
//!        │                                   │
//!        └────────────  task exits  ─────────┘
//!                            │
//!                            ▼
//!                       ┌─────────┐
//!                       │ Zombie  │ (reclaimed by garbage_collect)
//!                       └─────────┘
//! ```

use crate::config::STACK_CANARY;

/// Stable index into the task table. Slot 0 is always the idle task.
pub type TaskId = u16;

/// Sentinel id meaning "no task", used where a plain field is more
/// convenient than threading `Option<TaskId>` through FFI-ish boundaries.
pub const NO_TASK: TaskId = TaskId::MAX;

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is not allocated to any task.
    Unused,
    /// Runnable, waiting in the ready set.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting on a primitive's wait list, no timeout in effect.
    Blocked,
    /// Waiting with a finite wake-up tick: a timed block, or a plain
    /// `task_sleep_ticks`.
    Sleeping,
    /// Exited or deleted; resources not yet reclaimed.
    Zombie,
}

/// Flags a waiter on an event group carries in its task record.
pub mod wait_flags {
    /// Wake only when *all* of the waited bits are set (default: any).
    pub const WAIT_ALL: u8 = 1 << 0;
    /// Clear the consumed bits from the group before the next waiter is
    /// considered, turning broadcast semantics into consume semantics.
    pub const CLEAR_ON_EXIT: u8 = 1 << 1;
}

/// The embedded intrusive link used to splice a task into at most one
/// primitive's FIFO wait list at a time.
#[derive(Debug, Clone, Copy)]
pub struct WaitNode {
    pub task_ref: Option<TaskId>,
    pub next: Option<TaskId>,
}

impl WaitNode {
    pub const fn detached() -> Self {
        Self {
            task_ref: None,
            next: None,
        }
    }
}

/// The Task Control Block. `Copy` because every field is a plain value or
/// a raw pointer into memory the task itself owns (unless
/// `stack_is_static` says a caller supplied the buffer, in which case it
/// is not freed on deletion).
#[derive(Debug, Clone, Copy)]
pub struct TaskRecord {
    pub id: TaskId,
    pub state: TaskState,

    /// Saved stack pointer. Updated by the arch port on every context
    /// switch out.
    pub stack_pointer: *mut u32,
    /// Base (lowest address) of the stack region.
    pub stack_base: *mut u8,
    pub stack_size: usize,
    pub stack_is_static: bool,

    /// Current scheduling weight, possibly boosted above `base_weight` by
    /// mutex priority inheritance.
    pub weight: u8,
    /// Weight to restore once priority inheritance no longer applies.
    pub base_weight: u8,
    /// Ticks remaining in the current time slice.
    pub ticks_remaining: u32,
    /// Absolute tick at which a Sleeping task becomes Ready. Meaningless
    /// otherwise.
    pub wake_up_tick: u64,

    pub notify_value: u32,
    pub notify_pending: bool,

    /// Bits this task is waiting for. Valid only while blocked in an
    /// event group wait.
    pub wait_bits: u32,
    pub wait_flags: u8,

    pub wait_node: WaitNode,

    /// Total ticks this task has spent Running, lifetime.
    pub cpu_ticks_total: u64,
}

impl TaskRecord {
    /// An empty, Unused slot. Used to initialize the static task table.
    pub const fn empty() -> Self {
        Self {
            id: 0,
            state: TaskState::Unused,
            stack_pointer: core::ptr::null_mut(),
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            stack_is_static: false,
            weight: crate::config::WEIGHT_NORMAL,
            base_weight: crate::config::WEIGHT_NORMAL,
            ticks_remaining: 0,
            wake_up_tick: 0,
            notify_value: 0,
            notify_pending: false,
            wait_bits: 0,
            wait_flags: 0,
            wait_node: WaitNode::detached(),
            cpu_ticks_total: 0,
        }
    }

    /// Bring a freshly allocated slot to life as a Ready task.
    pub fn init(
        &mut self,
        id: TaskId,
        stack_base: *mut u8,
        stack_size: usize,
        stack_is_static: bool,
        weight: u8,
    ) {
        self.id = id;
        self.state = TaskState::Ready;
        self.stack_pointer = core::ptr::null_mut();
        self.stack_base = stack_base;
        self.stack_size = stack_size;
        self.stack_is_static = stack_is_static;
        self.weight = weight;
        self.base_weight = weight;
        self.ticks_remaining = weight as u32;
        self.wake_up_tick = 0;
        self.notify_value = 0;
        self.notify_pending = false;
        self.wait_bits = 0;
        self.wait_flags = 0;
        self.wait_node = WaitNode {
            task_ref: Some(id),
            next: None,
        };
        self.cpu_ticks_total = 0;
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Ready
    }

    /// Detach this task's wait node. Callers must already have unlinked it
    /// from the owning primitive's FIFO (or this is the lazy-skip path on
    /// an already torn-down task, where there is nothing to unlink).
    pub fn detach_wait_node(&mut self) {
        self.wait_node.next = None;
    }

    /// Restore `weight` to `base_weight`, undoing any priority-inheritance
    /// boost.
    pub fn clear_inherited_weight(&mut self) {
        self.weight = self.base_weight;
    }

    /// Low-address canary word. The stack grows down from
    /// `stack_base + stack_size`, so the low canary sits just above
    /// `stack_base`.
    fn canary_low_ptr(&self) -> *mut u32 {
        self.stack_base as *mut u32
    }

    /// High-address canary word, at the very top of the stack region.
    fn canary_high_ptr(&self) -> *mut u32 {
        unsafe { (self.stack_base.add(self.stack_size) as *mut u32).offset(-1) }
    }

    /// Write both canary words. Called once, at stack initialization.
    pub fn write_canaries(&self) {
        if self.stack_base.is_null() || self.stack_size < core::mem::size_of::<u32>() * 2 {
            return;
        }
        unsafe {
            core::ptr::write_volatile(self.canary_low_ptr(), STACK_CANARY);
            core::ptr::write_volatile(self.canary_high_ptr(), STACK_CANARY);
        }
    }

    /// Returns `true` if both canary words still match `STACK_CANARY`.
    pub fn canaries_intact(&self) -> bool {
        if self.stack_base.is_null() || self.stack_size < core::mem::size_of::<u32>() * 2 {
            return true;
        }
        unsafe {
            core::ptr::read_volatile(self.canary_low_ptr()) == STACK_CANARY
                && core::ptr::read_volatile(self.canary_high_ptr()) == STACK_CANARY
        }
    }
}

// Safety: the raw pointers in a TaskRecord always reference either this
// task's own stack memory or a caller-supplied static buffer; all access
// happens under the kernel's single interrupt-masking critical section.
unsafe impl Send for TaskRecord {}
unsafe impl Sync for TaskRecord {}
