//! # Scheduler core
//!
//! Owns the task table, the "current task" reference, and the tick-driven
//! state machine: weighted round-robin selection, sleep-list wakeup, and
//! the generic block/wake protocol every blocking primitive builds on.
//!
//! This module intentionally exposes pure, single-shot methods
//! (`tick`, `schedule_next_task`, `block_current`, `wake_one`, ...)
//! rather than looping primitives that call `platform::yield_cpu()`
//! themselves. The production retry loops live in [`crate::kernel`] and
//! the primitive modules; this separation is what lets tests drive the
//! state machine deterministically against a locally constructed
//! `Scheduler` without simulating real preemption.

extern crate alloc;

use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;

use crate::config::{
    GARBAGE_COLLECTION_TICKS, IDLE_STACK_SIZE_BYTES, MAX_TASKS, STACK_MAX_SIZE_BYTES,
    STACK_MIN_SIZE_BYTES,
};
use crate::error::{KernelError, KernelResult};
use crate::platform::{self, TaskEntry, Ticks, TIMEOUT_FOREVER, TIMEOUT_TRY};
use crate::task::{TaskId, TaskRecord, TaskState};
use crate::wait_queue::WaitList;

/// The idle task always lives in slot 0.
pub const IDLE_TASK_ID: TaskId = 0;

pub struct Scheduler {
    tasks: [TaskRecord; MAX_TASKS],
    current: TaskId,
    tick_count: u64,
    needs_reschedule: bool,
    /// Last task chosen by `schedule_next_task`; the next selection scan
    /// starts just after it, which is what turns equal-weight ties into
    /// round-robin rotation.
    select_cursor: TaskId,
    gc_ticks: u32,
    idle_stack: [u8; IDLE_STACK_SIZE_BYTES],
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskRecord::empty(); MAX_TASKS],
            current: IDLE_TASK_ID,
            tick_count: 0,
            needs_reschedule: false,
            select_cursor: IDLE_TASK_ID,
            gc_ticks: 0,
            idle_stack: [0u8; IDLE_STACK_SIZE_BYTES],
        }
    }

    /// Reset to the freshly constructed state. Used by the host test
    /// harness between tests; production calls `new()` once.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    // -- Initialization ----------------------------------------------

    /// Create the idle task in slot 0. After this call exactly one task
    /// exists: idle, weight 1, Ready.
    pub fn init(&mut self) {
        let stack_ptr = self.idle_stack.as_mut_ptr();
        let stack_size = self.idle_stack.len();
        let sp = platform::initialize_stack_frame(
            unsafe { stack_ptr.add(stack_size) },
            idle_task_entry,
            core::ptr::null_mut(),
            task_exit_trampoline,
        );
        self.tasks[IDLE_TASK_ID as usize].init(IDLE_TASK_ID, stack_ptr, stack_size, true, 1);
        self.tasks[IDLE_TASK_ID as usize].write_canaries();
        self.tasks[IDLE_TASK_ID as usize].stack_pointer = sp;
        self.current = IDLE_TASK_ID;
        self.tick_count = 0;
        self.needs_reschedule = false;
        self.gc_ticks = 0;
    }

    /// Choose the first task to run. The platform port is responsible for
    /// actually transferring control to it (`kernel::scheduler_start`
    /// does that and never returns); this call only picks the id.
    pub fn start(&mut self) -> TaskId {
        self.schedule_next_task()
    }

    // -- Accessors -----------------------------------------------------

    #[inline]
    pub fn current(&self) -> TaskId {
        self.current
    }

    #[inline]
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tasks(&self) -> &[TaskRecord] {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut [TaskRecord] {
        &mut self.tasks
    }

    pub fn task(&self, id: TaskId) -> Option<&TaskRecord> {
        self.tasks.get(id as usize)
    }

    /// Force the "current" reference without a real context switch.
    /// Exists purely so primitive tests can script "which task calls in
    /// next" sequences (e.g. the priority-inheritance chain scenario)
    /// against pure state-transition methods.
    #[cfg(test)]
    pub fn set_current_for_test(&mut self, id: TaskId) {
        self.current = id;
    }

    fn validate_id(&self, id: TaskId) -> KernelResult<()> {
        if (id as usize) >= MAX_TASKS || self.tasks[id as usize].state == TaskState::Unused {
            Err(KernelError::InvalidArgument)
        } else {
            Ok(())
        }
    }

    // -- Task lifecycle --------------------------------------------------

    fn find_free_slot(&self) -> Option<TaskId> {
        self.tasks
            .iter()
            .position(|t| t.state == TaskState::Unused)
            .map(|i| i as TaskId)
    }

    /// Common setup once a slot and a stack region are in hand.
    fn install_task(
        &mut self,
        id: TaskId,
        entry: TaskEntry,
        arg: *mut u8,
        stack_base: *mut u8,
        stack_size: usize,
        stack_is_static: bool,
        weight: u8,
    ) {
        let sp = platform::initialize_stack_frame(
            unsafe { stack_base.add(stack_size) },
            entry,
            arg,
            task_exit_trampoline,
        );
        self.tasks[id as usize].init(id, stack_base, stack_size, stack_is_static, weight);
        self.tasks[id as usize].write_canaries();
        self.tasks[id as usize].stack_pointer = sp;
    }

    /// Allocate a slot and a heap stack, and prepare the task to run.
    pub fn task_create(
        &mut self,
        entry: TaskEntry,
        arg: *mut u8,
        stack_size: usize,
        weight: u8,
    ) -> KernelResult<TaskId> {
        if weight == 0 || !(STACK_MIN_SIZE_BYTES..=STACK_MAX_SIZE_BYTES).contains(&stack_size) {
            return Err(KernelError::InvalidArgument);
        }
        let id = self.find_free_slot().ok_or(KernelError::ResourceExhausted)?;

        let layout =
            Layout::from_size_align(stack_size, 4).map_err(|_| KernelError::InvalidArgument)?;
        let stack_base = unsafe { alloc(layout) };
        if stack_base.is_null() {
            return Err(KernelError::ResourceExhausted);
        }

        self.install_task(id, entry, arg, stack_base, stack_size, false, weight);
        log::debug!("task {} created, weight {}", id, weight);
        Ok(id)
    }

    /// Same as `task_create` but over a caller-supplied, statically
    /// allocated buffer; never freed by garbage collection.
    pub fn task_create_static(
        &mut self,
        entry: TaskEntry,
        arg: *mut u8,
        buf: *mut u8,
        size: usize,
        weight: u8,
    ) -> KernelResult<TaskId> {
        if weight == 0 || buf.is_null() || size < STACK_MIN_SIZE_BYTES {
            return Err(KernelError::InvalidArgument);
        }
        let id = self.find_free_slot().ok_or(KernelError::ResourceExhausted)?;
        self.install_task(id, entry, arg, buf, size, true, weight);
        Ok(id)
    }

    /// Mark a task Zombie. Its wait-node membership, if any, is left for
    /// the lazy-skip rule in [`crate::wait_queue::WaitList::pop_front_live`]
    /// to discover; no primitive registry is needed to unlink it eagerly.
    pub fn task_delete(&mut self, id: TaskId) -> KernelResult<()> {
        self.validate_id(id)?;
        if id == IDLE_TASK_ID {
            return Err(KernelError::InvalidArgument);
        }
        self.tasks[id as usize].state = TaskState::Zombie;
        if id == self.current {
            self.needs_reschedule = true;
        }
        log::debug!("task {} deleted", id);
        Ok(())
    }

    pub fn task_exit(&mut self) {
        let id = self.current;
        let _ = self.task_delete(id);
    }

    /// Free dynamically allocated stacks of Zombie tasks and return their
    /// slots to Unused. Run periodically by the idle task / tick handler.
    pub fn garbage_collect(&mut self) {
        for i in 0..MAX_TASKS {
            if self.tasks[i].state != TaskState::Zombie {
                continue;
            }
            let rec = self.tasks[i];
            if !rec.stack_is_static && !rec.stack_base.is_null() {
                if let Ok(layout) = Layout::from_size_align(rec.stack_size, 4) {
                    unsafe { dealloc(rec.stack_base, layout) };
                }
            }
            self.tasks[i] = TaskRecord::empty();
            log::trace!("gc reclaimed slot {}", i);
        }
    }

    /// Verify every live task's stack canaries; invokes `panic()` on the
    /// first mismatch found.
    pub fn audit_stacks(&self) {
        for t in self.tasks.iter() {
            if t.state == TaskState::Unused {
                continue;
            }
            if !t.canaries_intact() {
                log::error!("stack canary corrupted for task {}", t.id);
                platform::panic();
            }
        }
    }

    // -- Sleep ------------------------------------------------------------

    /// Put the current task to sleep for `n` ticks. `n == 0` is a no-op
    /// that yields immediately without changing state.
    pub fn task_sleep_ticks(&mut self, n: Ticks) {
        if n == 0 {
            self.needs_reschedule = true;
            return;
        }
        let id = self.current;
        self.tasks[id as usize].state = TaskState::Sleeping;
        self.tasks[id as usize].wake_up_tick = self.tick_count + n as u64;
        self.needs_reschedule = true;
    }

    // -- Notifications ------------------------------------------------

    /// ISR-safe: OR `value` into the target's notification word and mark
    /// it pending. If the target is blocked (including sleeping on a
    /// timed wait), it becomes Ready immediately.
    pub fn task_notify(&mut self, id: TaskId, value: u32) -> KernelResult<()> {
        self.validate_id(id)?;
        let t = &mut self.tasks[id as usize];
        t.notify_value |= value;
        t.notify_pending = true;
        if t.state == TaskState::Blocked || t.state == TaskState::Sleeping {
            t.state = TaskState::Ready;
            self.needs_reschedule = true;
            platform::notify_ready(id);
        }
        Ok(())
    }

    /// Single-shot, non-blocking check: if a notification is pending for
    /// the current task, consume it and return the value.
    pub fn try_take_notification(&mut self, clear: bool) -> Option<u32> {
        let id = self.current;
        let t = &mut self.tasks[id as usize];
        if !t.notify_pending {
            return None;
        }
        let value = t.notify_value;
        if clear {
            t.notify_value = 0;
        }
        t.notify_pending = false;
        Some(value)
    }

    /// Block the current task awaiting a notification. A single target
    /// can only ever have one waiter (itself), so no wait list is
    /// needed: the task simply becomes Blocked/Sleeping and `task_notify`
    /// wakes it directly.
    pub fn begin_notify_wait(&mut self, timeout: Ticks) {
        let id = self.current;
        if timeout == TIMEOUT_FOREVER {
            self.tasks[id as usize].state = TaskState::Blocked;
        } else {
            self.tasks[id as usize].state = TaskState::Sleeping;
            self.tasks[id as usize].wake_up_tick = self.tick_count + timeout as u64;
        }
        self.needs_reschedule = true;
    }

    // -- Tick & selection --------------------------------------------

    /// ISR-context entry. Returns `true` if a context switch should be
    /// requested.
    pub fn tick(&mut self) -> bool {
        self.tick_count += 1;

        for i in 0..MAX_TASKS {
            if self.tasks[i].state == TaskState::Sleeping
                && self.tasks[i].wake_up_tick <= self.tick_count
            {
                self.tasks[i].state = TaskState::Ready;
                self.needs_reschedule = true;
            }
        }

        let cur = self.current as usize;
        if self.tasks[cur].state == TaskState::Running {
            self.tasks[cur].cpu_ticks_total += 1;
            if self.tasks[cur].ticks_remaining > 0 {
                self.tasks[cur].ticks_remaining -= 1;
            }
            if self.tasks[cur].ticks_remaining == 0 {
                self.needs_reschedule = true;
            }
        } else {
            self.needs_reschedule = true;
        }

        if self.higher_weight_ready_than(self.tasks[cur].weight) {
            self.needs_reschedule = true;
        }

        self.gc_ticks += 1;
        if self.gc_ticks >= GARBAGE_COLLECTION_TICKS {
            self.gc_ticks = 0;
            self.garbage_collect();
            self.audit_stacks();
        }

        let reschedule = self.needs_reschedule;
        self.needs_reschedule = false;
        reschedule
    }

    fn higher_weight_ready_than(&self, weight: u8) -> bool {
        self.tasks
            .iter()
            .any(|t| t.is_runnable() && t.weight > weight)
    }

    /// Weighted round-robin selection: scan Ready tasks in a circle
    /// starting just after the last choice, picking the highest weight
    /// seen; ties go to whichever is encountered first, which rotates
    /// fairly among equal-weight tasks across repeated calls.
    pub fn schedule_next_task(&mut self) -> TaskId {
        let cur = self.current as usize;
        if self.tasks[cur].state == TaskState::Running {
            self.tasks[cur].state = TaskState::Ready;
        }

        let n = MAX_TASKS as u16;
        let mut best: Option<TaskId> = None;
        let mut best_weight = 0u8;
        for offset in 1..=n {
            let idx = (self.select_cursor + offset) % n;
            let t = &self.tasks[idx as usize];
            if t.is_runnable() && t.weight > best_weight {
                best = Some(idx);
                best_weight = t.weight;
            }
        }

        let chosen = best.unwrap_or(IDLE_TASK_ID);
        self.select_cursor = chosen;
        self.tasks[chosen as usize].state = TaskState::Running;
        self.tasks[chosen as usize].ticks_remaining = self.tasks[chosen as usize].weight as u32;
        self.current = chosen;
        chosen
    }

    // -- Shared wait-queue protocol (§4.4), used by every primitive ----

    /// Splice the current task onto `list` and mark it Blocked or, with a
    /// finite timeout, Sleeping. Returns the blocked task's id.
    pub fn block_current(&mut self, list: &mut WaitList, timeout: Ticks) -> TaskId {
        let id = self.current;
        list.push_back(&mut self.tasks, id);
        if timeout == TIMEOUT_FOREVER {
            self.tasks[id as usize].state = TaskState::Blocked;
        } else {
            self.tasks[id as usize].state = TaskState::Sleeping;
            self.tasks[id as usize].wake_up_tick = self.tick_count + timeout as u64;
        }
        self.needs_reschedule = true;
        id
    }

    /// Wake exactly one live waiter from `list` (lazy-skipping stale
    /// entries). Returns its id.
    pub fn wake_one(&mut self, list: &mut WaitList) -> Option<TaskId> {
        let id = list.pop_front_live(&mut self.tasks)?;
        self.tasks[id as usize].state = TaskState::Ready;
        self.needs_reschedule = true;
        Some(id)
    }

    /// Wake every live waiter currently on `list`.
    pub fn wake_all(&mut self, list: &mut WaitList) {
        while self.wake_one(list).is_some() {}
    }

    /// Mark an already-detached task Ready. Used by callers (event
    /// groups) that must pop from a wait list themselves to evaluate a
    /// per-waiter condition before deciding whether to wake it.
    pub fn wake_detached(&mut self, id: TaskId) {
        self.tasks[id as usize].state = TaskState::Ready;
        self.needs_reschedule = true;
    }

    /// A timed wait expired (the tick handler already moved the task to
    /// Ready); the caller must detach itself from `list` before
    /// re-checking its condition. No-op if it is not actually linked.
    pub fn finish_wait(&mut self, list: &mut WaitList, id: TaskId) {
        list.remove(&mut self.tasks, id);
    }

    /// True once `id`'s wait has ended, by wake or by timeout (both leave
    /// the task Ready/Running); callers distinguish the two by checking
    /// their own success condition first.
    pub fn is_ready(&self, id: TaskId) -> bool {
        matches!(
            self.tasks[id as usize].state,
            TaskState::Ready | TaskState::Running
        )
    }

    // -- Priority inheritance (used by the mutex) ----------------------

    pub fn effective_weight(&self, id: TaskId) -> u8 {
        self.tasks[id as usize].weight
    }

    /// Raise `id`'s weight to `weight` if that is actually higher.
    pub fn boost_weight(&mut self, id: TaskId, weight: u8) {
        if self.tasks[id as usize].weight < weight {
            log::debug!(
                "task {} weight boosted {} -> {} (priority inheritance)",
                id,
                self.tasks[id as usize].weight,
                weight
            );
            self.tasks[id as usize].weight = weight;
        }
    }

    /// Undo any inherited boost, restoring the task's own base weight.
    pub fn restore_base_weight(&mut self, id: TaskId) {
        self.tasks[id as usize].clear_inherited_weight();
    }
}

extern "C" fn idle_task_entry(_arg: *mut u8) -> ! {
    loop {
        platform::cpu_idle();
    }
}

/// Where a task's link register points if its entry function ever
/// actually returns (it should not, per `TaskEntry`'s `-> !` signature,
/// but a misbehaving hand-written assembly entry could still branch
/// here). Tears the task down defensively instead of running off the
/// end of its stack.
extern "C" fn task_exit_trampoline(_arg: *mut u8) -> ! {
    crate::kernel::with_scheduler(|s| s.task_exit());
    loop {
        platform::cpu_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WEIGHT_HIGH;
    use crate::test_support;

    extern "C" fn noop_entry(_arg: *mut u8) -> ! {
        loop {}
    }

    #[test]
    fn init_creates_single_idle_task() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        assert_eq!(s.current(), IDLE_TASK_ID);
        let alive = s
            .tasks()
            .iter()
            .filter(|t| t.state != TaskState::Unused)
            .count();
        assert_eq!(alive, 1);
        assert_eq!(s.tasks()[0].weight, 1);
    }

    #[test]
    fn create_task_allocates_ready_slot() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let id = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, WEIGHT_HIGH)
            .unwrap();
        assert!(id != IDLE_TASK_ID);
        assert!(s.tasks()[id as usize].is_runnable());
        assert_eq!(s.tasks()[id as usize].weight, WEIGHT_HIGH);
    }

    #[test]
    fn create_task_rejects_bad_stack_size() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let err = s
            .task_create(noop_entry, core::ptr::null_mut(), 4, WEIGHT_HIGH)
            .unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument);
    }

    #[test]
    fn schedule_prefers_highest_weight() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let low = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, 1)
            .unwrap();
        let high = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, WEIGHT_HIGH)
            .unwrap();
        let chosen = s.schedule_next_task();
        assert_eq!(chosen, high);
        assert_ne!(chosen, low);
    }

    #[test]
    fn tick_requeues_on_slice_exhaustion() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let id = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, 2)
            .unwrap();
        s.schedule_next_task();
        assert_eq!(s.current(), id);
        assert!(!s.tick());
        assert!(s.tick());
        assert_eq!(s.tasks()[id as usize].ticks_remaining, 0);
    }

    #[test]
    fn sleep_wakes_at_exact_tick() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let id = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, 4)
            .unwrap();
        s.schedule_next_task();
        assert_eq!(s.current(), id);

        // Spec scenario 6: tick at 100, sleep(5) -> wakes at 105.
        for _ in 0..100 {
            s.tick();
        }
        s.task_sleep_ticks(5);
        assert_eq!(s.tasks()[id as usize].state, TaskState::Sleeping);
        assert_eq!(s.tasks()[id as usize].wake_up_tick, 105);

        for _ in 0..4 {
            s.tick();
            assert_eq!(s.tasks()[id as usize].state, TaskState::Sleeping);
        }
        s.tick();
        assert_eq!(s.tasks()[id as usize].state, TaskState::Ready);
    }

    #[test]
    fn delete_marks_zombie_and_gc_reclaims_slot() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let id = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, 4)
            .unwrap();
        s.task_delete(id).unwrap();
        assert_eq!(s.tasks()[id as usize].state, TaskState::Zombie);
        s.garbage_collect();
        assert_eq!(s.tasks()[id as usize].state, TaskState::Unused);
    }

    #[test]
    fn notify_wakes_blocked_task() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let id = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, 4)
            .unwrap();
        s.current = id;
        s.begin_notify_wait(TIMEOUT_FOREVER);
        assert_eq!(s.tasks()[id as usize].state, TaskState::Blocked);
        s.task_notify(id, 0x7).unwrap();
        assert_eq!(s.tasks()[id as usize].state, TaskState::Ready);
        s.current = id;
        let v = s.try_take_notification(true).unwrap();
        assert_eq!(v, 0x7);
        assert!(s.try_take_notification(true).is_none());
    }

    #[test]
    fn sleep_ticks_zero_is_noop_yield() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let before = s.tasks()[IDLE_TASK_ID as usize].state;
        s.task_sleep_ticks(TIMEOUT_TRY);
        assert_eq!(s.tasks()[IDLE_TASK_ID as usize].state, before);
    }
}
