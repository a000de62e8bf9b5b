//! # Event groups
//!
//! A single 32-bit bitmask with wait-any/wait-all semantics, built on the
//! same wait-queue protocol as the mutex and semaphore. Unlike those,
//! waking a waiter here depends on *which* bits are set, and a
//! `CLEAR_ON_EXIT` wake can change the bits a later waiter in the same
//! scan is judged against, so the scan below walks the list one waiter
//! at a time rather than batching it through `drain_matching`.

pub use crate::task::wait_flags;

use crate::platform::{self, Ticks, TIMEOUT_TRY};
use crate::scheduler::Scheduler;
use crate::task::TaskId;
use crate::wait_queue::WaitList;

/// Value returned by a timed-out or deleted `wait_bits` call.
pub const WAIT_RESULT_NONE: u32 = 0;

pub struct EventGroup {
    bits: u32,
    wait: WaitList,
}

fn satisfied(bits: u32, want: u32, flags: u8) -> bool {
    if flags & wait_flags::WAIT_ALL != 0 {
        (bits & want) == want
    } else {
        (bits & want) != 0
    }
}

impl EventGroup {
    pub const fn new() -> Self {
        Self {
            bits: 0,
            wait: WaitList::new(),
        }
    }

    pub fn get_bits(&self) -> u32 {
        self.bits
    }

    /// OR `mask` into the group, then scan the wait list waking every
    /// newly-satisfied waiter in FIFO order. A `CLEAR_ON_EXIT` waiter has
    /// its requested bits cleared from `self.bits` as soon as it is
    /// woken, so later waiters in the same scan observe the consumed
    /// state — this is what turns what would otherwise be a broadcast
    /// into per-waiter consume semantics.
    pub fn set_bits(&mut self, scheduler: &mut Scheduler, mask: u32) {
        self.bits |= mask;

        let original_len = self.wait.len(scheduler.tasks());
        let mut holdback = WaitList::new();

        for _ in 0..original_len {
            let Some(id) = self.wait.pop_front_live(scheduler.tasks_mut()) else {
                break;
            };
            let (want, flags) = {
                let t = &scheduler.tasks()[id as usize];
                (t.wait_bits, t.wait_flags)
            };
            if satisfied(self.bits, want, flags) {
                if flags & wait_flags::CLEAR_ON_EXIT != 0 {
                    self.bits &= !want;
                }
                scheduler.wake_detached(id);
            } else {
                holdback.push_back(scheduler.tasks_mut(), id);
            }
        }

        while let Some(id) = holdback.pop_front(scheduler.tasks_mut()) {
            self.wait.push_back(scheduler.tasks_mut(), id);
        }
    }

    /// Unconditionally clear `mask` from the group.
    pub fn clear_bits(&mut self, mask: u32) {
        self.bits &= !mask;
    }

    /// ISR-safe: identical to `set_bits`.
    pub fn set_bits_from_isr(&mut self, scheduler: &mut Scheduler, mask: u32) {
        self.set_bits(scheduler, mask);
    }

    /// Non-blocking check: if already satisfied, apply `CLEAR_ON_EXIT`
    /// and return the bits observed; else `None`.
    fn try_wait_bits(&mut self, want: u32, flags: u8) -> Option<u32> {
        if !satisfied(self.bits, want, flags) {
            return None;
        }
        let observed = self.bits;
        if flags & wait_flags::CLEAR_ON_EXIT != 0 {
            self.bits &= !want;
        }
        Some(observed)
    }

    /// Blocking wait: returns the bits observed at wake, or `0` on
    /// timeout.
    pub fn wait_bits(&mut self, want: u32, flags: u8, timeout: Ticks) -> u32 {
        if let Some(observed) = self.try_wait_bits(want, flags) {
            return observed;
        }
        if timeout == TIMEOUT_TRY {
            return WAIT_RESULT_NONE;
        }

        let id = crate::kernel::with_scheduler(|s| {
            s.tasks_mut()[s.current() as usize].wait_bits = want;
            s.tasks_mut()[s.current() as usize].wait_flags = flags;
            s.block_current(&mut self.wait, timeout)
        });
        loop {
            platform::yield_cpu();
            if let Some(observed) = self.try_wait_bits(want, flags) {
                return observed;
            }
            let timed_out = crate::kernel::with_scheduler(|s| {
                if s.is_ready(id) {
                    s.finish_wait(&mut self.wait, id);
                    true
                } else {
                    false
                }
            });
            if timed_out {
                if let Some(observed) = self.try_wait_bits(want, flags) {
                    return observed;
                }
                return WAIT_RESULT_NONE;
            }
        }
    }

    /// Wake every waiter unconditionally with the sentinel value `0`,
    /// as if every wait had timed out; the group is then inert.
    pub fn delete(&mut self, scheduler: &mut Scheduler) {
        scheduler.wake_all(&mut self.wait);
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WEIGHT_NORMAL;
    use crate::scheduler::Scheduler;
    use crate::task::TaskState;
    use crate::test_support;

    extern "C" fn noop_entry(_arg: *mut u8) -> ! {
        loop {}
    }

    fn force_current(s: &mut Scheduler, id: TaskId) {
        for t in s.tasks_mut().iter_mut() {
            if t.state == TaskState::Running {
                t.state = TaskState::Ready;
            }
        }
        s.tasks_mut()[id as usize].state = TaskState::Running;
        s.set_current_for_test(id);
    }

    #[test]
    fn wait_any_satisfied_immediately() {
        let mut eg = EventGroup::new();
        eg.set_bits(&mut Scheduler::new(), 0b010);
        assert_eq!(eg.try_wait_bits(0b011, 0), Some(0b010));
    }

    #[test]
    fn wait_all_requires_every_bit() {
        let mut eg = EventGroup::new();
        eg.bits = 0b010;
        assert_eq!(eg.try_wait_bits(0b011, wait_flags::WAIT_ALL), None);
        eg.bits = 0b011;
        assert_eq!(
            eg.try_wait_bits(0b011, wait_flags::WAIT_ALL),
            Some(0b011)
        );
    }

    #[test]
    fn clear_on_exit_consumes_bits_for_next_waiter() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let mut eg = EventGroup::new();

        let a = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, WEIGHT_NORMAL)
            .unwrap();
        let b = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, WEIGHT_NORMAL)
            .unwrap();

        force_current(&mut s, a);
        s.tasks_mut()[a as usize].wait_bits = 0b1;
        s.tasks_mut()[a as usize].wait_flags = wait_flags::CLEAR_ON_EXIT;
        s.block_current(&mut eg.wait, crate::platform::TIMEOUT_FOREVER);

        force_current(&mut s, b);
        s.tasks_mut()[b as usize].wait_bits = 0b1;
        s.tasks_mut()[b as usize].wait_flags = 0;
        s.block_current(&mut eg.wait, crate::platform::TIMEOUT_FOREVER);

        eg.set_bits(&mut s, 0b1);

        assert_eq!(s.tasks()[a as usize].state, TaskState::Ready);
        // a's CLEAR_ON_EXIT wake cleared bit 0 before b was evaluated,
        // so b remains blocked despite requesting the same bit.
        assert_eq!(s.tasks()[b as usize].state, TaskState::Blocked);
        assert_eq!(eg.get_bits(), 0);
    }

    #[test]
    fn delete_wakes_everyone_with_zero() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let mut eg = EventGroup::new();
        let a = s
            .task_create(noop_entry, core::ptr::null_mut(), 512, WEIGHT_NORMAL)
            .unwrap();
        force_current(&mut s, a);
        s.block_current(&mut eg.wait, crate::platform::TIMEOUT_FOREVER);
        eg.delete(&mut s);
        assert_eq!(s.tasks()[a as usize].state, TaskState::Ready);
    }
}
