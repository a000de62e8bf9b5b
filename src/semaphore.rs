//! # Counting / binary semaphore
//!
//! `signal` hands its token directly to the head waiter when one exists
//! (no `count` increment — ownership passes through the wait-queue
//! protocol's handoff rule); only a signal with nobody waiting touches
//! `count`. A signal that finds `count == max_count` and no waiters is
//! dropped silently, per the specified "max cap" semantics.

use crate::error::{KernelError, KernelResult};
use crate::platform::{self, Ticks, TIMEOUT_TRY};
use crate::scheduler::Scheduler;
use crate::wait_queue::WaitList;

pub struct Semaphore {
    count: u32,
    max_count: u32,
    wait: WaitList,
}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            count: 0,
            max_count: 0,
            wait: WaitList::new(),
        }
    }

    pub fn init(&mut self, initial: u32, max: u32) -> KernelResult<()> {
        if initial > max || max == 0 {
            return Err(KernelError::InvalidArgument);
        }
        self.count = initial;
        self.max_count = max;
        self.wait = WaitList::new();
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Single, non-blocking attempt.
    pub fn try_wait(&mut self) -> bool {
        if self.count > 0 {
            self.count -= 1;
            true
        } else {
            false
        }
    }

    /// Blocking wait: loops `try_wait` / block / yield.
    pub fn wait(&mut self, timeout: Ticks) -> KernelResult<()> {
        if self.try_wait() {
            return Ok(());
        }
        if timeout == TIMEOUT_TRY {
            return Err(KernelError::Timeout);
        }

        let id = crate::kernel::with_scheduler(|s| s.block_current(&mut self.wait, timeout));
        loop {
            platform::yield_cpu();
            if self.try_wait() {
                return Ok(());
            }
            let timed_out =
                crate::kernel::with_scheduler(|s| {
                    if s.is_ready(id) {
                        s.finish_wait(&mut self.wait, id);
                        true
                    } else {
                        false
                    }
                });
            if timed_out {
                // Re-check once more: a signal and the timeout could
                // race in the same tick (spurious wakeup tolerance).
                if self.try_wait() {
                    return Ok(());
                }
                return Err(KernelError::Timeout);
            }
        }
    }

    /// Wake one waiter (handoff) or bump `count` up to `max_count`;
    /// drop the signal if neither applies.
    pub fn signal(&mut self, scheduler: &mut Scheduler) {
        if scheduler.wake_one(&mut self.wait).is_some() {
            return;
        }
        if self.count < self.max_count {
            self.count += 1;
        }
    }

    /// Wake every waiter, incrementing `count` up to `max_count` for
    /// each (excess dropped). Woken waiters re-check on wake and may
    /// re-block if a race left `count == 0` again.
    pub fn broadcast(&mut self, scheduler: &mut Scheduler) {
        while scheduler.wake_one(&mut self.wait).is_some() {
            if self.count < self.max_count {
                self.count += 1;
            }
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}
