//! # Fixed-capacity message queue
//!
//! A byte-oriented ring buffer with bidirectional blocking (receivers
//! block on empty, senders block on full) plus ISR-safe non-blocking
//! variants. Items are opaque `item_size`-byte records copied by value;
//! callers are responsible for `item_size` agreeing with whatever type
//! they reinterpret the bytes as.

extern crate alloc;

use alloc::alloc::{alloc, dealloc};
use core::alloc::Layout;

use crate::error::{KernelError, KernelResult};
use crate::platform::{self, Ticks, TIMEOUT_TRY};
use crate::scheduler::Scheduler;
use crate::wait_queue::WaitList;

/// Invoked synchronously on every successful push (blocking or ISR).
/// Per the wait-queue protocol's shared-resource policy, this runs
/// inside the kernel's critical section and must not itself block.
pub type PushCallback = fn(arg: *mut u8, item: *const u8);

pub struct Queue {
    buffer: *mut u8,
    item_size: usize,
    capacity: usize,
    count: usize,
    head: usize,
    tail: usize,
    rx_wait: WaitList,
    tx_wait: WaitList,
    push_cb: Option<(PushCallback, *mut u8)>,
}

// Safety: `buffer` references a heap allocation this Queue exclusively
// owns; all access happens under the kernel's critical section.
unsafe impl Send for Queue {}

impl Queue {
    pub const fn empty() -> Self {
        Self {
            buffer: core::ptr::null_mut(),
            item_size: 0,
            capacity: 0,
            count: 0,
            head: 0,
            tail: 0,
            rx_wait: WaitList::new(),
            tx_wait: WaitList::new(),
            push_cb: None,
        }
    }

    pub fn create(&mut self, item_size: usize, capacity: usize) -> KernelResult<()> {
        if item_size == 0 || capacity == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let total = item_size
            .checked_mul(capacity)
            .ok_or(KernelError::InvalidArgument)?;
        let layout = Layout::from_size_align(total, 4).map_err(|_| KernelError::InvalidArgument)?;
        let buffer = unsafe { alloc(layout) };
        if buffer.is_null() {
            return Err(KernelError::ResourceExhausted);
        }
        self.buffer = buffer;
        self.item_size = item_size;
        self.capacity = capacity;
        self.count = 0;
        self.head = 0;
        self.tail = 0;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn set_push_callback(&mut self, cb: PushCallback, arg: *mut u8) {
        self.push_cb = Some((cb, arg));
    }

    fn slot(&self, index: usize) -> *mut u8 {
        unsafe { self.buffer.add(index * self.item_size) }
    }

    /// Single, non-blocking attempt to enqueue `item` (`item_size` bytes).
    fn try_push_locked(&mut self, item: *const u8) -> bool {
        if self.is_full() {
            return false;
        }
        unsafe {
            core::ptr::copy_nonoverlapping(item, self.slot(self.tail), self.item_size);
        }
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
        if let Some((cb, arg)) = self.push_cb {
            cb(arg, item);
        }
        true
    }

    /// Single, non-blocking attempt to dequeue into `out`.
    fn try_pop_locked(&mut self, out: *mut u8) -> bool {
        if self.is_empty() {
            return false;
        }
        unsafe {
            core::ptr::copy_nonoverlapping(self.slot(self.head), out, self.item_size);
        }
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        true
    }

    /// Blocking push: on full, enqueues on `tx_wait`, yields, re-checks.
    /// On success, wakes one `rx_wait` waiter if any.
    pub fn push(&mut self, item: *const u8, timeout: Ticks) -> KernelResult<()> {
        if crate::kernel::with_scheduler(|s| self.try_push_one(s, item)) {
            return Ok(());
        }
        if timeout == TIMEOUT_TRY {
            return Err(KernelError::ResourceExhausted);
        }
        let id = crate::kernel::with_scheduler(|s| s.block_current(&mut self.tx_wait, timeout));
        loop {
            platform::yield_cpu();
            if crate::kernel::with_scheduler(|s| self.try_push_one(s, item)) {
                return Ok(());
            }
            let timed_out = crate::kernel::with_scheduler(|s| {
                if s.is_ready(id) {
                    s.finish_wait(&mut self.tx_wait, id);
                    true
                } else {
                    false
                }
            });
            if timed_out {
                if crate::kernel::with_scheduler(|s| self.try_push_one(s, item)) {
                    return Ok(());
                }
                return Err(KernelError::Timeout);
            }
        }
    }

    fn try_push_one(&mut self, scheduler: &mut Scheduler, item: *const u8) -> bool {
        if !self.try_push_locked(item) {
            return false;
        }
        scheduler.wake_one(&mut self.rx_wait);
        true
    }

    /// `count` calls to `push`, in order; may block between items.
    pub fn push_arr(&mut self, data: *const u8, count: usize, timeout: Ticks) -> KernelResult<()> {
        for i in 0..count {
            let item = unsafe { data.add(i * self.item_size) };
            self.push(item, timeout)?;
        }
        Ok(())
    }

    /// Blocking pop: on empty, enqueues on `rx_wait`, yields, re-checks.
    /// On success, wakes one `tx_wait` waiter if any.
    pub fn pop(&mut self, out: *mut u8, timeout: Ticks) -> KernelResult<()> {
        if crate::kernel::with_scheduler(|s| self.try_pop_one(s, out)) {
            return Ok(());
        }
        if timeout == TIMEOUT_TRY {
            return Err(KernelError::Timeout);
        }
        let id = crate::kernel::with_scheduler(|s| s.block_current(&mut self.rx_wait, timeout));
        loop {
            platform::yield_cpu();
            if crate::kernel::with_scheduler(|s| self.try_pop_one(s, out)) {
                return Ok(());
            }
            let timed_out = crate::kernel::with_scheduler(|s| {
                if s.is_ready(id) {
                    s.finish_wait(&mut self.rx_wait, id);
                    true
                } else {
                    false
                }
            });
            if timed_out {
                if crate::kernel::with_scheduler(|s| self.try_pop_one(s, out)) {
                    return Ok(());
                }
                return Err(KernelError::Timeout);
            }
        }
    }

    fn try_pop_one(&mut self, scheduler: &mut Scheduler, out: *mut u8) -> bool {
        if !self.try_pop_locked(out) {
            return false;
        }
        scheduler.wake_one(&mut self.tx_wait);
        true
    }

    /// Non-blocking, ISR-safe push: fails immediately if full.
    pub fn push_from_isr(&mut self, scheduler: &mut Scheduler, item: *const u8) -> KernelResult<()> {
        if self.try_push_one(scheduler, item) {
            Ok(())
        } else {
            Err(KernelError::ResourceExhausted)
        }
    }

    /// Non-blocking, ISR-safe pop: fails immediately if empty.
    pub fn pop_from_isr(&mut self, scheduler: &mut Scheduler, out: *mut u8) -> KernelResult<()> {
        if self.try_pop_one(scheduler, out) {
            Ok(())
        } else {
            Err(KernelError::Timeout)
        }
    }

    /// Copy the head item without removing it. Fails if empty.
    pub fn peek(&self, out: *mut u8) -> KernelResult<()> {
        if self.is_empty() {
            return Err(KernelError::Timeout);
        }
        unsafe {
            core::ptr::copy_nonoverlapping(self.slot(self.head), out, self.item_size);
        }
        Ok(())
    }

    /// Drop all queued items and wake every `tx_wait` waiter (space is
    /// now available). `rx_wait` is untouched: there is still nothing
    /// to receive.
    pub fn reset(&mut self, scheduler: &mut Scheduler) {
        self.count = 0;
        self.head = 0;
        self.tail = 0;
        scheduler.wake_all(&mut self.tx_wait);
    }

    /// Tear the queue down: wake every waiter on both sides (as if
    /// released, not satisfied — callers must check their own return
    /// status rather than assume success), then free the backing buffer
    /// and reset to the empty, uncreated state so the slot can be
    /// reused by a later `create`.
    pub fn delete(&mut self, scheduler: &mut Scheduler) {
        scheduler.wake_all(&mut self.rx_wait);
        scheduler.wake_all(&mut self.tx_wait);
        if !self.buffer.is_null() {
            if let Ok(layout) = Layout::from_size_align(self.item_size * self.capacity, 4) {
                unsafe { dealloc(self.buffer, layout) };
            }
        }
        self.buffer = core::ptr::null_mut();
        self.item_size = 0;
        self.capacity = 0;
        self.count = 0;
        self.head = 0;
        self.tail = 0;
        self.push_cb = None;
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if !self.buffer.is_null() {
            if let Ok(layout) = Layout::from_size_align(self.item_size * self.capacity, 4) {
                unsafe { dealloc(self.buffer, layout) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::test_support;

    #[test]
    fn push_pop_round_trip() {
        let mut q = Queue::empty();
        q.create(core::mem::size_of::<i32>(), 4).unwrap();
        let x: i32 = 42;
        let mut y: i32 = 0;
        unsafe {
            assert!(q.try_push_locked(&x as *const i32 as *const u8));
            assert!(q.try_pop_locked(&mut y as *mut i32 as *mut u8));
        }
        assert_eq!(x, y);
    }

    #[test]
    fn capacity_scenario() {
        // Spec scenario 3: capacity 2, push 10, 20, 30 blocks; pop
        // yields 10, blocked pusher wakes and pushes 30; pops then
        // yield 20, 30.
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let mut q = Queue::empty();
        q.create(core::mem::size_of::<i32>(), 2).unwrap();

        let (a, b, c) = (10i32, 20i32, 30i32);
        unsafe {
            assert!(q.try_push_one(&mut s, &a as *const i32 as *const u8));
            assert!(q.try_push_one(&mut s, &b as *const i32 as *const u8));
            assert!(!q.try_push_one(&mut s, &c as *const i32 as *const u8));
        }
        assert!(q.is_full());

        let mut out = 0i32;
        unsafe {
            assert!(q.try_pop_one(&mut s, &mut out as *mut i32 as *mut u8));
        }
        assert_eq!(out, 10);

        unsafe {
            assert!(q.try_push_one(&mut s, &c as *const i32 as *const u8));
        }

        let mut second = 0i32;
        let mut third = 0i32;
        unsafe {
            assert!(q.try_pop_one(&mut s, &mut second as *mut i32 as *mut u8));
            assert!(q.try_pop_one(&mut s, &mut third as *mut i32 as *mut u8));
        }
        assert_eq!(second, 20);
        assert_eq!(third, 30);
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = Queue::empty();
        q.create(4, 2).unwrap();
        let item = [1u8, 2, 3, 4];
        unsafe {
            q.try_push_locked(item.as_ptr());
        }
        let mut out = [0u8; 4];
        q.peek(out.as_mut_ptr()).unwrap();
        assert_eq!(out, item);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn reset_wakes_tx_waiters_only() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let mut q = Queue::empty();
        q.create(4, 1).unwrap();
        let item = [9u8; 4];
        unsafe {
            q.try_push_locked(item.as_ptr());
        }
        assert!(q.is_full());
        s.block_current(&mut q.tx_wait, crate::platform::TIMEOUT_FOREVER);
        q.reset(&mut s);
        assert!(q.is_empty());
        assert_eq!(s.tasks()[s.current() as usize].state, crate::task::TaskState::Ready);
    }

    #[test]
    fn delete_wakes_both_sides_and_frees_buffer() {
        let _g = test_support::lock();
        let mut s = Scheduler::new();
        s.init();
        let mut q = Queue::empty();
        q.create(4, 1).unwrap();
        let item = [1u8; 4];
        unsafe {
            q.try_push_locked(item.as_ptr());
        }
        assert!(q.is_full());
        s.block_current(&mut q.tx_wait, crate::platform::TIMEOUT_FOREVER);

        q.delete(&mut s);

        assert_eq!(s.tasks()[s.current() as usize].state, crate::task::TaskState::Ready);
        assert!(q.buffer.is_null());
        assert_eq!(q.capacity, 0);
    }

    #[test]
    fn push_callback_invoked_on_success() {
        static mut LAST: u8 = 0;
        fn cb(_arg: *mut u8, item: *const u8) {
            unsafe { LAST = *item };
        }
        let mut q = Queue::empty();
        q.create(1, 2).unwrap();
        q.set_push_callback(cb, core::ptr::null_mut());
        let v = [7u8];
        unsafe {
            q.try_push_locked(v.as_ptr());
        }
        unsafe {
            assert_eq!(LAST, 7);
        }
    }
}
