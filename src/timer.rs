//! # Software timers
//!
//! A fixed-capacity table of one-shot/periodic timers driven by
//! `check_expiries`, which the idle task (or an application task) calls
//! periodically. Expiry comparison is done modularly on the wrapping
//! `u64` tick count so a timer started near tick overflow still fires
//! correctly.

use crate::config::MAX_TIMERS;
use crate::error::{KernelError, KernelResult};
use crate::platform::{TickCount, Ticks};

pub type TimerId = u16;
pub type TimerCallback = fn(arg: *mut u8);

/// Returned by `check_expiries` when no timer is active.
pub const NO_ACTIVE_TIMER: TickCount = TickCount::MAX;

#[derive(Clone, Copy)]
struct TimerSlot {
    in_use: bool,
    active: bool,
    period: Ticks,
    auto_reload: bool,
    expiry_tick: TickCount,
    callback: TimerCallback,
    arg: *mut u8,
    /// Monotonically increasing creation order, used to break same-tick
    /// expiry ties in insertion order per the specified contract.
    sequence: u32,
}

impl TimerSlot {
    const fn empty() -> Self {
        Self {
            in_use: false,
            active: false,
            period: 0,
            auto_reload: false,
            expiry_tick: 0,
            callback: noop_callback,
            arg: core::ptr::null_mut(),
            sequence: 0,
        }
    }
}

fn noop_callback(_arg: *mut u8) {}

// Safety: `arg` is an opaque caller-supplied pointer threaded through to
// `callback`, only ever touched under the kernel's critical section.
unsafe impl Send for TimerSlot {}

pub struct TimerService {
    slots: [TimerSlot; MAX_TIMERS],
    next_sequence: u32,
}

/// Expiry comparison per the specified wraparound-safe rule: treat
/// `tick - expiry` as a signed delta so a tick count that has wrapped
/// past `expiry` still compares as "due".
fn is_due(expiry: TickCount, tick: TickCount) -> bool {
    (tick.wrapping_sub(expiry) as i64) >= 0
}

impl TimerService {
    pub const fn new() -> Self {
        Self {
            slots: [TimerSlot::empty(); MAX_TIMERS],
            next_sequence: 0,
        }
    }

    /// Allocate an inactive timer. `period` is in ticks; `auto_reload`
    /// selects periodic vs one-shot.
    pub fn create(
        &mut self,
        period: Ticks,
        auto_reload: bool,
        callback: TimerCallback,
        arg: *mut u8,
    ) -> KernelResult<TimerId> {
        if period == 0 {
            return Err(KernelError::InvalidArgument);
        }
        let slot = self
            .slots
            .iter()
            .position(|s| !s.in_use)
            .ok_or(KernelError::ResourceExhausted)?;
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.slots[slot] = TimerSlot {
            in_use: true,
            active: false,
            period,
            auto_reload,
            expiry_tick: 0,
            callback,
            arg,
            sequence,
        };
        Ok(slot as TimerId)
    }

    pub fn delete(&mut self, id: TimerId) -> KernelResult<()> {
        let slot = self.slot_mut(id)?;
        *slot = TimerSlot::empty();
        Ok(())
    }

    fn slot_mut(&mut self, id: TimerId) -> KernelResult<&mut TimerSlot> {
        self.slots
            .get_mut(id as usize)
            .filter(|s| s.in_use)
            .ok_or(KernelError::InvalidArgument)
    }

    /// Arm (or re-arm) a timer: `expiry_tick = now + period`, wrapping on
    /// overflow so a timer started near the tick counter's rollover still
    /// gets a valid (small) expiry rather than panicking. Restarts a
    /// still-active timer's expiry rather than stacking a second firing.
    pub fn start(&mut self, id: TimerId, now: TickCount) -> KernelResult<()> {
        let slot = self.slot_mut(id)?;
        slot.expiry_tick = now.wrapping_add(slot.period as TickCount);
        slot.active = true;
        Ok(())
    }

    pub fn stop(&mut self, id: TimerId) -> KernelResult<()> {
        let slot = self.slot_mut(id)?;
        slot.active = false;
        Ok(())
    }

    pub fn is_active(&self, id: TimerId) -> bool {
        self.slots
            .get(id as usize)
            .map(|s| s.in_use && s.active)
            .unwrap_or(false)
    }

    /// Fire every due timer (insertion order on a tie), reload
    /// auto-reload timers, and return the minimum ticks remaining among
    /// all still-active timers, or `NO_ACTIVE_TIMER` if none are active.
    pub fn check_expiries(&mut self, now: TickCount) -> TickCount {
        let mut order: [usize; MAX_TIMERS] = core::array::from_fn(|i| i);
        order.sort_by_key(|&i| self.slots[i].sequence);

        for &i in order.iter() {
            let due = {
                let s = &self.slots[i];
                s.in_use && s.active && is_due(s.expiry_tick, now)
            };
            if !due {
                continue;
            }
            let (callback, arg) = (self.slots[i].callback, self.slots[i].arg);
            log::trace!("timer {} expired at tick {}", i, now);
            callback(arg);
            let s = &mut self.slots[i];
            if s.auto_reload {
                s.expiry_tick = s.expiry_tick.wrapping_add(s.period as TickCount);
            } else {
                s.active = false;
            }
        }

        self.slots
            .iter()
            .filter(|s| s.in_use && s.active)
            .map(|s| s.expiry_tick.saturating_sub(now))
            .min()
            .unwrap_or(NO_ACTIVE_TIMER)
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once_then_goes_inactive() {
        static mut FIRED: u32 = 0;
        fn cb(_arg: *mut u8) {
            unsafe { FIRED += 1 };
        }
        let mut svc = TimerService::new();
        let t = svc.create(10, false, cb, core::ptr::null_mut()).unwrap();
        svc.start(t, 0).unwrap();
        assert_eq!(svc.check_expiries(5), 5);
        assert_eq!(svc.check_expiries(10), 0);
        unsafe { assert_eq!(FIRED, 1) };
        assert!(!svc.is_active(t));
        assert_eq!(svc.check_expiries(100), NO_ACTIVE_TIMER);
    }

    #[test]
    fn auto_reload_rearms_after_firing() {
        static mut FIRED: u32 = 0;
        fn cb(_arg: *mut u8) {
            unsafe { FIRED += 1 };
        }
        let mut svc = TimerService::new();
        let t = svc.create(10, true, cb, core::ptr::null_mut()).unwrap();
        svc.start(t, 0).unwrap();
        svc.check_expiries(10);
        unsafe { assert_eq!(FIRED, 1) };
        assert!(svc.is_active(t));
        assert_eq!(svc.check_expiries(15), 5);
        svc.check_expiries(20);
        unsafe { assert_eq!(FIRED, 2) };
    }

    #[test]
    fn restart_resets_expiry_instead_of_stacking() {
        let mut svc = TimerService::new();
        let t = svc
            .create(10, false, noop_callback, core::ptr::null_mut())
            .unwrap();
        svc.start(t, 0).unwrap();
        svc.start(t, 5).unwrap();
        assert_eq!(svc.check_expiries(14), 1);
        assert!(svc.is_active(t));
    }

    #[test]
    fn tie_break_follows_creation_order() {
        // Both timers are due at the same tick; `sequence` (assigned at
        // `create`) breaks the tie, independent of start order.
        let mut svc = TimerService::new();
        let a = svc
            .create(5, false, noop_callback, core::ptr::null_mut())
            .unwrap();
        let b = svc
            .create(5, false, noop_callback, core::ptr::null_mut())
            .unwrap();
        svc.start(b, 0).unwrap();
        svc.start(a, 0).unwrap();
        assert!(svc.slots[a as usize].sequence < svc.slots[b as usize].sequence);
        svc.check_expiries(5);
        assert!(!svc.is_active(a));
        assert!(!svc.is_active(b));
    }

    #[test]
    fn wraparound_fires_exactly_once() {
        // Spec scenario 7, adapted to `TickCount = u64`: a 20-tick
        // one-shot started at tick u64::MAX - 10 has not fired by
        // u64::MAX, and fires exactly once at tick 9 after the tick
        // count wraps.
        static mut FIRED: u32 = 0;
        fn cb(_arg: *mut u8) {
            unsafe { FIRED += 1 };
        }
        let start = TickCount::MAX - 10;
        let mut svc = TimerService::new();
        let t = svc.create(20, false, cb, core::ptr::null_mut()).unwrap();
        svc.start(t, start).unwrap();

        svc.check_expiries(TickCount::MAX);
        unsafe { assert_eq!(FIRED, 0) };
        assert!(svc.is_active(t));

        svc.check_expiries(9);
        unsafe { assert_eq!(FIRED, 1) };
        assert!(!svc.is_active(t));
    }

    #[test]
    fn create_rejects_zero_period() {
        let mut svc = TimerService::new();
        assert_eq!(
            svc.create(0, false, noop_callback, core::ptr::null_mut()),
            Err(KernelError::InvalidArgument)
        );
    }
}
