//! # Demo firmware
//!
//! Exercises the kernel's task, mutex, and queue surface with two
//! cooperating tasks and a periodic watchdog:
//!
//! | Task | Weight | Behavior |
//! |------|--------|----------|
//! | `producer_task` | NORMAL | pushes a reading onto a shared queue every period |
//! | `consumer_task` | NORMAL | pops readings and accumulates a mutex-protected total |
//! | `watchdog_task` | HIGH | wakes periodically; placeholder for health checks |

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use panic_halt as _;

use cadence::config::{WEIGHT_HIGH, WEIGHT_NORMAL};
use cadence::kernel;
use cadence::mutex::Mutex;
use cadence::platform::TIMEOUT_FOREVER;
use cadence::queue::Queue;

static mut READING_QUEUE: Queue = Queue::empty();
static mut TOTAL_LOCK: Mutex = Mutex::new();
static mut TOTAL: u32 = 0;

extern "C" fn producer_task(_arg: *mut u8) -> ! {
    let mut reading: u32 = 0;
    loop {
        reading = reading.wrapping_add(1);
        unsafe {
            let _ = READING_QUEUE.push(&reading as *const u32 as *const u8, TIMEOUT_FOREVER);
        }
        kernel::task_sleep_ticks(10);
    }
}

extern "C" fn consumer_task(_arg: *mut u8) -> ! {
    loop {
        let mut reading: u32 = 0;
        unsafe {
            let _ = READING_QUEUE.pop(&mut reading as *mut u32 as *mut u8, TIMEOUT_FOREVER);
        }
        unsafe {
            TOTAL_LOCK.lock();
            TOTAL = TOTAL.wrapping_add(reading);
            let _ = TOTAL_LOCK.release();
        }
    }
}

extern "C" fn watchdog_task(_arg: *mut u8) -> ! {
    loop {
        kernel::task_sleep_ticks(100);
    }
}

#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    unsafe {
        kernel::scheduler_init();
        READING_QUEUE
            .create(core::mem::size_of::<u32>(), 8)
            .expect("failed to create reading queue");
    }

    kernel::task_create(producer_task, core::ptr::null_mut(), 1024, WEIGHT_NORMAL)
        .expect("failed to create producer_task");
    kernel::task_create(consumer_task, core::ptr::null_mut(), 1024, WEIGHT_NORMAL)
        .expect("failed to create consumer_task");
    kernel::task_create(watchdog_task, core::ptr::null_mut(), 512, WEIGHT_HIGH)
        .expect("failed to create watchdog_task");

    unsafe { kernel::scheduler_start(cp) }
}
