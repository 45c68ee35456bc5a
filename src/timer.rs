//! Tick counting, time-based sleep, and the timer interrupt body.
//!
//! The timer fires `TIMER_FREQ` times per second. Its handler increments
//! the monotonic tick counter, charges the tick to the running thread, and
//! walks the head of the sleep queue waking every thread whose deadline has
//! passed. Threads sleep by parking themselves on the sleep queue, ordered
//! by absolute wake-up tick.
//!
//! Sub-tick delays cannot sleep, so they busy-wait a calibrated number of
//! loop iterations instead.

use crate::arch::Arch;
use crate::intr::{self, IntrLevel};
use crate::kernel::Kernel;
use portable_atomic::Ordering;

/// Timer interrupts per second.
pub const TIMER_FREQ: i64 = 100;

// The classic PC interval timer cannot be programmed outside this range,
// and nothing in the tick math assumes more resolution.
const _: () = assert!(TIMER_FREQ >= 19 && TIMER_FREQ <= 1000);

impl<A: Arch + 'static> Kernel<A> {
    /// Ticks since boot. Safe against a concurrent timer interrupt.
    pub fn ticks(&self) -> i64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Ticks elapsed since `then`, which should be a value `ticks` returned.
    pub fn elapsed(&self, then: i64) -> i64 {
        self.ticks() - then
    }

    /// Suspend the caller for at least `n` timer ticks.
    ///
    /// The wakeup happens on a tick boundary, so the wait is never shorter
    /// than `n` whole ticks; there is no upper bound. Must be called with
    /// interrupts enabled. `n <= 0` returns immediately.
    pub fn sleep(&self, n: i64) {
        assert_eq!(
            intr::get_level::<A>(),
            IntrLevel::On,
            "sleep with interrupts disabled"
        );
        if n <= 0 {
            return;
        }
        self.sleep_until(self.ticks() + n);
    }

    /// Park the caller on the sleep queue until `deadline`. The idle thread
    /// never sleeps.
    pub(crate) fn sleep_until(&self, deadline: i64) {
        let old = intr::disable::<A>();
        let cur = self.current();
        if !self.is_idle(&cur) {
            cur.set_wake_up_tick(deadline);
            self.sleepers.lock().push(cur);
            self.block();
        }
        intr::set_level::<A>(old);
    }

    /// Wake every sleeper whose deadline is at or before `now`, then run the
    /// preemption check (which, from the handler, only sets the
    /// yield-on-return flag).
    pub(crate) fn wake_expired(&self, now: i64) {
        let old = intr::disable::<A>();
        loop {
            let expired = self.sleepers.lock().pop_expired(now);
            match expired {
                Some(thread) => {
                    log::trace!("tick {}: waking `{}`", now, thread.name());
                    self.unblock(&thread);
                }
                None => break,
            }
        }
        self.maybe_preempt();
        intr::set_level::<A>(old);
    }

    /// The timer interrupt body. Export this to the platform's IRQ
    /// registration at the timer vector.
    pub fn timer_interrupt(&self) {
        let old = intr::disable::<A>();
        intr::enter_handler();

        self.ticks.fetch_add(1, Ordering::AcqRel);
        self.tick_account();
        self.wake_expired(self.ticks());

        let wants_yield = intr::leave_handler();
        intr::set_level::<A>(old);
        if wants_yield {
            self.yield_now();
        }
    }

    /// Suspend for approximately `ms` milliseconds.
    pub fn msleep(&self, ms: i64) {
        self.real_time_sleep(ms, 1000);
    }

    /// Suspend for approximately `us` microseconds.
    pub fn usleep(&self, us: i64) {
        self.real_time_sleep(us, 1_000_000);
    }

    /// Suspend for approximately `ns` nanoseconds.
    pub fn nsleep(&self, ns: i64) {
        self.real_time_sleep(ns, 1_000_000_000);
    }

    /// Sleep for `num / denom` seconds: whole ticks yield the CPU, sub-tick
    /// remainders busy-wait.
    fn real_time_sleep(&self, num: i64, denom: i64) {
        // (num / denom) s * (TIMER_FREQ ticks / s), rounded down.
        let ticks = num * TIMER_FREQ / denom;

        assert_eq!(intr::get_level::<A>(), IntrLevel::On);
        if ticks > 0 {
            self.sleep(ticks);
        } else {
            // Scale numerator and denominator by 1000 to keep the
            // intermediate product from overflowing.
            assert!(denom % 1000 == 0);
            let loops = self.loops_per_tick.load(Ordering::Acquire) as i64;
            busy_wait(loops * num / 1000 * TIMER_FREQ / (denom / 1000));
        }
    }

    /// Measure `loops_per_tick`, the busy-wait unit used for sub-tick
    /// delays. Needs the timer interrupt running; call once after `start`.
    pub fn calibrate(&self) {
        assert_eq!(intr::get_level::<A>(), IntrLevel::On);
        log::info!("calibrating timer...");

        // Largest power of two that still fits in one tick.
        let mut loops_per_tick: u64 = 1 << 10;
        while !self.too_many_loops(loops_per_tick << 1) {
            loops_per_tick <<= 1;
            assert!(loops_per_tick != 0);
        }

        // Refine the next eight bits.
        let high_bit = loops_per_tick;
        let mut test_bit = high_bit >> 1;
        while test_bit != high_bit >> 10 {
            if !self.too_many_loops(high_bit | test_bit) {
                loops_per_tick |= test_bit;
            }
            test_bit >>= 1;
        }

        self.loops_per_tick.store(loops_per_tick, Ordering::Release);
        log::info!("{} loops/s", loops_per_tick.wrapping_mul(TIMER_FREQ as u64));
    }

    /// Whether `loops` busy-wait iterations span more than one tick.
    fn too_many_loops(&self, loops: u64) -> bool {
        // Wait for a tick boundary.
        let start = self.ticks();
        while self.ticks() == start {
            core::hint::spin_loop();
        }

        let start = self.ticks();
        busy_wait(loops as i64);
        start != self.ticks()
    }
}

/// Spin for `loops` iterations.
///
/// Kept out of line so inlining differences between call sites do not skew
/// the calibration.
#[inline(never)]
fn busy_wait(mut loops: i64) {
    while loops > 0 {
        loops -= 1;
        core::hint::spin_loop();
    }
}
