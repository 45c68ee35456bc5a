//! Counting semaphores with priority-ordered waiter lists.

use crate::arch::Arch;
use crate::intr;
use crate::kernel::Kernel;
use crate::sched::PriorityQueue;
use portable_atomic::{AtomicU32, Ordering};
use spin::Mutex;

/// A counting semaphore.
///
/// The value counts available wakeups: at any quiescent moment either the
/// value is zero with waiters queued, or positive with none, never both.
/// Waiters queue in effective-priority order and the list is re-sorted at
/// wake time, because a queued thread's priority can rise through donation
/// while it waits.
pub struct Semaphore<A: Arch + 'static> {
    pub(crate) value: AtomicU32,
    pub(crate) waiters: Mutex<PriorityQueue<A>>,
}

impl<A: Arch + 'static> Semaphore<A> {
    pub const fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
            waiters: Mutex::new(PriorityQueue::new()),
        }
    }

    /// The "P" operation: wait until the value is positive, then decrement.
    ///
    /// May block, so it must not be called from an interrupt handler. It may
    /// be called with interrupts disabled; if it blocks, the next scheduled
    /// thread will typically re-enable them.
    pub fn down(&self, kernel: &Kernel<A>) {
        assert!(!intr::in_interrupt(), "semaphore down in interrupt context");

        let old = intr::disable::<A>();
        while self.value.load(Ordering::Acquire) == 0 {
            self.waiters.lock().push(kernel.current());
            kernel.block();
        }
        self.value.fetch_sub(1, Ordering::AcqRel);
        intr::set_level::<A>(old);
    }

    /// Decrement the value only if it is already positive. Never blocks, so
    /// it is handler-safe. Returns whether the decrement happened.
    pub fn try_down(&self) -> bool {
        let old = intr::disable::<A>();
        let success = if self.value.load(Ordering::Acquire) > 0 {
            self.value.fetch_sub(1, Ordering::AcqRel);
            true
        } else {
            false
        };
        intr::set_level::<A>(old);
        success
    }

    /// The "V" operation: increment the value and wake the
    /// highest-priority waiter, if any. Handler-safe.
    ///
    /// The waiter list is re-sorted before the pop: insertion order can be
    /// stale because donations may have raised a queued thread's priority.
    pub fn up(&self, kernel: &Kernel<A>) {
        let old = intr::disable::<A>();

        let woken = {
            let mut waiters = self.waiters.lock();
            waiters.resort();
            waiters.pop()
        };
        if let Some(thread) = woken {
            kernel.unblock(&thread);
        }
        self.value.fetch_add(1, Ordering::AcqRel);

        kernel.maybe_preempt();
        intr::set_level::<A>(old);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_down_counts_down_to_zero() {
        let sema: Semaphore<crate::arch::NoOpArch> = Semaphore::new(2);
        assert!(sema.try_down());
        assert!(sema.try_down());
        assert!(!sema.try_down());
        assert_eq!(sema.value.load(Ordering::Acquire), 0);
    }
}
