//! Mutual-exclusion locks with multi-level priority donation.
//!
//! A lock is a one-valued semaphore plus an owner. The owner matters twice:
//! re-acquisition by the holder is rejected, and a blocked high-priority
//! acquirer donates its effective priority to the holder, transitively
//! along the chain of locks the holders themselves are waiting on, so a
//! low-priority holder cannot starve it through a middle-priority thread
//! (priority inversion).

use crate::arch::Arch;
use crate::intr;
use crate::kernel::Kernel;
use crate::sync::Semaphore;
use crate::thread::Thread;
use spin::Mutex;

/// Donation propagation stops after this many hops.
///
/// In a correct program the `waits-on → holder` chain is acyclic (a cycle
/// would be a deadlock the scheduler does not resolve); the cap keeps a
/// buggy caller's cycle from looping forever.
pub const MAX_DONATION_DEPTH: usize = 8;

/// A mutual-exclusion lock.
///
/// Unlike a semaphore, a lock has an owner: only the thread that acquired
/// it may release it, and acquiring it twice is an error, not a deadlock.
pub struct Lock<A: Arch + 'static> {
    pub(crate) holder: Mutex<Option<Thread<A>>>,
    pub(crate) semaphore: Semaphore<A>,
}

impl<A: Arch + 'static> Lock<A> {
    pub const fn new() -> Self {
        Self {
            holder: Mutex::new(None),
            semaphore: Semaphore::new(1),
        }
    }

    /// Acquire the lock, sleeping until it is available.
    ///
    /// While blocked, the caller donates its effective priority along the
    /// holder chain. Must not be called from an interrupt handler or by the
    /// current holder.
    pub fn acquire(&self, kernel: &Kernel<A>) {
        assert!(!intr::in_interrupt(), "lock acquire in interrupt context");
        assert!(!self.held_by_current(kernel), "lock already held by caller");

        let old = intr::disable::<A>();
        let cur = kernel.current();

        cur.set_wait_on_lock(self);
        let holder = self.holder.lock().clone();
        if let Some(holder) = holder {
            holder.add_donation(cur.clone(), self);
            donate(kernel, &cur);
        }

        self.semaphore.down(kernel);
        *self.holder.lock() = Some(cur.clone());
        cur.clear_wait_on_lock();

        intr::set_level::<A>(old);
    }

    /// Acquire the lock only if it is free. Never blocks, so it is
    /// handler-safe. Returns whether the lock was taken.
    pub fn try_acquire(&self, kernel: &Kernel<A>) -> bool {
        assert!(!self.held_by_current(kernel), "lock already held by caller");

        let success = self.semaphore.try_down();
        if success {
            *self.holder.lock() = Some(kernel.current());
        }
        success
    }

    /// Release the lock, which the caller must hold.
    ///
    /// Every donation received through this lock is dropped and the
    /// caller's effective priority recomputed before the highest-priority
    /// waiter is woken; if that waiter outranks the caller, the caller is
    /// preempted before this returns.
    pub fn release(&self, kernel: &Kernel<A>) {
        assert!(self.held_by_current(kernel), "releasing a lock not held");

        let old = intr::disable::<A>();
        let cur = kernel.current();

        cur.remove_donations_for(self);
        cur.refresh_priority();

        *self.holder.lock() = None;
        self.semaphore.up(kernel);

        intr::set_level::<A>(old);
    }

    /// Whether the calling thread holds this lock.
    ///
    /// Asking about another thread's ownership would be racy, so that is
    /// deliberately not offered.
    pub fn held_by_current(&self, kernel: &Kernel<A>) -> bool {
        match self.holder.lock().as_ref() {
            Some(holder) => holder.ptr_eq(&kernel.current()),
            None => false,
        }
    }
}

impl<A: Arch + 'static> Default for Lock<A> {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the chain `donor → wait_on_lock → holder → wait_on_lock → …`,
/// raising each holder's effective priority to the donor's. Stops when the
/// chain ends, when a holder already ranks at least as high, or at
/// [`MAX_DONATION_DEPTH`] hops.
pub(crate) fn donate<A: Arch + 'static>(kernel: &Kernel<A>, donor: &Thread<A>) {
    let mut depth = 0;
    let mut lock_ptr = donor.wait_on_lock();

    while !lock_ptr.is_null() && depth < MAX_DONATION_DEPTH {
        depth += 1;
        // Safety: a non-null wait_on_lock refers to a lock some thread is
        // inside `acquire` on, so the referent is alive; interrupts are off,
        // so no release can run under us on this CPU.
        let lock = unsafe { &*lock_ptr };

        let holder = lock.holder.lock().clone();
        let Some(holder) = holder else { break };
        if holder.priority() >= donor.priority() {
            break;
        }
        holder.raise_priority(donor.priority());
        lock_ptr = holder.wait_on_lock();
    }

    // Boosted threads may already sit on the ready queue.
    kernel.resort_ready();
}
