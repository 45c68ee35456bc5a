//! Monitor-style condition variables, Mesa semantics.
//!
//! Each waiter parks on its own zero-initialized semaphore; the condition
//! keeps a list of those. Signal and wakeup are not atomic (Mesa, not
//! Hoare), so woken waiters must re-test their predicate.

use crate::arch::Arch;
use crate::intr;
use crate::kernel::Kernel;
use crate::mem::ArcLite;
use crate::sync::{Lock, Semaphore};
use crate::thread::Thread;
use spin::Mutex;

extern crate alloc;
use alloc::vec::Vec;

pub(crate) struct CondWaiter<A: Arch + 'static> {
    pub(crate) thread: Thread<A>,
    pub(crate) semaphore: Semaphore<A>,
}

/// A condition variable, always used together with one [`Lock`].
///
/// One lock may serve any number of conditions, but each condition belongs
/// to a single lock.
pub struct Condvar<A: Arch + 'static> {
    pub(crate) waiters: Mutex<Vec<ArcLite<CondWaiter<A>>>>,
}

impl<A: Arch + 'static> Condvar<A> {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Atomically release `lock` and suspend until signaled; `lock` is
    /// reacquired before returning.
    ///
    /// The caller must hold `lock` and must re-test its predicate after
    /// waking. Must not be called from an interrupt handler.
    pub fn wait(&self, kernel: &Kernel<A>, lock: &Lock<A>) {
        assert!(!intr::in_interrupt(), "condition wait in interrupt context");
        assert!(
            lock.held_by_current(kernel),
            "condition wait without holding the lock"
        );

        let waiter = ArcLite::new(CondWaiter {
            thread: kernel.current(),
            semaphore: Semaphore::new(0),
        });
        self.waiters.lock().push(waiter.clone());

        lock.release(kernel);
        waiter.semaphore.down(kernel);
        lock.acquire(kernel);
    }

    /// Wake one waiter, if any: the one whose thread has the highest
    /// effective priority *now*.
    ///
    /// Priorities can change while a waiter is parked (donation through an
    /// unrelated lock), so the ordering is established here, not at wait
    /// time. The caller must hold `lock`.
    pub fn signal(&self, kernel: &Kernel<A>, lock: &Lock<A>) {
        assert!(!intr::in_interrupt(), "condition signal in interrupt context");
        assert!(
            lock.held_by_current(kernel),
            "condition signal without holding the lock"
        );

        let next = {
            let mut waiters = self.waiters.lock();
            waiters.sort_by(|a, b| b.thread.priority().cmp(&a.thread.priority()));
            if waiters.is_empty() {
                None
            } else {
                Some(waiters.remove(0))
            }
        };
        if let Some(waiter) = next {
            waiter.semaphore.up(kernel);
        }
    }

    /// Wake every waiter. Equivalent to signaling until the list is empty.
    pub fn broadcast(&self, kernel: &Kernel<A>, lock: &Lock<A>) {
        while !self.waiters.lock().is_empty() {
            self.signal(kernel, lock);
        }
    }
}

impl<A: Arch + 'static> Default for Condvar<A> {
    fn default() -> Self {
        Self::new()
    }
}
