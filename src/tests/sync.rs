//! Semaphore wake ordering and condition-variable signal ordering.

use super::support::{blocked_thread, boot};
use crate::arch::NoOpArch;
use crate::intr;
use crate::mem::ArcLite;
use crate::sync::condvar::CondWaiter;
use crate::sync::{Condvar, Lock, Semaphore};
use crate::thread::ThreadState;
use portable_atomic::Ordering;

type HostSema = Semaphore<NoOpArch>;
type HostLock = Lock<NoOpArch>;
type HostCond = Condvar<NoOpArch>;

#[test]
fn down_consumes_available_value_without_blocking() {
    let k = boot();
    let sema = HostSema::new(3);

    sema.down(&k);
    sema.down(&k);
    assert_eq!(sema.value.load(Ordering::Acquire), 1);
    assert_eq!(k.current().name(), "main");
}

#[test]
fn up_wakes_the_highest_priority_waiter() {
    let k = boot();
    let sema = HostSema::new(0);

    let low = blocked_thread(&k, "low", 10);
    let high = blocked_thread(&k, "high", 20);
    sema.waiters.lock().push(low.clone());
    sema.waiters.lock().push(high.clone());

    sema.up(&k);

    assert_eq!(high.state(), ThreadState::Ready);
    assert_eq!(low.state(), ThreadState::Blocked);
    assert_eq!(sema.value.load(Ordering::Acquire), 1);
}

#[test]
fn up_resorts_waiters_whose_priority_rose_while_queued() {
    let k = boot();
    let sema = HostSema::new(0);

    let early = blocked_thread(&k, "early", 10);
    let late = blocked_thread(&k, "late", 20);
    sema.waiters.lock().push(early.clone());
    sema.waiters.lock().push(late.clone());

    // A donation boosted the earlier waiter after it queued.
    early.raise_priority(25);
    sema.up(&k);

    assert_eq!(early.state(), ThreadState::Ready);
    assert_eq!(late.state(), ThreadState::Blocked);
}

#[test]
fn up_from_a_handler_defers_preemption() {
    let k = boot();
    let sema = HostSema::new(0);
    let urgent = blocked_thread(&k, "urgent", 60);
    sema.waiters.lock().push(urgent.clone());

    intr::enter_handler();
    sema.up(&k);
    // Still the interrupted thread; the handler only requested a yield.
    assert_eq!(k.current().name(), "main");
    assert!(intr::leave_handler());

    assert_eq!(urgent.state(), ThreadState::Ready);
}

#[test]
fn up_preempts_immediately_from_thread_context() {
    let k = boot();
    let sema = HostSema::new(0);
    let urgent = blocked_thread(&k, "urgent", 60);
    sema.waiters.lock().push(urgent.clone());

    sema.up(&k);

    assert!(k.current().ptr_eq(&urgent));
}

#[test]
fn ups_accumulate_for_later_downs() {
    let k = boot();
    let sema = HostSema::new(0);

    for _ in 0..3 {
        sema.up(&k);
    }
    for _ in 0..3 {
        assert!(sema.try_down());
    }
    assert!(!sema.try_down());
}

fn stage_cond_waiter(
    cond: &HostCond,
    thread: &super::support::HostThread,
) -> ArcLite<CondWaiter<NoOpArch>> {
    let waiter = ArcLite::new(CondWaiter {
        thread: thread.clone(),
        semaphore: Semaphore::new(0),
    });
    // Park the thread on its private semaphore, as cond_wait would.
    waiter.semaphore.waiters.lock().push(thread.clone());
    cond.waiters.lock().push(waiter.clone());
    waiter
}

#[test]
fn signal_wakes_the_highest_priority_waiter_at_signal_time() {
    let k = boot();
    let m = HostLock::new();
    m.acquire(&k);
    let cond = HostCond::new();

    let first = blocked_thread(&k, "first", 20);
    let second = blocked_thread(&k, "second", 10);
    let w_first = stage_cond_waiter(&cond, &first);
    let w_second = stage_cond_waiter(&cond, &second);

    // An unrelated donation boosts the first waiter while it is parked;
    // ordering must be established at signal time, not at wait time.
    first.raise_priority(25);

    cond.signal(&k, &m);
    assert_eq!(first.state(), ThreadState::Ready);
    assert_eq!(second.state(), ThreadState::Blocked);
    assert_eq!(w_first.semaphore.value.load(Ordering::Acquire), 1);
    assert_eq!(w_second.semaphore.value.load(Ordering::Acquire), 0);
    assert_eq!(cond.waiters.lock().len(), 1);
}

#[test]
fn signal_on_an_empty_condition_is_a_noop() {
    let k = boot();
    let m = HostLock::new();
    m.acquire(&k);
    let cond = HostCond::new();

    cond.signal(&k, &m);
    assert_eq!(k.current().name(), "main");
}

#[test]
fn broadcast_drains_every_waiter() {
    let k = boot();
    let m = HostLock::new();
    m.acquire(&k);
    let cond = HostCond::new();

    let a = blocked_thread(&k, "a", 10);
    let b = blocked_thread(&k, "b", 20);
    stage_cond_waiter(&cond, &a);
    stage_cond_waiter(&cond, &b);

    cond.broadcast(&k, &m);

    assert!(cond.waiters.lock().is_empty());
    assert_eq!(a.state(), ThreadState::Ready);
    assert_eq!(b.state(), ThreadState::Ready);
}

#[test]
#[should_panic(expected = "without holding the lock")]
fn signaling_without_the_lock_is_fatal() {
    let k = boot();
    let m = HostLock::new();
    let cond = HostCond::new();
    cond.signal(&k, &m);
}
