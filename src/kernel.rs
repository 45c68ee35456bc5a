//! The scheduler core.
//!
//! A [`Kernel`] owns every process-wide piece of thread state: the ready
//! queue, the sleep queue, the reclamation list, the running thread, the
//! idle and boot threads, the tick counters, and the TID allocator. It is
//! initialized once, before interrupts are enabled, and torn down never.
//!
//! Scheduling is strictly by effective priority, descending, with FIFO
//! order among equals. Any operation that may have raised a ready thread
//! above the running one ends with the common preemption check
//! ([`Kernel::maybe_preempt`]), which compares the running thread against
//! the head of the ready queue and yields if the head is strictly higher.

use crate::arch::Arch;
use crate::errors::SpawnError;
use crate::intr::{self, IntrLevel};
use crate::mem::PagePool;
use crate::sched::{PriorityQueue, SleepQueue};
use crate::sync::Lock;
use crate::thread::{Thread, ThreadId, ThreadState, PRI_DEFAULT, PRI_MAX, PRI_MIN};
use portable_atomic::{AtomicBool, AtomicI64, AtomicPtr, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use spin::Mutex;

extern crate alloc;
use alloc::boxed::Box;
use alloc::vec::Vec;

/// Timer ticks each thread gets before the tick handler requests a yield.
pub const TIME_SLICE: u32 = 4;

/// The scheduler, timer integration, and thread lifecycle in one place.
pub struct Kernel<A: Arch + 'static> {
    pub(crate) ready: Mutex<PriorityQueue<A>>,
    pub(crate) sleepers: Mutex<SleepQueue<A>>,
    pub(crate) reap: Mutex<Vec<Thread<A>>>,
    pub(crate) running: Mutex<Option<Thread<A>>>,
    pub(crate) idle: Mutex<Option<Thread<A>>>,
    pub(crate) initial: Mutex<Option<Thread<A>>>,
    pub(crate) pages: PagePool,
    pub(crate) ticks: AtomicI64,
    pub(crate) slice_ticks: AtomicU32,
    pub(crate) idle_ticks: AtomicI64,
    pub(crate) kernel_ticks: AtomicI64,
    pub(crate) loops_per_tick: AtomicU64,
    tid_lock: Lock<A>,
    next_tid: AtomicUsize,
    initialized: AtomicBool,
}

impl<A: Arch + 'static> Kernel<A> {
    pub const fn new() -> Self {
        Self {
            ready: Mutex::new(PriorityQueue::new()),
            sleepers: Mutex::new(SleepQueue::new()),
            reap: Mutex::new(Vec::new()),
            running: Mutex::new(None),
            idle: Mutex::new(None),
            initial: Mutex::new(None),
            pages: PagePool::new(),
            ticks: AtomicI64::new(0),
            slice_ticks: AtomicU32::new(0),
            idle_ticks: AtomicI64::new(0),
            kernel_ticks: AtomicI64::new(0),
            loops_per_tick: AtomicU64::new(0),
            tid_lock: Lock::new(),
            next_tid: AtomicUsize::new(1),
            initialized: AtomicBool::new(false),
        }
    }

    /// Turn the running code into the first thread, named "main".
    ///
    /// Must be called with interrupts disabled, before any other operation.
    /// Fails if called twice.
    pub fn init(&self) -> Result<(), ()> {
        assert_eq!(
            intr::get_level::<A>(),
            IntrLevel::Off,
            "threading init with interrupts enabled"
        );
        self.initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ())?;

        // The boot thread runs on the stack the loader set up, so it has no
        // page of its own and is exempt from canary checks.
        let boot = Thread::new("main", PRI_DEFAULT, None);
        boot.set_state(ThreadState::Running);
        *self.running.lock() = Some(boot.clone());
        *self.initial.lock() = Some(boot.clone());
        boot.set_id(self.allocate_tid());

        log::info!("threading initialized; boot thread is `main`");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Create the idle thread and enable preemptive scheduling.
    ///
    /// The idle thread is never on the ready queue; the picker falls back to
    /// it when the queue is empty.
    pub fn start(&self) -> Result<(), SpawnError> {
        assert!(self.is_initialized(), "start before init");

        let page = self.pages.allocate().ok_or(SpawnError::OutOfMemory)?;
        page.install_canary();
        let stack_top = page.top() as usize;

        let idle = Thread::new("idle", PRI_MIN, Some(page));
        idle.set_id(self.allocate_tid());
        let entry = idle_entry::<A> as fn() -> !;
        idle.init_context(entry as usize, stack_top, 0);
        *self.idle.lock() = Some(idle);

        intr::enable::<A>();
        Ok(())
    }

    /// Spawn a kernel thread running `f`, admitted to the ready queue.
    ///
    /// Returns the new thread's identifier. If the new thread has a higher
    /// effective priority than the caller, the caller yields before this
    /// returns.
    pub fn spawn<F>(&self, name: &str, priority: u8, f: F) -> Result<ThreadId, SpawnError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_initialized() {
            return Err(SpawnError::NotInitialized);
        }
        if priority > PRI_MAX {
            return Err(SpawnError::InvalidPriority(priority));
        }

        let page = self.pages.allocate().ok_or(SpawnError::OutOfMemory)?;
        page.install_canary();
        let stack_top = page.top() as usize;

        let thread = Thread::new(name, priority, Some(page));
        let tid = self.allocate_tid();
        thread.set_id(tid);

        let closure = Box::into_raw(Box::new(f));
        let entry = thread_entry::<A, F> as fn(usize);
        thread.init_context(entry as usize, stack_top, closure as usize);

        log::debug!("spawned `{}` (tid {}, priority {})", name, tid, priority);
        self.unblock(&thread);
        self.maybe_preempt();
        Ok(tid)
    }

    /// [`Kernel::spawn`] for plain function pointers.
    pub fn spawn_fn(&self, name: &str, priority: u8, f: fn()) -> Result<ThreadId, SpawnError> {
        self.spawn(name, priority, move || f())
    }

    /// The running thread. Always defined once `init` has run.
    pub fn current(&self) -> Thread<A> {
        let thread = self
            .running
            .lock()
            .as_ref()
            .expect("no running thread before init")
            .clone();
        assert!(thread.is_valid());
        assert_eq!(thread.state(), ThreadState::Running);
        thread
    }

    /// Identifier of the running thread.
    pub fn current_tid(&self) -> ThreadId {
        self.current().id()
    }

    /// Surrender the CPU. The caller stays runnable and may be rescheduled
    /// immediately if it is still the highest-priority ready thread.
    #[inline(never)]
    pub fn yield_now(&self) {
        assert!(!intr::in_interrupt(), "yield from interrupt context");

        let old = intr::disable::<A>();
        let cur = self.current();
        if !self.is_idle(&cur) {
            self.ready.lock().push(cur);
        }
        self.do_schedule(ThreadState::Ready);
        intr::set_level::<A>(old);
    }

    /// Transition the caller to `Blocked` and run something else.
    ///
    /// Interrupts must already be disabled; the caller is responsible for
    /// having put itself on whatever wait queue it expects to be woken from.
    pub fn block(&self) {
        assert!(!intr::in_interrupt(), "block from interrupt context");
        assert_eq!(
            intr::get_level::<A>(),
            IntrLevel::Off,
            "block with interrupts enabled"
        );

        self.current().set_state(ThreadState::Blocked);
        self.schedule();
    }

    /// Move a blocked thread to the ready queue, in priority order.
    ///
    /// Does not preempt the caller: a caller that disabled interrupts may
    /// unblock a thread and update other state atomically. Run the
    /// preemption check afterwards if preemption is wanted.
    pub fn unblock(&self, thread: &Thread<A>) {
        assert!(thread.is_valid());
        let old = intr::disable::<A>();
        assert_eq!(
            thread.state(),
            ThreadState::Blocked,
            "unblocking `{}` which is not blocked",
            thread.name()
        );
        self.ready.lock().push(thread.clone());
        thread.set_state(ThreadState::Ready);
        intr::set_level::<A>(old);
    }

    /// Terminate the calling thread. Its stack is reclaimed later, by the
    /// next scheduling event on another thread's time.
    pub fn exit(&self) -> ! {
        assert!(!intr::in_interrupt(), "exit from interrupt context");

        intr::disable::<A>();
        log::debug!("`{}` exiting", self.current().name());
        self.do_schedule(ThreadState::Dying);
        // Unreachable on real hardware; the host arch switch is a no-op.
        loop {
            A::wait_for_interrupt();
        }
    }

    /// Set the caller's base priority.
    ///
    /// The effective priority stays at the donation maximum while donations
    /// are active. Yields if a ready thread now outranks the caller.
    pub fn set_priority(&self, priority: u8) {
        assert!(priority <= PRI_MAX, "priority {} out of range", priority);
        let old = intr::disable::<A>();
        let cur = self.current();
        cur.set_base_priority(priority);
        cur.refresh_priority();
        intr::set_level::<A>(old);
        self.maybe_preempt();
    }

    /// Effective priority of the caller.
    pub fn priority(&self) -> u8 {
        self.current().priority()
    }

    /// Per-tick accounting, run from the timer interrupt handler. Charges
    /// the tick and requests a yield once the running thread has consumed
    /// its time slice.
    pub(crate) fn tick_account(&self) {
        let cur = self.current();
        if self.is_idle(&cur) {
            self.idle_ticks.fetch_add(1, Ordering::AcqRel);
        } else {
            self.kernel_ticks.fetch_add(1, Ordering::AcqRel);
        }
        if self.slice_ticks.fetch_add(1, Ordering::AcqRel) + 1 >= TIME_SLICE {
            intr::yield_on_return();
        }
    }

    /// `(idle ticks, kernel ticks)` consumed since boot.
    pub fn tick_stats(&self) -> (i64, i64) {
        (
            self.idle_ticks.load(Ordering::Acquire),
            self.kernel_ticks.load(Ordering::Acquire),
        )
    }

    /// The common preemption check: if the head of the ready queue outranks
    /// the running thread, yield. From thread context that happens
    /// immediately; from a handler it goes through the yield-on-return flag.
    pub(crate) fn maybe_preempt(&self) {
        let old = intr::disable::<A>();
        let preempt = match self.ready.lock().front_priority() {
            Some(front) => self.current().priority() < front,
            None => false,
        };
        if preempt && intr::in_interrupt() {
            intr::yield_on_return();
        }
        intr::set_level::<A>(old);
        if preempt && !intr::in_interrupt() {
            self.yield_now();
        }
    }

    /// Re-sort the ready queue after donation changed queued threads'
    /// effective priorities.
    pub(crate) fn resort_ready(&self) {
        self.ready.lock().resort();
    }

    pub(crate) fn is_idle(&self, thread: &Thread<A>) -> bool {
        match self.idle.lock().as_ref() {
            Some(idle) => idle.ptr_eq(thread),
            None => false,
        }
    }

    fn is_initial(&self, thread: &Thread<A>) -> bool {
        match self.initial.lock().as_ref() {
            Some(initial) => initial.ptr_eq(thread),
            None => false,
        }
    }

    pub(crate) fn allocate_tid(&self) -> ThreadId {
        // Called from thread contexts only, so a lock suffices; the global
        // queues stay under interrupt disabling because handlers touch them.
        self.tid_lock.acquire(self);
        let raw = self.next_tid.fetch_add(1, Ordering::AcqRel);
        self.tid_lock.release(self);
        ThreadId::new(raw)
    }

    /// Reclaim dying threads, retire the caller with `status`, and run the
    /// scheduler.
    fn do_schedule(&self, status: ThreadState) {
        assert_eq!(intr::get_level::<A>(), IntrLevel::Off);
        let cur = self.current();

        loop {
            let victim = self.reap.lock().pop();
            match victim {
                Some(dead) => {
                    log::trace!("reclaiming `{}`", dead.name());
                    if let Some(page) = dead.take_stack() {
                        self.pages.deallocate(page);
                    }
                }
                None => break,
            }
        }

        cur.set_state(status);
        self.schedule();
    }

    /// Pick the next thread and switch to it.
    ///
    /// To the thread being switched out, the switch is invisible: this
    /// function simply returns, next time that thread is picked.
    #[inline(never)]
    fn schedule(&self) {
        assert_eq!(intr::get_level::<A>(), IntrLevel::Off);
        let cur = self
            .running
            .lock()
            .as_ref()
            .expect("schedule before init")
            .clone();
        assert_ne!(cur.state(), ThreadState::Running);
        assert!(
            cur.stack_ok(),
            "kernel stack overflow in `{}`",
            cur.name()
        );

        let next = match self.ready.lock().pop() {
            Some(thread) => thread,
            None => self.idle_thread(),
        };
        assert!(next.is_valid());

        next.set_state(ThreadState::Running);
        self.slice_ticks.store(0, Ordering::Release);
        *self.running.lock() = Some(next.clone());

        if !cur.ptr_eq(&next) {
            // A dying thread's page is still the stack under our feet, so it
            // only gets queued here; the free happens in a later
            // do_schedule, on someone else's stack.
            if cur.state() == ThreadState::Dying && !self.is_initial(&cur) {
                self.reap.lock().push(cur.clone());
            }
            let prev_ctx = cur.context_ptr();
            let next_ctx = next.context_ptr();
            unsafe { A::context_switch(prev_ctx, next_ctx) };
        }
    }

    fn idle_thread(&self) -> Thread<A> {
        self.idle
            .lock()
            .as_ref()
            .expect("ready queue empty before the idle thread exists")
            .clone()
    }
}

unsafe impl<A: Arch + 'static> Send for Kernel<A> {}
unsafe impl<A: Arch + 'static> Sync for Kernel<A> {}

// ============================================================================
// Global registration
// ============================================================================

static REGISTERED_KERNEL: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

impl<A: Arch + 'static> Kernel<A> {
    /// Publish this kernel for interrupt handlers and thread entry
    /// trampolines.
    ///
    /// # Safety
    ///
    /// Every later call to [`global`] must use the same `A` this kernel was
    /// instantiated with; the registry does not record the type.
    pub unsafe fn register_global(&'static self) {
        REGISTERED_KERNEL.store(self as *const _ as *mut (), Ordering::Release);
    }
}

/// The kernel registered with [`Kernel::register_global`], if any.
pub fn global<A: Arch + 'static>() -> Option<&'static Kernel<A>> {
    let ptr = REGISTERED_KERNEL.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*(ptr as *const Kernel<A>) })
    }
}

// ============================================================================
// Thread entry points
// ============================================================================

/// First frame of every spawned thread: run the closure, then exit.
fn thread_entry<A: Arch + 'static, F: FnOnce() + Send + 'static>(closure: usize) {
    // The scheduler hands control over with interrupts off.
    intr::enable::<A>();
    let f = unsafe { Box::from_raw(closure as *mut F) };
    f();
    match global::<A>() {
        Some(kernel) => kernel.exit(),
        None => loop {
            A::wait_for_interrupt();
        },
    }
}

/// Body of the idle thread: block, and halt until the next interrupt each
/// time the scheduler briefly picks it.
fn idle_entry<A: Arch + 'static>() -> ! {
    loop {
        A::disable_interrupts();
        if let Some(kernel) = global::<A>() {
            kernel.block();
        }
        // The gap between re-enabling and halting is the port's to close
        // (e.g. x86 `sti; hlt`); wait_for_interrupt is that hook.
        A::restore_interrupts(true);
        A::wait_for_interrupt();
    }
}
