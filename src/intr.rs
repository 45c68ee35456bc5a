//! Interrupt-level discipline for the scheduler's critical sections.
//!
//! Every shared queue in this crate is protected by turning interrupts off
//! around the access. The pattern is always save/mutate/restore:
//!
//! ```ignore
//! let old = intr::disable::<A>();
//! // ... touch the queues ...
//! intr::set_level::<A>(old);
//! ```
//!
//! This module also tracks whether we are inside an external interrupt
//! handler and carries the yield-on-return flag: handlers never switch
//! threads themselves, they request a yield that the handler exit path
//! performs on their behalf.

use crate::arch::Arch;

/// Interrupt delivery state of the current CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrLevel {
    /// Interrupts are deliverable.
    On,
    /// Interrupts are masked.
    Off,
}

#[cfg(any(test, feature = "std-shim"))]
mod state {
    extern crate std;
    use core::cell::Cell;

    std::thread_local! {
        pub(super) static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
        pub(super) static WANT_YIELD: Cell<bool> = const { Cell::new(false) };
    }

    pub(super) fn in_handler() -> bool {
        IN_HANDLER.with(|f| f.get())
    }

    pub(super) fn set_in_handler(v: bool) {
        IN_HANDLER.with(|f| f.set(v));
    }

    pub(super) fn want_yield() -> bool {
        WANT_YIELD.with(|f| f.get())
    }

    pub(super) fn set_want_yield(v: bool) {
        WANT_YIELD.with(|f| f.set(v));
    }
}

#[cfg(not(any(test, feature = "std-shim")))]
mod state {
    use portable_atomic::{AtomicBool, Ordering};

    static IN_HANDLER: AtomicBool = AtomicBool::new(false);
    static WANT_YIELD: AtomicBool = AtomicBool::new(false);

    pub(super) fn in_handler() -> bool {
        IN_HANDLER.load(Ordering::Acquire)
    }

    pub(super) fn set_in_handler(v: bool) {
        IN_HANDLER.store(v, Ordering::Release);
    }

    pub(super) fn want_yield() -> bool {
        WANT_YIELD.load(Ordering::Acquire)
    }

    pub(super) fn set_want_yield(v: bool) {
        WANT_YIELD.store(v, Ordering::Release);
    }
}

/// Current interrupt level.
pub fn get_level<A: Arch + 'static>() -> IntrLevel {
    if A::interrupts_enabled() {
        IntrLevel::On
    } else {
        IntrLevel::Off
    }
}

/// Disable interrupts and return the previous level.
pub fn disable<A: Arch + 'static>() -> IntrLevel {
    if A::disable_interrupts() {
        IntrLevel::On
    } else {
        IntrLevel::Off
    }
}

/// Enable interrupts and return the previous level.
///
/// Must not be called from an interrupt handler: the handler exit path owns
/// re-enabling.
pub fn enable<A: Arch + 'static>() -> IntrLevel {
    assert!(!in_interrupt(), "interrupts enabled inside a handler");
    set_level::<A>(IntrLevel::On)
}

/// Set the interrupt level, returning the previous one.
pub fn set_level<A: Arch + 'static>(level: IntrLevel) -> IntrLevel {
    let old = get_level::<A>();
    A::restore_interrupts(level == IntrLevel::On);
    old
}

/// Whether the CPU is currently executing an external interrupt handler.
pub fn in_interrupt() -> bool {
    state::in_handler()
}

/// Request that the current thread yields when the running interrupt handler
/// returns.
///
/// Handlers cannot switch threads directly, so preemption decisions made in
/// interrupt context are deferred through this flag.
pub fn yield_on_return() {
    assert!(in_interrupt(), "yield_on_return outside a handler");
    state::set_want_yield(true);
}

/// Mark the start of an external interrupt handler body.
pub(crate) fn enter_handler() {
    assert!(!state::in_handler(), "nested external interrupt handler");
    state::set_in_handler(true);
}

/// Mark the end of an external interrupt handler body.
///
/// Returns whether a yield was requested while the handler ran; the flag is
/// consumed.
pub(crate) fn leave_handler() -> bool {
    assert!(state::in_handler());
    state::set_in_handler(false);
    let wanted = state::want_yield();
    state::set_want_yield(false);
    wanted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::NoOpArch;

    #[test]
    fn level_save_restore_nests() {
        assert_eq!(get_level::<NoOpArch>(), IntrLevel::On);

        let outer = disable::<NoOpArch>();
        assert_eq!(outer, IntrLevel::On);
        assert_eq!(get_level::<NoOpArch>(), IntrLevel::Off);

        let inner = disable::<NoOpArch>();
        assert_eq!(inner, IntrLevel::Off);
        set_level::<NoOpArch>(inner);
        assert_eq!(get_level::<NoOpArch>(), IntrLevel::Off);

        set_level::<NoOpArch>(outer);
        assert_eq!(get_level::<NoOpArch>(), IntrLevel::On);
    }

    #[test]
    fn yield_flag_consumed_on_handler_exit() {
        enter_handler();
        assert!(in_interrupt());
        yield_on_return();
        assert!(leave_handler());
        assert!(!in_interrupt());

        // Flag does not stick across handlers.
        enter_handler();
        assert!(!leave_handler());
    }

    #[test]
    #[should_panic(expected = "outside a handler")]
    fn yield_on_return_requires_handler_context() {
        yield_on_return();
    }
}
