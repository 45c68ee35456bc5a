//! Architecture abstraction layer for context switching and interrupt control.
//!
//! The scheduler core never touches registers or interrupt hardware directly;
//! everything architecture-specific goes through the [`Arch`] trait. A port
//! implements it once and instantiates `Kernel<TheirArch>`.

/// Architecture abstraction trait.
///
/// Implementations provide the context-switch primitive and interrupt
/// masking for one CPU architecture.
///
/// # Safety
///
/// Implementations involve direct hardware manipulation. Methods marked
/// unsafe have preconditions the caller must uphold.
pub trait Arch {
    /// Architecture-specific saved register frame.
    ///
    /// Must hold everything needed to fully restore a thread's execution
    /// context. `Default` produces the frame of a thread that has never run.
    type SavedContext: Send + Sync + Default;

    /// Switch from one thread context to another.
    ///
    /// This is the only place where the stack pointer crosses threads. The
    /// call "returns" on the previous thread's stack only when that thread
    /// is next chosen to run.
    ///
    /// # Safety
    ///
    /// - `prev` and `next` must point to valid, properly aligned frames that
    ///   stay alive for the duration of the call
    /// - Must be called with interrupts disabled
    /// - `next` must represent a resumable execution state
    unsafe fn context_switch(prev: *mut Self::SavedContext, next: *const Self::SavedContext);

    /// Prepare a fresh frame so that switching to it enters `entry` with
    /// `arg` as its first argument, running on `stack_top`, interrupts
    /// enabled.
    fn init_context(ctx: &mut Self::SavedContext, entry: usize, stack_top: usize, arg: usize);

    /// Disable interrupt delivery on the current CPU.
    ///
    /// Returns whether interrupts were enabled before the call, for
    /// save/restore critical sections.
    fn disable_interrupts() -> bool;

    /// Restore interrupt delivery to a state previously returned by
    /// [`Arch::disable_interrupts`].
    fn restore_interrupts(enabled: bool);

    /// Whether interrupts are currently deliverable.
    fn interrupts_enabled() -> bool;

    /// Idle the CPU until the next interrupt (or a scheduling hint on
    /// architectures without a halt instruction).
    fn wait_for_interrupt();
}

/// A software-only architecture for host testing.
///
/// The interrupt flag is tracked in software and the context switch is a
/// no-op, which lets the whole scheduler state machine run on a host: the
/// switched-from code keeps executing, but every queue, state, and priority
/// transition happens exactly as it would on hardware. Under `std-shim` (and
/// `cfg(test)`) the flag is thread-local, so parallel test threads each model
/// an independent CPU.
pub struct NoOpArch;

#[cfg(any(test, feature = "std-shim"))]
mod host_flag {
    extern crate std;
    use core::cell::Cell;

    std::thread_local! {
        pub(super) static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
    }
}

#[cfg(not(any(test, feature = "std-shim")))]
static INTERRUPTS_ENABLED: portable_atomic::AtomicBool = portable_atomic::AtomicBool::new(true);

impl Arch for NoOpArch {
    type SavedContext = ();

    unsafe fn context_switch(_prev: *mut Self::SavedContext, _next: *const Self::SavedContext) {}

    fn init_context(_ctx: &mut Self::SavedContext, _entry: usize, _stack_top: usize, _arg: usize) {}

    fn disable_interrupts() -> bool {
        #[cfg(any(test, feature = "std-shim"))]
        {
            host_flag::INTERRUPTS_ENABLED.with(|f| f.replace(false))
        }
        #[cfg(not(any(test, feature = "std-shim")))]
        {
            INTERRUPTS_ENABLED.swap(false, portable_atomic::Ordering::AcqRel)
        }
    }

    fn restore_interrupts(enabled: bool) {
        #[cfg(any(test, feature = "std-shim"))]
        {
            host_flag::INTERRUPTS_ENABLED.with(|f| f.set(enabled));
        }
        #[cfg(not(any(test, feature = "std-shim")))]
        {
            INTERRUPTS_ENABLED.store(enabled, portable_atomic::Ordering::Release);
        }
    }

    fn interrupts_enabled() -> bool {
        #[cfg(any(test, feature = "std-shim"))]
        {
            host_flag::INTERRUPTS_ENABLED.with(|f| f.get())
        }
        #[cfg(not(any(test, feature = "std-shim")))]
        {
            INTERRUPTS_ENABLED.load(portable_atomic::Ordering::Acquire)
        }
    }

    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_save_restore() {
        assert!(NoOpArch::interrupts_enabled());

        let was_on = NoOpArch::disable_interrupts();
        assert!(was_on);
        assert!(!NoOpArch::interrupts_enabled());

        // Nested disable reports the already-off state.
        let was_on = NoOpArch::disable_interrupts();
        assert!(!was_on);

        NoOpArch::restore_interrupts(true);
        assert!(NoOpArch::interrupts_enabled());
    }
}
