//! Shared helpers for the host-side test suites.

use crate::arch::{Arch, NoOpArch};
use crate::kernel::Kernel;
use crate::thread::Thread;

pub(crate) type HostKernel = Kernel<NoOpArch>;
pub(crate) type HostThread = Thread<NoOpArch>;

/// Bring up a fresh kernel the way a boot sequence would: interrupts off,
/// convert the caller into the "main" thread, create the idle thread, and
/// enable interrupts.
pub(crate) fn boot() -> HostKernel {
    let kernel = Kernel::new();
    NoOpArch::disable_interrupts();
    kernel.init().expect("kernel init failed");
    kernel.start().expect("kernel start failed");
    kernel
}

/// A blocked thread with an allocated identifier, ready to be staged onto a
/// wait queue.
pub(crate) fn blocked_thread(kernel: &HostKernel, name: &str, priority: u8) -> HostThread {
    let thread = Thread::new(name, priority, None);
    thread.set_id(kernel.allocate_tid());
    thread
}
