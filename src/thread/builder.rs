//! Builder-style thread creation.

use crate::arch::Arch;
use crate::errors::SpawnError;
use crate::kernel::Kernel;
use crate::thread::{ThreadId, PRI_DEFAULT};

extern crate alloc;
use alloc::string::String;

/// Configure and spawn a thread.
///
/// ```ignore
/// let tid = ThreadBuilder::new()
///     .name("worker")
///     .priority(40)
///     .spawn(&kernel, || { /* thread body */ })?;
/// ```
pub struct ThreadBuilder {
    name: Option<String>,
    priority: u8,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            priority: PRI_DEFAULT,
        }
    }

    /// Name the thread, for logs and integrity diagnostics.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Scheduling priority; defaults to [`PRI_DEFAULT`].
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Spawn the configured thread on `kernel`.
    pub fn spawn<A, F>(self, kernel: &Kernel<A>, f: F) -> Result<ThreadId, SpawnError>
    where
        A: Arch + 'static,
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.as_deref().unwrap_or("unnamed");
        kernel.spawn(name, self.priority, f)
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
