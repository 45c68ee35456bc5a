//! Error types for thread creation.
//!
//! Only resource problems are reported as errors. Precondition violations
//! (blocking from a handler, recursive lock acquisition, unblocking a thread
//! that is not blocked) are kernel bugs and fail hard through assertions.

use core::fmt;

/// Errors that can occur while spawning a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// The threading system has not been initialized yet.
    NotInitialized,
    /// No page was available for the thread's stack.
    OutOfMemory,
    /// The requested priority is outside the valid range.
    InvalidPriority(u8),
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NotInitialized => write!(f, "threading system not initialized"),
            SpawnError::OutOfMemory => write!(f, "out of memory for thread stack"),
            SpawnError::InvalidPriority(p) => write!(f, "invalid priority: {}", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn display_messages() {
        assert_eq!(
            SpawnError::NotInitialized.to_string(),
            "threading system not initialized"
        );
        assert_eq!(SpawnError::InvalidPriority(200).to_string(), "invalid priority: 200");
    }
}
