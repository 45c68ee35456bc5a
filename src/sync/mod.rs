//! Synchronization primitives: counting semaphores, locks with priority
//! donation, and Mesa-style condition variables.
//!
//! All three are built for the uniprocessor model: their waiter lists are
//! protected by disabling interrupts, and "concurrency" means interleaving
//! with interrupt handlers and with other threads at suspension points.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condvar;
pub use lock::{Lock, MAX_DONATION_DEPTH};
pub use semaphore::Semaphore;
