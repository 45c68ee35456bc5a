//! Scenario and property suites exercising the scheduler end to end on the
//! host architecture.
//!
//! `NoOpArch`'s context switch is a no-op, so control never really leaves
//! the test body; what these tests drive and observe is every state
//! transition the scheduler makes: queue contents and order, thread states,
//! priorities, donations, and the current-thread slot.

mod support;
mod sync;
