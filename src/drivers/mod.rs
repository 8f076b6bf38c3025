//! Time drivers a [`Scheduler`](crate::Scheduler) can be wired to.
//!
//! `memory` drives a scheduler through simulated time for tests and discrete-event
//! simulations. `sleep` parks the calling thread until each armed wake-up is due.
pub mod memory;
pub mod sleep;
