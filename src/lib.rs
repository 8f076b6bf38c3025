//! Timestamp-ordered deferred calls.
//!
//! A [`Scheduler`] accepts "run this no earlier than `T`" requests over any totally ordered
//! timestamp type, and keeps an external [`TimeDriver`] armed for exactly the earliest pending
//! call. Drivers for simulated time ([`drivers::memory::MemoryDriver`]) and blocking wall-clock
//! time ([`drivers::sleep::SleepDriver`]) are included.
use thiserror::Error;

pub mod drivers;
pub mod scheduling;

pub use scheduling::{
    call::{CallHandle, CallKey, CallStatus, PendingCall},
    queue::{CallQueue, HeapQueue},
    scheduler::{FailurePolicy, Scheduler, SchedulerConfig},
    PriorityQueue, TimeDriver, Wakeup,
};

/// Errors raised by drivers and scheduler construction
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeferralError {
    #[error("Ordering error occured, time travel!")]
    TimeTravel,
    #[error("Queue popped call #{found:?} after peeking call #{expected}; ordering invariant broken")]
    QueueOrderViolated { expected: u64, found: Option<u64> },
    #[error("Scheduler needs an empty queue, found {pending} pending calls")]
    QueueNotEmpty { pending: usize },
}
