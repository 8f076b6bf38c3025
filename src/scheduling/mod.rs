//! Deferred-call scheduling over an abstract, totally ordered timestamp.
//!
//! The scheduler itself lives in [`scheduler`]. It consumes two boundaries declared here:
//! a [`TimeDriver`] that knows what time it is and can wake the scheduler later, and a
//! [`PriorityQueue`] that keeps pending calls in ascending `(when, sequence)` order.
use std::fmt;

use self::call::{CallKey, PendingCall};

pub mod call;
pub mod queue;
pub mod scheduler;

/// Action a driver runs once its armed timestamp is reached.
pub struct Wakeup(Box<dyn FnOnce()>);

impl Wakeup {
    pub fn new(action: impl FnOnce() + 'static) -> Self {
        Self(Box::new(action))
    }

    /// Consume the wake-up and run it.
    pub fn fire(self) {
        (self.0)()
    }
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Wakeup")
    }
}

/// Source of "now" plus a single re-armable wake-up.
///
/// Methods take `&self`: a driver is shared between the scheduler and whatever runs the
/// event loop, so implementations use interior mutability. A driver must release its own
/// borrows before firing a [`Wakeup`], since the scheduler calls back into it while draining.
pub trait TimeDriver<T> {
    /// Current time. Side-effect free.
    fn current_timestamp(&self) -> T;
    /// Arm a wake-up at `at`, replacing any armed one (last call wins).
    fn reschedule(&self, at: T, on_due: Wakeup);
    /// Disarm. No-op when nothing is armed.
    fn unschedule(&self);
}

impl<T, D: TimeDriver<T> + ?Sized> TimeDriver<T> for std::rc::Rc<D> {
    fn current_timestamp(&self) -> T {
        (**self).current_timestamp()
    }

    fn reschedule(&self, at: T, on_due: Wakeup) {
        (**self).reschedule(at, on_due)
    }

    fn unschedule(&self) {
        (**self).unschedule()
    }
}

/// Pending calls kept in ascending `(when, sequence)` order.
pub trait PriorityQueue<T> {
    fn add(&mut self, call: PendingCall<T>);
    /// The minimum, without removing it.
    fn peek(&self) -> Option<&PendingCall<T>>;
    /// Remove and return the minimum.
    fn get(&mut self) -> Option<PendingCall<T>>;
    /// Remove the call identified by `key`, wherever it sits. `None` if absent.
    fn remove(&mut self, key: &CallKey<T>) -> Option<PendingCall<T>>;
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
