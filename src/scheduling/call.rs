//! Pending call records and the handles that cancel them.
use std::{
    cell::Cell,
    fmt,
    rc::{Rc, Weak},
};

/// Ordering key and identity of a pending call.
///
/// Field order matters: the derived ordering compares `when` first and breaks ties on
/// `sequence`, so two calls at the same timestamp fire in the order they were scheduled.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallKey<T> {
    pub when: T,
    pub sequence: u64,
}

impl<T> CallKey<T> {
    pub fn new(when: T, sequence: u64) -> Self {
        Self { when, sequence }
    }
}

/// Lifecycle of a call. Moves `Pending -> Fired` or `Pending -> Canceled`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Pending,
    Fired,
    Canceled,
}

/// A deferred callback waiting in a [`PriorityQueue`](super::PriorityQueue).
pub struct PendingCall<T> {
    key: CallKey<T>,
    callback: Box<dyn FnOnce()>,
    status: Rc<Cell<CallStatus>>,
}

impl<T> PendingCall<T> {
    pub fn new(key: CallKey<T>, callback: impl FnOnce() + 'static) -> Self {
        Self {
            key,
            callback: Box::new(callback),
            status: Rc::new(Cell::new(CallStatus::Pending)),
        }
    }

    pub fn key(&self) -> &CallKey<T> {
        &self.key
    }

    pub fn when(&self) -> &T {
        &self.key.when
    }

    pub fn sequence(&self) -> u64 {
        self.key.sequence
    }

    pub fn status(&self) -> CallStatus {
        self.status.get()
    }

    pub(crate) fn status_cell(&self) -> Rc<Cell<CallStatus>> {
        Rc::clone(&self.status)
    }

    /// Mark the call fired and hand back its callback. Only the drain loop calls this.
    pub(crate) fn mark_fired(self) -> Box<dyn FnOnce()> {
        debug_assert_eq!(self.status.get(), CallStatus::Pending);
        self.status.set(CallStatus::Fired);
        self.callback
    }
}

impl<T: fmt::Debug> fmt::Debug for PendingCall<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("key", &self.key)
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}

/// Removal path a handle resolves its call through.
pub(crate) trait CancelCall<T> {
    fn cancel_call(&self, key: &CallKey<T>);
}

/// Capability to cancel exactly one pending call.
///
/// Dropping a handle does not cancel anything; the call still fires when due.
pub struct CallHandle<T> {
    key: CallKey<T>,
    status: Rc<Cell<CallStatus>>,
    owner: Weak<dyn CancelCall<T>>,
}

impl<T> CallHandle<T> {
    pub(crate) fn new(
        key: CallKey<T>,
        status: Rc<Cell<CallStatus>>,
        owner: Weak<dyn CancelCall<T>>,
    ) -> Self {
        Self { key, status, owner }
    }

    /// Cancel the call if it has neither fired nor been canceled; otherwise do nothing.
    ///
    /// By the time this returns the call is either already fired or will never fire.
    pub fn cancel(&self) {
        if self.status.get() != CallStatus::Pending {
            return;
        }
        self.status.set(CallStatus::Canceled);
        // a dropped scheduler can no longer fire anything
        if let Some(owner) = self.owner.upgrade() {
            owner.cancel_call(&self.key);
        }
    }

    pub fn status(&self) -> CallStatus {
        self.status.get()
    }

    pub fn is_pending(&self) -> bool {
        self.status.get() == CallStatus::Pending
    }

    pub fn key(&self) -> &CallKey<T> {
        &self.key
    }

    pub fn when(&self) -> &T {
        &self.key.when
    }
}

impl<T: fmt::Debug> fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("key", &self.key)
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}
