//! The deferred-call scheduler.
//!
//! [`Scheduler::schedule`] inserts a call and, only when the earliest pending timestamp
//! changes, re-arms the driver. When the driver's wake-up fires, the scheduler drains every
//! call due at the timestamp read once at the start of the pass, then re-arms for whatever is
//! left or tells the driver to stand down.
//!
//! Everything runs on one thread. No borrow is held across a callback or a driver call, so
//! callbacks may schedule and cancel freely while a pass is draining.
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    rc::{Rc, Weak},
};

use crate::DeferralError;

use super::{
    call::{CallHandle, CallKey, CancelCall, PendingCall},
    queue::CallQueue,
    PriorityQueue, TimeDriver, Wakeup,
};

/// What a drain pass does when a callback panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Re-arm the driver for the remaining calls, then resume unwinding. Due calls left
    /// behind run on the next wake-up.
    #[default]
    Propagate,
    /// Log the panic, count it, and keep draining.
    Isolate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerConfig {
    pub failure_policy: FailurePolicy,
}

impl SchedulerConfig {
    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }
}

struct SchedulerCore<T, D, Q> {
    queue: RefCell<Q>,
    driver: D,
    next_sequence: Cell<u64>,
    failed: Cell<u64>,
    config: SchedulerConfig,
    this: Weak<Self>,
    _time: PhantomData<fn() -> T>,
}

/// Timestamp-ordered deferred-call scheduler.
///
/// Cloning is cheap and yields another handle to the same scheduler, which is how a callback
/// gets to schedule follow-up calls.
pub struct Scheduler<T, D, Q = CallQueue<T>> {
    core: Rc<SchedulerCore<T, D, Q>>,
}

impl<T, D> Scheduler<T, D, CallQueue<T>>
where
    T: Ord + Clone + 'static,
    D: TimeDriver<T> + 'static,
{
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, SchedulerConfig::default())
    }

    pub fn with_config(driver: D, config: SchedulerConfig) -> Self {
        Self::build(driver, CallQueue::new(), config)
    }
}

impl<T, D, Q> Scheduler<T, D, Q>
where
    T: Ord + Clone + 'static,
    D: TimeDriver<T> + 'static,
    Q: PriorityQueue<T> + 'static,
{
    /// Build over a caller-supplied queue, which must be empty.
    ///
    /// Calls already in `queue` would never have armed the driver, and their keys could
    /// collide with the sequence numbers this scheduler hands out.
    pub fn with_queue(driver: D, queue: Q, config: SchedulerConfig) -> Result<Self, DeferralError> {
        if !queue.is_empty() {
            return Err(DeferralError::QueueNotEmpty {
                pending: queue.len(),
            });
        }
        Ok(Self::build(driver, queue, config))
    }

    fn build(driver: D, queue: Q, config: SchedulerConfig) -> Self {
        let core = Rc::new_cyclic(|this| SchedulerCore {
            queue: RefCell::new(queue),
            driver,
            next_sequence: Cell::new(0),
            failed: Cell::new(0),
            config,
            this: this.clone(),
            _time: PhantomData,
        });
        Self { core }
    }

    pub fn current_timestamp(&self) -> T {
        self.core.driver.current_timestamp()
    }

    /// Run `callback` once the driver's time reaches `when`.
    pub fn schedule(&self, when: T, callback: impl FnOnce() + 'static) -> CallHandle<T> {
        let core = &self.core;
        let sequence = core.next_sequence.get();
        core.next_sequence.set(sequence + 1);

        let call = PendingCall::new(CallKey::new(when, sequence), callback);
        let key = call.key().clone();
        let status = call.status_cell();

        let rearm = {
            let mut queue = core.queue.borrow_mut();
            let previously = queue.peek().map(|call| call.when().clone());
            queue.add(call);
            match queue.peek().map(|call| call.when().clone()) {
                Some(currently) if previously.as_ref() != Some(&currently) => Some(currently),
                _ => None,
            }
        };
        if let Some(at) = rearm {
            core.arm(at);
        }

        let owner: Weak<dyn CancelCall<T>> = core.this.clone();
        CallHandle::new(key, status, owner)
    }

    /// Number of calls that have neither fired nor been canceled.
    pub fn pending(&self) -> usize {
        self.core.queue.borrow().len()
    }

    pub fn is_idle(&self) -> bool {
        self.core.queue.borrow().is_empty()
    }

    /// Panics caught under [`FailurePolicy::Isolate`].
    pub fn failed_calls(&self) -> u64 {
        self.core.failed.get()
    }

    pub fn config(&self) -> SchedulerConfig {
        self.core.config
    }

    pub fn driver(&self) -> &D {
        &self.core.driver
    }
}

impl<T, D, Q> Clone for Scheduler<T, D, Q> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

impl<T, D, Q: PriorityQueue<T>> fmt::Debug for Scheduler<T, D, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.core.queue.borrow().len())
            .field("next_sequence", &self.core.next_sequence.get())
            .field("config", &self.core.config)
            .finish_non_exhaustive()
    }
}

impl<T, D, Q> SchedulerCore<T, D, Q>
where
    T: Ord + Clone + 'static,
    D: TimeDriver<T> + 'static,
    Q: PriorityQueue<T> + 'static,
{
    fn arm(&self, at: T) {
        let this = self.this.clone();
        tracing::trace!(
            pending = self.queue.borrow().len(),
            "re-arming driver for earliest call"
        );
        self.driver.reschedule(
            at,
            Wakeup::new(move || {
                if let Some(core) = this.upgrade() {
                    core.drain();
                }
            }),
        );
    }

    fn rearm_for_earliest(&self) {
        let next = self.queue.borrow().peek().map(|call| call.when().clone());
        match next {
            Some(at) => self.arm(at),
            None => {
                tracing::trace!("queue empty, driver standing down");
                self.driver.unschedule();
            }
        }
    }

    fn drain(&self) {
        let now = self.driver.current_timestamp();
        let mut fired = 0_usize;
        loop {
            let expected = {
                let queue = self.queue.borrow();
                match queue.peek() {
                    Some(call) if *call.when() <= now => call.sequence(),
                    _ => break,
                }
            };
            let popped = self.queue.borrow_mut().get();
            let call = match popped {
                Some(call) if call.sequence() == expected => call,
                other => panic!(
                    "{}",
                    DeferralError::QueueOrderViolated {
                        expected,
                        found: other.map(|call| call.sequence()),
                    }
                ),
            };
            let callback = call.mark_fired();
            fired += 1;

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                match self.config.failure_policy {
                    FailurePolicy::Propagate => {
                        self.rearm_for_earliest();
                        panic::resume_unwind(payload);
                    }
                    FailurePolicy::Isolate => {
                        self.failed.set(self.failed.get() + 1);
                        tracing::error!(
                            sequence = expected,
                            "deferred call panicked, continuing drain: {}",
                            panic_message(&*payload)
                        );
                    }
                }
            }
        }
        tracing::debug!(
            fired,
            remaining = self.queue.borrow().len(),
            "drain pass complete"
        );
        self.rearm_for_earliest();
    }
}

impl<T, D, Q> CancelCall<T> for SchedulerCore<T, D, Q>
where
    T: Ord + Clone + 'static,
    D: TimeDriver<T> + 'static,
    Q: PriorityQueue<T> + 'static,
{
    fn cancel_call(&self, key: &CallKey<T>) {
        let (removed, next) = {
            let mut queue = self.queue.borrow_mut();
            let before = queue.peek().map(|call| call.sequence());
            let Some(removed) = queue.remove(key) else {
                return;
            };
            let next = queue
                .peek()
                .map(|call| (before != Some(call.sequence()), call.when().clone()));
            (removed, next)
        };
        match next {
            None => {
                tracing::trace!("last call canceled, driver standing down");
                self.driver.unschedule();
            }
            Some((true, at)) => self.arm(at),
            Some((false, _)) => {}
        }
        // captured state may schedule from its Drop; release it only once queue and driver agree
        drop(removed);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
