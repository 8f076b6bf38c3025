//! Wall-clock driver that blocks the calling thread.
use std::{
    cell::RefCell,
    fmt, thread,
    time::{Duration, Instant},
};

use crate::scheduling::{TimeDriver, Wakeup};

/// Runs a scheduler against [`Instant`] by sleeping until each armed wake-up.
///
/// Nothing happens until [`SleepDriver::run_until_idle`] or [`SleepDriver::run_until`] is
/// called; those loop on the current thread, which is the thread the scheduler lives on.
#[derive(Default)]
pub struct SleepDriver {
    armed: RefCell<Option<(Instant, Wakeup)>>,
}

impl SleepDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_at(&self) -> Option<Instant> {
        self.armed.borrow().as_ref().map(|(at, _)| *at)
    }

    /// Fire wake-ups until nothing is armed. Returns how many fired.
    pub fn run_until_idle(&self) -> usize {
        self.run(None)
    }

    /// Fire wake-ups due no later than `deadline`.
    ///
    /// Returns as soon as nothing is armed or the next wake-up lies past `deadline`; it does
    /// not sleep out the remainder.
    pub fn run_until(&self, deadline: Instant) -> usize {
        self.run(Some(deadline))
    }

    fn run(&self, deadline: Option<Instant>) -> usize {
        let mut fired = 0;
        while let Some(at) = self.armed_at() {
            if deadline.is_some_and(|deadline| at > deadline) {
                break;
            }
            let wait = at.saturating_duration_since(Instant::now());
            if wait > Duration::ZERO {
                thread::sleep(wait);
            }
            let Some((_, wakeup)) = self.armed.borrow_mut().take() else {
                break;
            };
            wakeup.fire();
            fired += 1;
        }
        tracing::debug!(fired, "sleep driver returning");
        fired
    }
}

impl TimeDriver<Instant> for SleepDriver {
    fn current_timestamp(&self) -> Instant {
        Instant::now()
    }

    fn reschedule(&self, at: Instant, on_due: Wakeup) {
        let replaced = self.armed.borrow_mut().replace((at, on_due));
        drop(replaced);
    }

    fn unschedule(&self) {
        let disarmed = self.armed.borrow_mut().take();
        drop(disarmed);
    }
}

impl fmt::Debug for SleepDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SleepDriver")
            .field("armed_at", &self.armed_at())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Scheduler;
    use std::rc::Rc;

    #[test]
    fn test_runs_calls_in_time_order() {
        let driver = Rc::new(SleepDriver::new());
        let scheduler: Scheduler<Instant, _> = Scheduler::new(Rc::clone(&driver));
        let log = Rc::new(RefCell::new(Vec::new()));
        let start = scheduler.current_timestamp();

        for (name, ms) in [("late", 6), ("early", 1), ("middle", 3)] {
            let log = Rc::clone(&log);
            scheduler.schedule(start + Duration::from_millis(ms), move || {
                log.borrow_mut().push((name, Instant::now()))
            });
        }

        driver.run_until_idle();

        let log = log.borrow();
        let names: Vec<_> = log.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, vec!["early", "middle", "late"]);
        assert!(log
            .iter()
            .zip([1, 3, 6])
            .all(|((_, at), ms)| *at >= start + Duration::from_millis(ms)));
        assert!(driver.armed_at().is_none());
    }

    #[test]
    fn test_run_until_stops_before_later_wakeups() {
        let driver = Rc::new(SleepDriver::new());
        let scheduler: Scheduler<Instant, _> = Scheduler::new(Rc::clone(&driver));
        let start = scheduler.current_timestamp();
        let far = start + Duration::from_secs(3600);

        scheduler.schedule(start, || {});
        let pending = scheduler.schedule(far, || {});

        driver.run_until(start + Duration::from_millis(5));
        assert!(pending.is_pending());
        assert_eq!(driver.armed_at(), Some(far));

        pending.cancel();
        assert!(driver.armed_at().is_none());
        assert_eq!(driver.run_until_idle(), 0);
    }
}
