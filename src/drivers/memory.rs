//! Simulated-time driver.
//!
//! Time only moves when [`MemoryDriver::advance_to`] (or [`MemoryDriver::advance`]) is called,
//! which makes scheduling deterministic and free of real sleeps.
use std::{cell::RefCell, fmt, ops::Add};

use crate::{
    scheduling::{TimeDriver, Wakeup},
    DeferralError,
};

/// Virtual clock holding at most one armed wake-up.
pub struct MemoryDriver<T> {
    now: RefCell<T>,
    armed: RefCell<Option<(T, Wakeup)>>,
}

impl<T: Ord + Clone> MemoryDriver<T> {
    pub fn new(start: T) -> Self {
        Self {
            now: RefCell::new(start),
            armed: RefCell::new(None),
        }
    }

    pub fn now(&self) -> T {
        self.now.borrow().clone()
    }

    /// Timestamp of the armed wake-up, if any.
    pub fn armed_at(&self) -> Option<T> {
        self.armed.borrow().as_ref().map(|(at, _)| at.clone())
    }

    pub fn is_armed(&self) -> bool {
        self.armed.borrow().is_some()
    }

    /// Move the clock to `to` and fire the armed wake-up while it is due.
    ///
    /// Returns the number of wake-ups fired. A wake-up may re-arm the driver; it fires again
    /// in the same call only if the new timestamp is also due.
    pub fn advance_to(&self, to: T) -> Result<usize, DeferralError> {
        if to < *self.now.borrow() {
            return Err(DeferralError::TimeTravel);
        }
        *self.now.borrow_mut() = to.clone();

        let mut fired = 0;
        loop {
            let due = {
                let mut armed = self.armed.borrow_mut();
                match armed.as_ref() {
                    Some((at, _)) if *at <= to => armed.take(),
                    _ => None,
                }
            };
            match due {
                Some((_, wakeup)) => {
                    wakeup.fire();
                    fired += 1;
                }
                None => break,
            }
        }
        Ok(fired)
    }

    /// Move the clock forward by `delta`.
    pub fn advance<D>(&self, delta: D) -> Result<usize, DeferralError>
    where
        T: Add<D, Output = T>,
    {
        let to = self.now() + delta;
        self.advance_to(to)
    }
}

impl<T: Clone> TimeDriver<T> for MemoryDriver<T> {
    fn current_timestamp(&self) -> T {
        self.now.borrow().clone()
    }

    fn reschedule(&self, at: T, on_due: Wakeup) {
        let replaced = self.armed.borrow_mut().replace((at, on_due));
        drop(replaced);
    }

    fn unschedule(&self) {
        let disarmed = self.armed.borrow_mut().take();
        drop(disarmed);
    }
}

impl<T: fmt::Debug> fmt::Debug for MemoryDriver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("now", &self.now.borrow())
            .field(
                "armed_at",
                &self.armed.borrow().as_ref().map(|(at, _)| at),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{cell::Cell, rc::Rc, time::Duration};

    #[test]
    fn test_fires_only_when_due() {
        let driver = MemoryDriver::new(0_u64);
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        driver.reschedule(10, Wakeup::new(move || counter.set(counter.get() + 1)));

        assert_eq!(driver.advance_to(9), Ok(0));
        assert_eq!(hits.get(), 0);
        assert_eq!(driver.armed_at(), Some(10));

        assert_eq!(driver.advance(1_u64), Ok(1));
        assert_eq!(hits.get(), 1);
        assert!(!driver.is_armed());
        assert_eq!(driver.now(), 10);
    }

    #[test]
    fn test_last_reschedule_wins() {
        let driver = MemoryDriver::new(0_u64);
        let which = Rc::new(Cell::new(""));
        let first = Rc::clone(&which);
        let second = Rc::clone(&which);
        driver.reschedule(5, Wakeup::new(move || first.set("first")));
        driver.reschedule(7, Wakeup::new(move || second.set("second")));

        assert_eq!(driver.advance_to(6), Ok(0));
        assert_eq!(driver.advance_to(7), Ok(1));
        assert_eq!(which.get(), "second");
    }

    #[test]
    fn test_unschedule_disarms() {
        let driver = MemoryDriver::new(0_u64);
        driver.unschedule();
        driver.reschedule(1, Wakeup::new(|| panic!("disarmed wake-up fired")));
        driver.unschedule();
        assert!(!driver.is_armed());
        assert_eq!(driver.advance_to(100), Ok(0));
    }

    #[test]
    fn test_rejects_time_travel() {
        let driver = MemoryDriver::new(Duration::from_secs(5));
        assert_eq!(
            driver.advance_to(Duration::from_secs(4)),
            Err(DeferralError::TimeTravel)
        );
        assert_eq!(driver.now(), Duration::from_secs(5));
        assert_eq!(driver.advance(Duration::from_millis(500)), Ok(0));
        assert_eq!(driver.now(), Duration::from_millis(5_500));
    }

    #[test]
    fn test_wakeup_that_rearms_into_the_past_fires_again() {
        let driver = Rc::new(MemoryDriver::new(0_u64));
        let hits = Rc::new(Cell::new(0));
        let (inner_driver, counter) = (Rc::clone(&driver), Rc::clone(&hits));
        driver.reschedule(
            3,
            Wakeup::new(move || {
                counter.set(counter.get() + 1);
                let counter = Rc::clone(&counter);
                inner_driver.reschedule(4, Wakeup::new(move || counter.set(counter.get() + 1)));
            }),
        );

        assert_eq!(driver.advance_to(5), Ok(2));
        assert_eq!(hits.get(), 2);
    }
}
