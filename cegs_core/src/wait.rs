//! Cooperative waiting.
//!
//! There is no preemption anywhere in the controller: long-running work sleeps through
//! [`Waiter`], which sleeps in short slices and checks the shutdown [`Flag`] between
//! them. A raised flag turns the next wait into `CoreError::Cancelled`. Bounded waits
//! that run out of budget fall through with `Ok(false)` instead of failing.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cegs_traits::Clock;

use crate::error::CoreError;
use crate::util::{MAX_WAIT_SLICE, next_slice};

/// A one-way, shareable boolean signal (shutdown, bring-up complete).
#[derive(Debug, Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub struct Waiter {
    clock: Arc<dyn Clock>,
    shutdown: Flag,
    slice: Duration,
}

impl Waiter {
    /// `slice` is clamped to `(0, 35ms]`.
    pub fn new(clock: Arc<dyn Clock>, shutdown: Flag, slice: Duration) -> Self {
        Self {
            clock,
            shutdown,
            slice: slice.clamp(Duration::from_millis(1), MAX_WAIT_SLICE),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn shutdown_flag(&self) -> &Flag {
        &self.shutdown
    }

    pub fn check(&self) -> Result<(), CoreError> {
        if self.shutdown.is_raised() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `d` in slices, returning early with `Cancelled` on shutdown.
    pub fn sleep(&self, d: Duration) -> Result<(), CoreError> {
        let start = self.clock.now();
        loop {
            self.check()?;
            let elapsed = self.clock.now().saturating_duration_since(start);
            if elapsed >= d {
                return Ok(());
            }
            self.clock.sleep(next_slice(d - elapsed, self.slice));
        }
    }

    /// Poll `cond` every slice until it holds (`Ok(true)`) or `budget` runs out
    /// (`Ok(false)`).
    pub fn wait_until(
        &self,
        budget: Duration,
        mut cond: impl FnMut() -> bool,
    ) -> Result<bool, CoreError> {
        let start = self.clock.now();
        loop {
            self.check()?;
            if cond() {
                return Ok(true);
            }
            let elapsed = self.clock.now().saturating_duration_since(start);
            if elapsed >= budget {
                return Ok(false);
            }
            self.clock.sleep(next_slice(budget - elapsed, self.slice));
        }
    }

    /// Wait until `now - started >= target()`, re-reading the target every slice so it
    /// can move mid-wait without restarting the elapsed time.
    pub fn wait_for_elapsed(
        &self,
        started: Instant,
        mut target: impl FnMut() -> Duration,
    ) -> Result<(), CoreError> {
        loop {
            self.check()?;
            let elapsed = self.clock.now().saturating_duration_since(started);
            let goal = target();
            if elapsed >= goal {
                return Ok(());
            }
            self.clock.sleep(next_slice(goal - elapsed, self.slice));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cegs_traits::ManualClock;

    fn waiter() -> (ManualClock, Flag, Waiter) {
        let clock = ManualClock::new();
        let flag = Flag::new();
        let w = Waiter::new(Arc::new(clock.clone()), flag.clone(), Duration::from_millis(35));
        (clock, flag, w)
    }

    #[test]
    fn sleep_runs_to_completion() {
        let (clock, _flag, w) = waiter();
        w.sleep(Duration::from_millis(100)).unwrap();
        assert_eq!(clock.elapsed(), Duration::from_millis(100));
    }

    #[test]
    fn raised_flag_cancels() {
        let (_clock, flag, w) = waiter();
        flag.raise();
        assert_eq!(w.sleep(Duration::from_secs(1)), Err(CoreError::Cancelled));
    }

    #[test]
    fn bounded_wait_falls_through() {
        let (clock, _flag, w) = waiter();
        assert_eq!(w.wait_until(Duration::from_secs(3), || false), Ok(false));
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn slice_is_capped() {
        let (clock, _flag, _) = waiter();
        let w = Waiter::new(Arc::new(clock.clone()), Flag::new(), Duration::from_secs(1));
        let mut polls = 0;
        w.wait_until(Duration::from_millis(350), || {
            polls += 1;
            false
        })
        .unwrap();
        assert_eq!(polls, 11);
    }
}
