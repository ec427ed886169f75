//! Hierarchical progress tracking for long procedures.
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cegs_traits::Clock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFrame {
    pub description: String,
    pub started: Instant,
}

/// Stack of named frames. `start` pushes, `end` pops, `clear` empties.
///
/// Shared between the process worker (writer) and the scheduler/UI (readers).
pub struct StepTracker {
    name: &'static str,
    clock: Arc<dyn Clock>,
    frames: Mutex<Vec<StepFrame>>,
}

impl StepTracker {
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            clock,
            frames: Mutex::new(Vec::new()),
        }
    }

    pub fn start(&self, description: &str) {
        tracing::debug!(tracker = self.name, step = description, "start");
        if let Ok(mut f) = self.frames.lock() {
            f.push(StepFrame {
                description: description.to_owned(),
                started: self.clock.now(),
            });
        }
    }

    /// Pop the current frame, returning how long it ran.
    pub fn end(&self) -> Option<Duration> {
        let frame = self.frames.lock().ok()?.pop()?;
        let ran = self.clock.now().saturating_duration_since(frame.started);
        tracing::debug!(
            tracker = self.name,
            step = %frame.description,
            elapsed_ms = u64::try_from(ran.as_millis()).unwrap_or(u64::MAX),
            "end"
        );
        Some(ran)
    }

    pub fn clear(&self) {
        if let Ok(mut f) = self.frames.lock() {
            f.clear();
        }
    }

    pub fn current(&self) -> Option<StepFrame> {
        self.frames.lock().ok()?.last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// Descriptions from outermost to innermost.
    pub fn path(&self) -> Vec<String> {
        self.frames
            .lock()
            .map(|f| f.iter().map(|s| s.description.clone()).collect())
            .unwrap_or_default()
    }

    /// Time spent in the current frame.
    pub fn elapsed(&self) -> Duration {
        self.current().map_or(Duration::ZERO, |f| {
            self.clock.now().saturating_duration_since(f.started)
        })
    }

    /// Time left until the current frame has run for `target`.
    pub fn remaining(&self, target: Duration) -> Duration {
        target.saturating_sub(self.elapsed())
    }
}

/// Pushes a frame on creation and pops it on drop, so `?` inside a step cannot leave
/// the stack unbalanced.
pub struct StepGuard<'a> {
    tracker: &'a StepTracker,
}

impl<'a> StepGuard<'a> {
    pub fn new(tracker: &'a StepTracker, description: &str) -> Self {
        tracker.start(description);
        Self { tracker }
    }
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        self.tracker.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cegs_traits::ManualClock;

    #[test]
    fn frames_nest_and_time_independently() {
        let clock = ManualClock::new();
        let steps = StepTracker::new("step", Arc::new(clock.clone()));
        steps.start("Evacuate");
        clock.advance(Duration::from_secs(5));
        steps.start("Wait for foreline");
        clock.advance(Duration::from_secs(2));
        assert_eq!(steps.depth(), 2);
        assert_eq!(steps.elapsed(), Duration::from_secs(2));
        assert_eq!(steps.end(), Some(Duration::from_secs(2)));
        assert_eq!(steps.elapsed(), Duration::from_secs(7));
        assert_eq!(steps.remaining(Duration::from_secs(10)), Duration::from_secs(3));
        steps.clear();
        assert!(steps.current().is_none());
        assert_eq!(steps.end(), None);
    }

    #[test]
    fn guard_pops_on_early_return() {
        let clock = ManualClock::new();
        let steps = StepTracker::new("step", Arc::new(clock));
        let run = || -> Result<(), ()> {
            let _g = StepGuard::new(&steps, "failing step");
            Err(())
        };
        assert!(run().is_err());
        assert_eq!(steps.depth(), 0);
    }
}
