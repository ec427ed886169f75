//! The one repeating loop that paces the controller.
//!
//! Each tick refreshes telemetry, then runs the buckets that fall on it: fast
//! (watchdogs) every tick, medium (process polling) every `medium_every` ticks, slow
//! every `slow_every`, logging every `log_every`. Slow and logging work is never run on
//! the scheduler thread; it only fires a coalescing [`Trigger`] that a [`Housekeeper`]
//! thread waits on. A tick whose refresh reports unhealthy telemetry skips every
//! time-sensitive bucket and keeps only the logging signal.
//!
//! Scheduling does not begin until the bring-up flag is raised, and stops when the
//! shutdown flag is. Both thread kinds here are joined on drop.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use cegs_traits::Clock;
use crossbeam_channel as xch;

use crate::config::SchedulerCfg;
use crate::wait::Flag;

/// Which buckets run on a given tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Buckets {
    pub medium: bool,
    pub slow: bool,
    pub log: bool,
}

impl Buckets {
    /// Slow only ever lands on a medium tick, whatever the configured periods.
    pub fn for_tick(n: u64, cfg: &SchedulerCfg) -> Self {
        let every = |k: u32| n % u64::from(k.max(1)) == 0;
        let medium = every(cfg.medium_every);
        Self {
            medium,
            slow: medium && every(cfg.slow_every),
            log: every(cfg.log_every),
        }
    }
}

/// Work the scheduler drives directly.
pub trait Bucketed: Send + Sync {
    /// Refresh telemetry; `false` if it cannot be trusted this tick.
    fn refresh(&self) -> bool;
    fn fast(&self);
    fn medium(&self);
}

/// Level-triggered wake-up: any number of fires before the waiter runs count as one.
#[derive(Clone)]
pub struct Trigger {
    tx: xch::Sender<()>,
    rx: xch::Receiver<()>,
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Trigger {
    pub fn new() -> Self {
        let (tx, rx) = xch::bounded(1);
        Self { tx, rx }
    }

    pub fn fire(&self) {
        let _ = self.tx.try_send(());
    }

    /// Wait up to `timeout` for a fire; true if one was pending.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    pub fn is_pending(&self) -> bool {
        !self.rx.is_empty()
    }
}

/// Run one tick's work against `target`. Returns the buckets that were due.
pub fn run_tick(
    n: u64,
    cfg: &SchedulerCfg,
    target: &dyn Bucketed,
    slow: &Trigger,
    log: &Trigger,
) -> Buckets {
    let due = Buckets::for_tick(n, cfg);
    if target.refresh() {
        target.fast();
        if due.medium {
            target.medium();
        }
        if due.slow {
            slow.fire();
        }
    } else {
        tracing::debug!(tick = n, "telemetry unhealthy; skipping buckets");
    }
    if due.log {
        log.fire();
    }
    due
}

pub struct Scheduler {
    ticks: Arc<AtomicU64>,
    stop: Flag,
    join_handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn spawn(
        cfg: SchedulerCfg,
        clock: Arc<dyn Clock>,
        shutdown: Flag,
        bring_up: Flag,
        target: Arc<dyn Bucketed>,
        slow: Trigger,
        log: Trigger,
    ) -> std::io::Result<Self> {
        let ticks = Arc::new(AtomicU64::new(0));
        let ticks_worker = Arc::clone(&ticks);
        let stop = Flag::new();
        let stop_worker = stop.clone();
        let halted = move || stop_worker.is_raised() || shutdown.is_raised();
        let join_handle = std::thread::Builder::new()
            .name("cegs-scheduler".into())
            .spawn(move || {
                while !bring_up.is_raised() {
                    if halted() {
                        return;
                    }
                    clock.sleep(cfg.tick);
                }
                tracing::info!(
                    tick_ms = u64::try_from(cfg.tick.as_millis()).unwrap_or(u64::MAX),
                    "scheduler running"
                );
                let mut n = 0u64;
                while !halted() {
                    run_tick(n, &cfg, target.as_ref(), &slow, &log);
                    n = n.wrapping_add(1);
                    ticks_worker.store(n, Ordering::Release);
                    clock.sleep(cfg.tick);
                }
                tracing::trace!(ticks = n, "scheduler thread exiting cleanly");
            })?;
        Ok(Self {
            ticks,
            stop,
            join_handle: Some(join_handle),
        })
    }

    /// Ticks completed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Stop ticking and wait for the thread.
    pub fn stop(&mut self) {
        self.stop.raise();
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!("scheduler thread panicked during shutdown");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A worker thread that runs `job` each time its trigger fires.
pub struct Housekeeper {
    name: String,
    stop: Flag,
    join_handle: Option<JoinHandle<()>>,
}

impl Housekeeper {
    pub fn spawn(
        name: &str,
        trigger: Trigger,
        poll: Duration,
        mut job: impl FnMut() + Send + 'static,
    ) -> std::io::Result<Self> {
        let stop = Flag::new();
        let stop_worker = stop.clone();
        let poll = poll.max(Duration::from_millis(1));
        let join_handle = std::thread::Builder::new()
            .name(format!("cegs-{name}"))
            .spawn(move || {
                while !stop_worker.is_raised() {
                    if trigger.wait(poll) && !stop_worker.is_raised() {
                        job();
                    }
                }
            })?;
        Ok(Self {
            name: name.to_owned(),
            stop,
            join_handle: Some(join_handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.raise();
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!(housekeeper = %self.name, "housekeeper panicked");
        }
    }
}

impl Drop for Housekeeper {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_coalesces() {
        let t = Trigger::new();
        t.fire();
        t.fire();
        t.fire();
        assert!(t.wait(Duration::from_millis(1)));
        assert!(!t.wait(Duration::from_millis(1)));
    }

    #[test]
    fn first_tick_runs_everything() {
        let b = Buckets::for_tick(0, &SchedulerCfg::default());
        assert_eq!(
            b,
            Buckets {
                medium: true,
                slow: true,
                log: true
            }
        );
    }
}
