//! Bleed-to-setpoint: hold a measured pressure at a target by modulating one valve,
//! opening it further as the upstream charge runs down, until it is fully open.
//!
//! Each cycle anticipates where the pressure will be once the last valve move has had
//! time to show up: `anticipated = error + cooldown_left·rate`. Above the dead band the
//! valve closes a bit; below it, the opening step escalates from `OpenABitSlower` to
//! `OpenABit` to fully open as the evidence that more flow is needed accumulates.
use std::time::{Duration, Instant};

use cegs_traits::{Meter, Motion, PumpModeMonitor, Valve, ValveAction};

use super::{act, read};
use crate::config::BleedCfg;
use crate::error::Result;
use crate::wait::Waiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleedState {
    Starting,
    Established,
    Finished,
}

/// What the regulator needs to know about the valve each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValveView {
    pub is_open: bool,
    pub is_closed: bool,
    pub last_motion: Motion,
}

impl ValveView {
    pub fn of(valve: &dyn Valve) -> Self {
        Self {
            is_open: valve.is_open(),
            is_closed: valve.is_closed(),
            last_motion: valve.last_motion(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BleedRegulator {
    cfg: BleedCfg,
    target: f64,
    state: BleedState,
    started: Instant,
    established_at: Option<Instant>,
    last_error: Option<f64>,
    last_move: Option<Instant>,
}

impl BleedRegulator {
    pub fn new(cfg: BleedCfg, target: f64, now: Instant) -> Self {
        Self {
            cfg,
            target,
            state: BleedState::Starting,
            started: now,
            established_at: None,
            last_error: None,
            last_move: None,
        }
    }

    pub fn state(&self) -> BleedState {
        self.state
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Time left before the last valve move is fully reflected in the measurement.
    pub fn cooldown_left(&self, now: Instant) -> Duration {
        self.last_move.map_or(Duration::ZERO, |t| {
            self.cfg
                .cooldown
                .saturating_sub(now.saturating_duration_since(t))
        })
    }

    /// One control cycle. Returns the valve action to issue, if any.
    pub fn step(
        &mut self,
        now: Instant,
        measured: f64,
        rate: f64,
        valve: ValveView,
        pump_switch_imminent: bool,
    ) -> Option<ValveAction> {
        if self.state == BleedState::Finished {
            return None;
        }
        if valve.is_open {
            tracing::info!(measured, target = self.target, "bleed valve fully open");
            self.state = BleedState::Finished;
            return None;
        }
        if valve.is_closed && pump_switch_imminent {
            return self.record(now, ValveAction::CloseABit);
        }

        let error = measured - self.target;
        if self.state == BleedState::Starting {
            let crossed = self
                .last_error
                .is_some_and(|prev| (prev < 0.0) != (error < 0.0));
            if crossed || now.saturating_duration_since(self.started) >= self.cfg.establish {
                tracing::debug!(measured, crossed, "bleed established");
                self.state = BleedState::Established;
                self.established_at = Some(now);
            }
        }
        self.last_error = Some(error);

        let cooldown_left = self.cooldown_left(now);
        let cooled = cooldown_left.is_zero();
        let anticipated = cooldown_left.as_secs_f64().mul_add(rate, error);
        let was_opening = valve.last_motion == Motion::Opening;
        let band = self.cfg.dead_band;

        let action = if anticipated > band && (was_opening || cooled) {
            ValveAction::CloseABit
        } else if anticipated < -band && cooled {
            if self.state == BleedState::Established
                && measured < self.cfg.pressure_floor
                && was_opening
            {
                ValveAction::OpenFully
            } else if anticipated < -band * self.cfg.well_below_factor && was_opening {
                ValveAction::OpenABit
            } else {
                ValveAction::OpenABitSlower
            }
        } else {
            return None;
        };
        self.record(now, action)
    }

    fn record(&mut self, now: Instant, action: ValveAction) -> Option<ValveAction> {
        self.last_move = Some(now);
        Some(action)
    }

    pub fn established_after(&self) -> Option<Duration> {
        self.established_at
            .map(|t| t.saturating_duration_since(self.started))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BleedReport {
    pub target: f64,
    pub final_value: f64,
    pub actions: u32,
    pub established_after: Option<Duration>,
    pub elapsed: Duration,
}

/// Run the bleed loop until the valve is fully open.
pub fn bleed(
    waiter: &Waiter,
    valve: &dyn Valve,
    meter: &dyn Meter,
    pump_mode: Option<&dyn PumpModeMonitor>,
    target: f64,
    cfg: &BleedCfg,
) -> Result<BleedReport> {
    let started = waiter.now();
    let mut reg = BleedRegulator::new(cfg.clone(), target, started);
    let mut actions = 0u32;
    let mut last_value;
    tracing::info!(target, "bleed start");
    loop {
        let r = read(meter, "reading bleed pressure")?;
        last_value = r.value;
        let imminent = pump_mode.is_some_and(|p| p.switch_imminent());
        if let Some(a) = reg.step(waiter.now(), r.value, r.rate.value, ValveView::of(valve), imminent) {
            act(valve, a, "bleed valve")?;
            actions += 1;
        }
        if reg.state() == BleedState::Finished {
            break;
        }
        waiter.sleep(cfg.cycle)?;
    }
    let elapsed = waiter.now().saturating_duration_since(started);
    tracing::info!(target, final_value = last_value, actions, "bleed complete");
    Ok(BleedReport {
        target,
        final_value: last_value,
        actions,
        established_after: reg.established_after(),
        elapsed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> BleedCfg {
        BleedCfg::default()
    }

    fn view(last_motion: Motion) -> ValveView {
        ValveView {
            is_open: false,
            is_closed: false,
            last_motion,
        }
    }

    #[test]
    fn first_move_is_conservative() {
        let t0 = Instant::now();
        let mut reg = BleedRegulator::new(cfg(), 1.0, t0);
        let closed = ValveView {
            is_open: false,
            is_closed: true,
            last_motion: Motion::Unknown,
        };
        assert_eq!(
            reg.step(t0, 0.0, 0.0, closed, false),
            Some(ValveAction::OpenABitSlower)
        );
        // cooldown blocks the next opening
        assert_eq!(
            reg.step(t0 + Duration::from_secs(1), 0.0, 0.0, view(Motion::Opening), false),
            None
        );
    }

    #[test]
    fn anticipated_overshoot_closes_while_opening() {
        let t0 = Instant::now();
        let mut reg = BleedRegulator::new(cfg(), 1.0, t0);
        reg.step(t0, 0.5, 0.0, view(Motion::Unknown), false);
        // 2 s into a 10 s cooldown, 0.98 rising at 0.05/s: anticipates 0.38 over
        let a = reg.step(t0 + Duration::from_secs(2), 0.98, 0.05, view(Motion::Opening), false);
        assert_eq!(a, Some(ValveAction::CloseABit));
    }

    #[test]
    fn pump_switch_holds_a_closed_valve_shut() {
        let t0 = Instant::now();
        let mut reg = BleedRegulator::new(cfg(), 1.0, t0);
        let closed = ValveView {
            is_open: false,
            is_closed: true,
            last_motion: Motion::Closing,
        };
        assert_eq!(reg.step(t0, 0.0, 0.0, closed, true), Some(ValveAction::CloseABit));
        assert_eq!(reg.state(), BleedState::Starting);
    }

    #[test]
    fn zero_crossing_establishes_without_waiting() {
        let t0 = Instant::now();
        let mut reg = BleedRegulator::new(cfg(), 1.0, t0);
        reg.step(t0, 0.8, 0.02, view(Motion::Opening), false);
        assert_eq!(reg.state(), BleedState::Starting);

        let t1 = t0 + Duration::from_secs(3);
        reg.step(t1, 1.02, 0.01, view(Motion::Opening), false);
        assert_eq!(reg.state(), BleedState::Established);
        let after = reg.established_after().unwrap();
        assert_eq!(after, Duration::from_secs(3));
        assert!(after < cfg().establish);
    }

    #[test]
    fn no_crossing_establishes_at_the_deadline() {
        let t0 = Instant::now();
        let mut reg = BleedRegulator::new(cfg(), 1.0, t0);
        reg.step(t0, 0.5, 0.0, view(Motion::Opening), false);
        reg.step(t0 + Duration::from_secs(149), 0.6, 0.0, view(Motion::Opening), false);
        assert_eq!(reg.state(), BleedState::Starting);
        reg.step(t0 + cfg().establish, 0.6, 0.0, view(Motion::Opening), false);
        assert_eq!(reg.established_after(), Some(cfg().establish));
    }

    #[test]
    fn fully_open_valve_finishes_an_established_bleed() {
        let t0 = Instant::now();
        let mut reg = BleedRegulator::new(cfg(), 1.0, t0);
        reg.step(t0, 0.9, 0.0, view(Motion::Opening), false);
        reg.step(t0 + Duration::from_secs(1), 1.1, 0.0, view(Motion::Opening), false);
        assert_eq!(reg.state(), BleedState::Established);

        let open = ValveView {
            is_open: true,
            is_closed: false,
            last_motion: Motion::Opening,
        };
        assert_eq!(reg.step(t0 + Duration::from_secs(2), 0.01, 0.0, open, false), None);
        assert_eq!(reg.state(), BleedState::Finished);
        // nothing more once finished
        assert_eq!(
            reg.step(t0 + Duration::from_secs(60), 0.0, 0.0, view(Motion::Closing), false),
            None
        );
    }
}
