//! Safety watchdogs evaluated on every fast tick.
//!
//! Each hazard is a pure predicate over a [`Snapshot`] paired with a protective action
//! and a fixed alert text. Actions are idempotent: a valve is only commanded when its
//! last commanded motion is not already `Closing`, so a condition held across many ticks
//! issues one command. Alert bodies carry no live numbers, which lets the dispatcher's
//! duplicate suppression collapse a flapping condition into one message.
use std::time::{Duration, Instant};

use cegs_traits::{Motion, Switch, Valve};

use crate::alert::AlertDispatcher;
use crate::config::WatchdogCfg;
use crate::devices::VacuumValves;
use crate::hw_error::map_device_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hazard {
    Backstreaming,
    PumpFlooded,
    RoughingFailure,
    ContainmentFailure,
}

impl Hazard {
    pub const fn subject(self) -> &'static str {
        match self {
            Self::Backstreaming => "Backstreaming risk",
            Self::PumpFlooded => "Vacuum pump flooded",
            Self::RoughingFailure => "Roughing failure",
            Self::ContainmentFailure => "Cryogen containment failure",
        }
    }

    pub const fn body(self) -> &'static str {
        match self {
            Self::Backstreaming => {
                "Manifold and foreline are both at low pressure with the roughing valve open. \
                 The roughing valve was closed to keep pump oil out of the manifold."
            }
            Self::PumpFlooded => {
                "Manifold pressure is above the safe limit for the pumps. \
                 The high-vacuum and roughing valves were closed."
            }
            Self::RoughingFailure => {
                "Foreline pressure kept rising during roughing. \
                 All vacuum valves were closed; check the roughing pump and for leaks."
            }
            Self::ContainmentFailure => {
                "Ambient temperature is below freezing while the cryogen supply is on. \
                 The cryogen supply was turned off."
            }
        }
    }
}

/// Telemetry the watchdogs look at, gathered once per fast tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    /// Fused manifold pressure, Torr.
    pub vm_pressure: f64,
    pub foreline: f64,
    /// Torr/s.
    pub foreline_rate: f64,
    pub roughing_open: bool,
    /// °C.
    pub ambient: f64,
    pub cryogen_on: bool,
}

pub fn backstreaming(cfg: &WatchdogCfg, s: &Snapshot) -> bool {
    s.roughing_open
        && s.vm_pressure < cfg.backstream_vm_max
        && s.foreline < cfg.backstream_foreline_max
}

pub fn pump_flooded(cfg: &WatchdogCfg, s: &Snapshot) -> bool {
    s.vm_pressure > cfg.flood_vm_max
}

pub fn foreline_rising(cfg: &WatchdogCfg, s: &Snapshot) -> bool {
    s.foreline_rate > cfg.roughing_rise_rate_max
}

pub fn containment_failure(cfg: &WatchdogCfg, s: &Snapshot) -> bool {
    s.cryogen_on && s.ambient < cfg.freeze_c
}

pub struct WatchdogMonitor {
    cfg: WatchdogCfg,
    rising_since: Option<Instant>,
}

impl WatchdogMonitor {
    pub fn new(cfg: WatchdogCfg) -> Self {
        Self {
            cfg,
            rising_since: None,
        }
    }

    pub fn cfg(&self) -> &WatchdogCfg {
        &self.cfg
    }

    /// How long the foreline has been rising continuously, if it is.
    pub fn rising_for(&self, now: Instant) -> Option<Duration> {
        self.rising_since
            .map(|t| now.saturating_duration_since(t))
    }

    /// Which hazards hold right now. Advances the roughing-failure timer.
    pub fn evaluate(&mut self, now: Instant, s: &Snapshot) -> Vec<Hazard> {
        let mut hazards = Vec::new();
        if backstreaming(&self.cfg, s) {
            hazards.push(Hazard::Backstreaming);
        }
        if pump_flooded(&self.cfg, s) {
            hazards.push(Hazard::PumpFlooded);
        }
        if foreline_rising(&self.cfg, s) {
            let since = *self.rising_since.get_or_insert(now);
            if now.saturating_duration_since(since) > self.cfg.roughing_failure {
                hazards.push(Hazard::RoughingFailure);
            }
        } else {
            self.rising_since = None;
        }
        if containment_failure(&self.cfg, s) {
            hazards.push(Hazard::ContainmentFailure);
        }
        hazards
    }

    /// Evaluate and act. Returns the hazards whose protective action was issued this
    /// tick; a hazard already being handled is not repeated.
    pub fn check(
        &mut self,
        now: Instant,
        s: &Snapshot,
        vacuum: &VacuumValves,
        cryogen: &dyn Switch,
        alerts: &AlertDispatcher,
    ) -> Vec<Hazard> {
        let mut acted = Vec::new();
        for hazard in self.evaluate(now, s) {
            let issued = match hazard {
                Hazard::Backstreaming => close_unless_closing(&*vacuum.roughing, "roughing"),
                Hazard::PumpFlooded => {
                    let hv = close_unless_closing(&*vacuum.high_vacuum, "high-vacuum");
                    let rough = close_unless_closing(&*vacuum.roughing, "roughing");
                    hv || rough
                }
                Hazard::RoughingFailure => {
                    let hv = close_unless_closing(&*vacuum.high_vacuum, "high-vacuum");
                    let rough = close_unless_closing(&*vacuum.roughing, "roughing");
                    let backing = close_unless_closing(&*vacuum.backing, "backing");
                    hv || rough || backing
                }
                Hazard::ContainmentFailure => {
                    if let Err(e) = cryogen.turn_off() {
                        tracing::error!(error = %map_device_error(&*e), "cryogen supply shutoff failed");
                    }
                    true
                }
            };
            if issued {
                tracing::warn!(?hazard, "watchdog protective action");
                alerts.alert(hazard.subject(), hazard.body());
                acted.push(hazard);
            }
        }
        acted
    }
}

/// Command a close unless one is already the valve's last motion. True if commanded.
fn close_unless_closing(valve: &dyn Valve, role: &'static str) -> bool {
    if valve.last_motion() == Motion::Closing {
        return false;
    }
    if let Err(e) = valve.close() {
        tracing::error!(valve = role, error = %map_device_error(&*e), "protective close failed");
    }
    true
}
