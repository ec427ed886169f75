//! Dual-gauge vacuum pressure fusion.
//!
//! The ion gauge reads correctly only at low pressure and only after it has been
//! enabled for a while; the high-pressure gauge covers the full range but bottoms out
//! at its sensitivity. [`fuse`] picks one or blends both across the overlap band.
//! [`PressureFusion`] adds the stateful parts: ion-gauge auto-switching with
//! hysteresis and dwell, and the baseline timer that gates auto-zero.
use std::time::{Duration, Instant};

use crate::config::FusionCfg;

/// Which gauge the fused value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    HighPressure,
    IonGauge,
    Blend,
}

/// Linear blend across the overlap band.
///
/// `weight = (p_hp - max_ig) / (min_hp - max_ig)`, `fused = weight·p_hp + (1 - weight)·p_ig`.
#[inline]
pub fn blend(p_ig: f64, p_hp: f64, max_ig: f64, min_hp: f64) -> f64 {
    let weight = (p_hp - max_ig) / (min_hp - max_ig);
    weight.mul_add(p_hp, (1.0 - weight) * p_ig)
}

/// Stateless fusion decision, evaluated in order:
/// 1. `p_hp > min_hp` or ion gauge not yet stable: high-pressure gauge.
/// 2. `p_ig < max_ig`: ion gauge.
/// 3. `p_ig > p_hp`: high-pressure gauge.
/// 4. otherwise: [`blend`].
pub fn fuse(p_ig: f64, p_hp: f64, ig_stable: bool, max_ig: f64, min_hp: f64) -> (f64, Source) {
    if p_hp > min_hp || !ig_stable {
        (p_hp, Source::HighPressure)
    } else if p_ig < max_ig {
        (p_ig, Source::IonGauge)
    } else if p_ig > p_hp {
        (p_hp, Source::HighPressure)
    } else {
        (blend(p_ig, p_hp, max_ig, min_hp), Source::Blend)
    }
}

/// Raw inputs for one refresh.
#[derive(Debug, Clone, Copy)]
pub struct FusionInputs {
    pub p_ig: f64,
    /// Already floored at the gauge's sensitivity.
    pub p_hp: f64,
    pub foreline: f64,
    pub foreline_rate: f64,
    /// Ion-gauge isolation and manifold isolation valves are both open.
    pub isolation_open: bool,
    /// Current state of the ion-gauge enable line.
    pub gauge_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionOutput {
    pub pressure: f64,
    pub source: Source,
    /// Set when the enable line should be switched to this state.
    pub gauge_command: Option<bool>,
}

#[derive(Debug)]
pub struct PressureFusion {
    cfg: FusionCfg,
    gauge_on: bool,
    gauge_since: Instant,
    baseline_since: Option<Instant>,
    last: Option<FusionOutput>,
}

impl PressureFusion {
    pub fn new(cfg: FusionCfg, now: Instant, gauge_on: bool) -> Self {
        Self {
            cfg,
            gauge_on,
            gauge_since: now,
            baseline_since: None,
            last: None,
        }
    }

    pub fn cfg(&self) -> &FusionCfg {
        &self.cfg
    }

    pub fn gauge_on(&self) -> bool {
        self.gauge_on
    }

    /// Ion gauge has been enabled at least its stabilization time.
    pub fn ig_stable(&self, now: Instant) -> bool {
        self.gauge_on && now.saturating_duration_since(self.gauge_since) >= self.cfg.ig_stabilize
    }

    pub fn last(&self) -> Option<FusionOutput> {
        self.last
    }

    pub fn update(&mut self, now: Instant, inputs: &FusionInputs) -> FusionOutput {
        // Enable line changed under us (or by our last command).
        if inputs.gauge_on != self.gauge_on {
            self.gauge_on = inputs.gauge_on;
            self.gauge_since = now;
        }

        let (pressure, source) = fuse(
            inputs.p_ig,
            inputs.p_hp,
            self.ig_stable(now),
            self.cfg.max_ig,
            self.cfg.min_hp,
        );

        let gauge_command = self.gauge_decision(now, pressure, inputs);
        self.track_baseline(now, pressure, inputs);

        let out = FusionOutput {
            pressure,
            source,
            gauge_command,
        };
        self.last = Some(out);
        out
    }

    fn gauge_decision(&self, now: Instant, pressure: f64, inputs: &FusionInputs) -> Option<bool> {
        let dwelled = now.saturating_duration_since(self.gauge_since) >= self.cfg.min_dwell;
        if !(inputs.isolation_open && inputs.foreline < self.cfg.foreline_safe && dwelled) {
            return None;
        }
        let on_below = self.cfg.switchpoint * (1.0 - self.cfg.switch_hysteresis);
        let off_above = self.cfg.switchpoint * (1.0 + self.cfg.switch_hysteresis);
        if !self.gauge_on && pressure < on_below {
            Some(true)
        } else if self.gauge_on && pressure > off_above {
            Some(false)
        } else {
            None
        }
    }

    fn track_baseline(&mut self, now: Instant, pressure: f64, inputs: &FusionInputs) {
        let rough_vacuum = pressure <= self.cfg.baseline_max;
        let steady = inputs.foreline_rate.abs() <= self.cfg.foreline_steady_rate;
        if rough_vacuum && steady {
            self.baseline_since.get_or_insert(now);
        } else {
            self.baseline_since = None;
        }
    }

    /// How long the steady-baseline condition has held without interruption.
    pub fn baseline_elapsed(&self, now: Instant) -> Duration {
        self.baseline_since
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t))
    }

    /// A zero calibration of the high-pressure gauge may be trusted now.
    pub fn zero_trusted(&self, now: Instant) -> bool {
        self.baseline_since.is_some() && self.baseline_elapsed(now) >= self.cfg.baseline
    }
}
