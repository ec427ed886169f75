//! Pressurize-to-target through a shutoff valve and a needle (flow) valve.
//!
//! 1. Open the shutoff and wait out the admission surge: the rate must have peaked and
//!    its own rate must have fallen below `-rise_rate_threshold`.
//! 2. Pulse-crack the flow valve, nudge it back, let the mechanism settle.
//! 3. Every cycle, compare the expected time to target with the time planned to be
//!    left, and open or close the flow valve a bit to stay inside the window. The plan
//!    keeps a cushion of shutoff latency plus margin in reserve.
//! 4. Inside the cushion, close the flow valve and wait until `current + latency·rate`
//!    reaches the target. If the flow dies first the wait gives up after the cushion
//!    plus one cycle, with a warning.
//! 5. Close the shutoff and dwell.
use std::sync::Arc;
use std::time::{Duration, Instant};

use cegs_traits::{Meter, Valve, ValveAction};

use super::{act, read};
use crate::config::{GasCalibration, PressurizeCfg};
use crate::error::Result;
use crate::wait::Waiter;

/// Longest wait for the shutoff valve to report its close complete.
const SHUTOFF_ACK: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct GasLineValves {
    pub shutoff: Arc<dyn Valve>,
    pub flow: Arc<dyn Valve>,
    pub meter: Arc<dyn Meter>,
}

/// One cycle's decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Hold,
    OpenABit,
    OpenABitSlower,
    CloseABit,
    /// Expected arrival is inside the cushion; stop adjusting.
    Cushion,
}

impl Adjustment {
    pub const fn action(self) -> Option<ValveAction> {
        match self {
            Self::OpenABit => Some(ValveAction::OpenABit),
            Self::OpenABitSlower => Some(ValveAction::OpenABitSlower),
            Self::CloseABit => Some(ValveAction::CloseABit),
            Self::Hold | Self::Cushion => None,
        }
    }
}

/// Seconds until `remaining` is covered at `rate`; infinite if not approaching.
#[inline]
pub fn expected_time(remaining: f64, rate: f64) -> f64 {
    if rate <= 0.0 {
        f64::INFINITY
    } else {
        remaining.max(0.0) / rate
    }
}

/// Decide the flow-valve move for one cycle.
///
/// `planned_left` is the time the plan still allows before the cushion starts,
/// never less than the cushion itself.
pub fn cycle_adjustment(
    remaining: f64,
    rate: f64,
    planned_left: Duration,
    cushion: Duration,
    flow_scale: f64,
    tolerance: f64,
) -> Adjustment {
    let expected = expected_time(remaining, rate);
    let planned = planned_left.as_secs_f64();
    if expected <= cushion.as_secs_f64() {
        Adjustment::Cushion
    } else if expected > planned * (1.0 + tolerance) {
        if remaining > flow_scale {
            Adjustment::OpenABit
        } else {
            Adjustment::OpenABitSlower
        }
    } else if expected < planned * (1.0 - tolerance) {
        Adjustment::CloseABit
    } else {
        Adjustment::Hold
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PressurizeReport {
    pub target: f64,
    pub final_value: f64,
    /// False if the surge wait ran out its budget.
    pub surge_settled: bool,
    pub cycles: u32,
    pub adjustments: u32,
    /// Rate when regulation entered the cushion, Torr/s.
    pub cushion_rate: f64,
    pub cushion: Duration,
    /// False if the flow stopped before the projection reached the target.
    pub projection_reached: bool,
    pub elapsed: Duration,
}

pub fn pressurize(
    waiter: &Waiter,
    line: &GasLineValves,
    target: f64,
    cfg: &PressurizeCfg,
    gas: &GasCalibration,
) -> Result<PressurizeReport> {
    let started = waiter.now();
    let cushion = gas.shutoff_latency + cfg.cushion_margin;
    let cushion_s = cushion.as_secs_f64();
    let meter = line.meter.as_ref();
    tracing::info!(gas = %gas.gas, target, "pressurize start");

    act(line.shutoff.as_ref(), ValveAction::OpenFully, "shutoff valve")?;
    let mut peak = f64::NEG_INFINITY;
    let surge_settled = waiter.wait_until(cfg.surge_budget, || match meter.reading() {
        Ok(r) => {
            peak = peak.max(r.rate.value);
            peak > 0.0 && r.rate.value < peak && r.rate.rate < -gas.rise_rate_threshold
        }
        Err(e) => {
            tracing::warn!(error = %e, "pressure read failed during surge wait");
            false
        }
    })?;
    if !surge_settled {
        tracing::warn!(gas = %gas.gas, "admission surge did not settle within budget; continuing");
    }

    let flow = line.flow.as_ref();
    act(flow, ValveAction::PulseOpen, "flow valve")?;
    act(flow, ValveAction::CloseABit, "flow valve")?;
    waiter.sleep(cfg.settle)?;

    let deadline = waiter.now() + cfg.approach + cushion;
    let mut cycles = 0u32;
    let mut adjustments = 0u32;
    let cushion_rate = loop {
        let r = read(meter, "reading pressure")?;
        let remaining = target - r.value;
        let left = planned_left(deadline, waiter.now(), cushion);
        let adj = cycle_adjustment(
            remaining,
            r.rate.value,
            left,
            cushion,
            gas.flow_scale,
            cfg.window_tolerance,
        );
        tracing::trace!(pressure = r.value, rate = r.rate.value, ?adj, "pressurize cycle");
        if adj == Adjustment::Cushion {
            break r.rate.value;
        }
        if let Some(a) = adj.action() {
            act(flow, a, "flow valve")?;
            adjustments += 1;
        }
        cycles += 1;
        waiter.wait_until(cfg.cycle, || {
            meter
                .reading()
                .is_ok_and(|r| expected_time(target - r.value, r.rate.value) <= cushion_s)
        })?;
    };

    act(flow, ValveAction::CloseFully, "flow valve")?;
    let latency = gas.shutoff_latency.as_secs_f64();
    let projection_reached = waiter.wait_until(cushion + cfg.cycle, || {
        meter
            .reading()
            .is_ok_and(|r| latency.mul_add(r.rate.value, r.value) >= target)
    })?;
    if !projection_reached {
        tracing::warn!(
            gas = %gas.gas,
            target,
            pressure = meter.reading().map(|r| r.value).unwrap_or(f64::NAN),
            "flow stopped short of the projected target; closing shutoff"
        );
    }
    act(line.shutoff.as_ref(), ValveAction::CloseFully, "shutoff valve")?;
    if !waiter.wait_until(SHUTOFF_ACK, || !line.shutoff.is_busy())? {
        tracing::warn!("shutoff valve did not report closed in time");
    }
    waiter.sleep(cfg.final_dwell)?;

    let final_value = read(meter, "reading final pressure")?.value;
    let elapsed = waiter.now().saturating_duration_since(started);
    tracing::info!(
        gas = %gas.gas,
        target,
        final_value,
        cycles,
        adjustments,
        projection_reached,
        elapsed_s = elapsed.as_secs_f64(),
        "pressurize complete"
    );
    Ok(PressurizeReport {
        target,
        final_value,
        surge_settled,
        cycles,
        adjustments,
        cushion_rate,
        cushion,
        projection_reached,
        elapsed,
    })
}

/// Time the plan allows from `now` to `deadline`, floored at the cushion.
pub fn planned_left(deadline: Instant, now: Instant, cushion: Duration) -> Duration {
    deadline.saturating_duration_since(now).max(cushion)
}
