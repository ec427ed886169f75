//! Bleed line: a charged upstream volume bled through a modulating valve into a pumped
//! section whose pressure is measured.
//!
//! Upstream pressure drains as `dPu/dt = −q·pos·Pu`; the measured pressure follows
//! `c·pos·Pu` with a first-order lag `τ`. As the upstream charge runs out the valve has
//! to keep opening to hold the measured pressure, until it ends up fully open.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cegs_traits::{
    Clock, DeviceError, Meter, MeterReading, Motion, RateOfChange, Valve, ValveAction, ZeroState,
};

use crate::error::HwError;
use crate::sim::action_step;

const SUBSTEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct BleedLineParams {
    pub upstream_pressure: f64,
    /// Upstream drain coefficient per second at full opening.
    pub drain: f64,
    /// Measured/upstream ratio at full opening, once settled.
    pub conductance: f64,
    pub lag: Duration,
}

impl Default for BleedLineParams {
    fn default() -> Self {
        Self {
            upstream_pressure: 100.0,
            drain: 0.02,
            conductance: 0.05,
            lag: Duration::from_secs(3),
        }
    }
}

struct BleedState {
    at: Instant,
    upstream: f64,
    measured: f64,
    rate: f64,
    rate_rate: f64,
    position: f64,
    motion: Motion,
    log: Vec<ValveAction>,
    peak: f64,
}

pub struct BleedLine {
    clock: Arc<dyn Clock>,
    params: BleedLineParams,
    state: Mutex<BleedState>,
}

impl BleedLine {
    pub fn new(clock: Arc<dyn Clock>, params: BleedLineParams) -> Arc<Self> {
        let at = clock.now();
        Arc::new(Self {
            clock,
            params,
            state: Mutex::new(BleedState {
                at,
                upstream: params.upstream_pressure,
                measured: 0.0,
                rate: 0.0,
                rate_rate: 0.0,
                position: 0.0,
                motion: Motion::Unknown,
                log: Vec::new(),
                peak: 0.0,
            }),
        })
    }

    pub fn valve(self: &Arc<Self>) -> Arc<dyn Valve> {
        Arc::new(BleedValve(Arc::clone(self)))
    }

    pub fn meter(self: &Arc<Self>) -> Arc<dyn Meter> {
        Arc::new(BleedPressure(Arc::clone(self)))
    }

    pub fn upstream(&self) -> f64 {
        self.advanced().map(|s| s.upstream).unwrap_or(f64::NAN)
    }

    /// Highest measured pressure seen so far.
    pub fn peak(&self) -> f64 {
        self.advanced().map(|s| s.peak).unwrap_or(f64::NAN)
    }

    pub fn actions(&self) -> Vec<ValveAction> {
        self.advanced().map(|s| s.log.clone()).unwrap_or_default()
    }

    fn advanced(&self) -> Result<MutexGuard<'_, BleedState>, DeviceError> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| Box::new(HwError::Timeout("bleed line".into())) as DeviceError)?;
        let now = self.clock.now();
        let lag = self.params.lag.as_secs_f64();
        while st.at < now {
            let dt = (now - st.at).min(SUBSTEP);
            let secs = dt.as_secs_f64();
            st.upstream -= self.params.drain * st.position * st.upstream * secs;
            let rate = (self.params.conductance * st.position * st.upstream - st.measured) / lag;
            st.measured += rate * secs;
            st.rate_rate = (rate - st.rate) / secs;
            st.rate = rate;
            st.peak = st.peak.max(st.measured);
            st.at += dt;
        }
        Ok(st)
    }
}

struct BleedValve(Arc<BleedLine>);
struct BleedPressure(Arc<BleedLine>);

impl Valve for BleedValve {
    fn is_open(&self) -> bool {
        self.0.advanced().map(|s| s.position >= 1.0).unwrap_or(false)
    }

    fn is_closed(&self) -> bool {
        self.0.advanced().map(|s| s.position <= 0.0).unwrap_or(false)
    }

    fn last_motion(&self) -> Motion {
        self.0.advanced().map(|s| s.motion).unwrap_or_default()
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn do_action(&self, action: ValveAction) -> Result<(), DeviceError> {
        let mut st = self.0.advanced()?;
        st.position = (st.position + action_step(action)).clamp(0.0, 1.0);
        st.motion = action.motion();
        st.log.push(action);
        Ok(())
    }
}

impl Meter for BleedPressure {
    fn reading(&self) -> Result<MeterReading, DeviceError> {
        let st = self.0.advanced()?;
        Ok(MeterReading {
            value: st.measured,
            sensitivity: 0.0,
            rate: RateOfChange {
                value: st.rate,
                rate: st.rate_rate,
                interval: SUBSTEP,
            },
            zero: ZeroState::Idle,
        })
    }

    fn zero(&self) -> Result<(), DeviceError> {
        Ok(())
    }
}
