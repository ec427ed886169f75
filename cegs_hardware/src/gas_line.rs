//! Gas admission line: supply → shutoff valve → needle (flow) valve → measured volume.
//!
//! The model integrates in fixed substeps up to `clock.now()` whenever any of its
//! handles is touched, so it runs equally well on a `ManualClock` and in real time.
//!
//! - Opening the shutoff releases the dead-volume charge as a surge whose rate rises
//!   and then decays: `A·(e^(-t/τd) − e^(-t/τr))`.
//! - Steady flow is `k·pos·(Ps − P)/Ps` while the shutoff passes gas.
//! - The needle valve travels at finite speed and is busy until it arrives.
//! - A shutoff close only stops the flow after `shutoff_latency`.
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use cegs_traits::{
    Clock, DeviceError, Meter, MeterReading, Motion, RateOfChange, Valve, ValveAction, ZeroState,
};

use crate::error::HwError;
use crate::sim::action_step;

const SUBSTEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub struct GasLineParams {
    /// Torr behind the shutoff valve.
    pub supply_pressure: f64,
    /// Torr/s through a fully open needle valve into an empty volume.
    pub flow_coeff: f64,
    /// Peak scale of the admission surge, Torr/s.
    pub surge_amplitude: f64,
    pub surge_rise: Duration,
    pub surge_decay: Duration,
    /// Needle travel per second, fraction of full stroke.
    pub valve_speed: f64,
    pub shutoff_latency: Duration,
}

impl Default for GasLineParams {
    fn default() -> Self {
        Self {
            supply_pressure: 1500.0,
            flow_coeff: 100.0,
            surge_amplitude: 10.0,
            surge_rise: Duration::from_millis(300),
            surge_decay: Duration::from_secs(2),
            valve_speed: 0.25,
            shutoff_latency: Duration::from_secs(1),
        }
    }
}

struct LineState {
    at: Instant,
    pressure: f64,
    rate: f64,
    rate_rate: f64,
    needle: f64,
    needle_target: f64,
    needle_motion: Motion,
    shutoff_open: bool,
    shutoff_passing: bool,
    shutoff_motion: Motion,
    shutoff_stops_at: Option<Instant>,
    opened_at: Option<Instant>,
    needle_log: Vec<ValveAction>,
}

pub struct GasLine {
    clock: Arc<dyn Clock>,
    params: GasLineParams,
    state: Mutex<LineState>,
}

impl GasLine {
    pub fn new(clock: Arc<dyn Clock>, params: GasLineParams) -> Arc<Self> {
        let at = clock.now();
        Arc::new(Self {
            clock,
            params,
            state: Mutex::new(LineState {
                at,
                pressure: 0.0,
                rate: 0.0,
                rate_rate: 0.0,
                needle: 0.0,
                needle_target: 0.0,
                needle_motion: Motion::Unknown,
                shutoff_open: false,
                shutoff_passing: false,
                shutoff_motion: Motion::Unknown,
                shutoff_stops_at: None,
                opened_at: None,
                needle_log: Vec::new(),
            }),
        })
    }

    pub fn shutoff_valve(self: &Arc<Self>) -> Arc<dyn Valve> {
        Arc::new(ShutoffValve(Arc::clone(self)))
    }

    pub fn flow_valve(self: &Arc<Self>) -> Arc<dyn Valve> {
        Arc::new(FlowValve(Arc::clone(self)))
    }

    pub fn pressure_meter(self: &Arc<Self>) -> Arc<dyn Meter> {
        Arc::new(LinePressure(Arc::clone(self)))
    }

    /// Current pressure without going through the `Meter` contract.
    pub fn pressure(&self) -> f64 {
        self.advanced().map(|s| s.pressure).unwrap_or(f64::NAN)
    }

    /// Actions commanded on the needle valve, in order.
    pub fn flow_actions(&self) -> Vec<ValveAction> {
        self.advanced().map(|s| s.needle_log.clone()).unwrap_or_default()
    }

    fn surge(&self, opened_at: Option<Instant>, t: Instant) -> f64 {
        let Some(t0) = opened_at else { return 0.0 };
        let u = t.saturating_duration_since(t0).as_secs_f64();
        let rise = self.params.surge_rise.as_secs_f64();
        let decay = self.params.surge_decay.as_secs_f64();
        self.params.surge_amplitude * ((-u / decay).exp() - (-u / rise).exp())
    }

    fn advanced(&self) -> Result<MutexGuard<'_, LineState>, DeviceError> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| Box::new(HwError::Timeout("gas line".into())) as DeviceError)?;
        let now = self.clock.now();
        while st.at < now {
            let dt = (now - st.at).min(SUBSTEP);
            let secs = dt.as_secs_f64();
            let t = st.at + dt;

            let travel = self.params.valve_speed * secs;
            let gap = st.needle_target - st.needle;
            st.needle = if gap.abs() <= travel {
                st.needle_target
            } else {
                st.needle + travel.copysign(gap)
            };
            if st.shutoff_stops_at.is_some_and(|stop| t >= stop) {
                st.shutoff_passing = false;
                st.shutoff_stops_at = None;
            }

            let ps = self.params.supply_pressure;
            let rate = if st.shutoff_passing {
                let flow = self.params.flow_coeff * st.needle * (ps - st.pressure).max(0.0) / ps;
                flow + self.surge(st.opened_at, t)
            } else {
                0.0
            };
            st.pressure += rate * secs;
            st.rate_rate = (rate - st.rate) / secs;
            st.rate = rate;
            st.at = t;
        }
        Ok(st)
    }
}

struct ShutoffValve(Arc<GasLine>);
struct FlowValve(Arc<GasLine>);
struct LinePressure(Arc<GasLine>);

impl Valve for ShutoffValve {
    fn is_open(&self) -> bool {
        self.0.advanced().map(|s| s.shutoff_open).unwrap_or(false)
    }

    fn is_closed(&self) -> bool {
        self.0.advanced().map(|s| !s.shutoff_open).unwrap_or(false)
    }

    fn last_motion(&self) -> Motion {
        self.0
            .advanced()
            .map(|s| s.shutoff_motion)
            .unwrap_or_default()
    }

    fn is_busy(&self) -> bool {
        self.0
            .advanced()
            .map(|s| s.shutoff_stops_at.is_some())
            .unwrap_or(false)
    }

    fn do_action(&self, action: ValveAction) -> Result<(), DeviceError> {
        let mut st = self.0.advanced()?;
        match action.motion() {
            Motion::Opening => {
                if !st.shutoff_passing {
                    st.opened_at = Some(st.at);
                }
                st.shutoff_open = true;
                st.shutoff_passing = true;
                st.shutoff_stops_at = None;
            }
            _ => {
                if st.shutoff_open {
                    st.shutoff_stops_at = Some(st.at + self.0.params.shutoff_latency);
                }
                st.shutoff_open = false;
            }
        }
        st.shutoff_motion = action.motion();
        Ok(())
    }
}

impl Valve for FlowValve {
    fn is_open(&self) -> bool {
        self.0.advanced().map(|s| s.needle >= 1.0).unwrap_or(false)
    }

    fn is_closed(&self) -> bool {
        self.0.advanced().map(|s| s.needle <= 0.0).unwrap_or(false)
    }

    fn last_motion(&self) -> Motion {
        self.0.advanced().map(|s| s.needle_motion).unwrap_or_default()
    }

    fn is_busy(&self) -> bool {
        self.0
            .advanced()
            .map(|s| (s.needle_target - s.needle).abs() > f64::EPSILON)
            .unwrap_or(false)
    }

    fn do_action(&self, action: ValveAction) -> Result<(), DeviceError> {
        let mut st = self.0.advanced()?;
        st.needle_target = (st.needle_target + action_step(action)).clamp(0.0, 1.0);
        st.needle_motion = action.motion();
        st.needle_log.push(action);
        Ok(())
    }
}

impl Meter for LinePressure {
    fn reading(&self) -> Result<MeterReading, DeviceError> {
        let st = self.0.advanced()?;
        Ok(MeterReading {
            value: st.pressure,
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
