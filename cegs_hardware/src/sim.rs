//! Stand-alone simulated devices.
//!
//! Each device keeps its state in atomics so it can be shared between the scheduler,
//! watchdog and process threads exactly like a real driver handle. Faults can be
//! injected to exercise the health-flag path.
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cegs_traits::{
    Clock, DeviceError, Heater, Meter, MeterReading, Motion, RateOfChange, Switch, Thermometer,
    Valve, ValveAction, ZeroState,
};

use crate::error::HwError;

/// f64 stored as raw bits; last-value visibility across threads.
#[derive(Debug, Default)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub(crate) fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }
    pub(crate) fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
    pub(crate) fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Release);
    }
}

/// Position change for each partial action, as a fraction of full travel.
pub fn action_step(action: ValveAction) -> f64 {
    match action {
        ValveAction::PulseOpen => 0.10,
        ValveAction::OpenABit => 0.05,
        ValveAction::OpenABitSlower => 0.02,
        ValveAction::CloseABit => -0.03,
        ValveAction::OpenFully => 1.0,
        ValveAction::CloseFully => -1.0,
    }
}

/// A valve whose position jumps on command and reports busy for `move_time`.
pub struct SimValve {
    name: String,
    clock: Arc<dyn Clock>,
    position: AtomicF64,
    motion: AtomicU8,
    busy_until: Mutex<Option<Instant>>,
    move_time: Duration,
    faulted: AtomicBool,
    log: Mutex<Vec<ValveAction>>,
}

impl SimValve {
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            clock,
            position: AtomicF64::new(0.0),
            motion: AtomicU8::new(Motion::Unknown.as_u8()),
            busy_until: Mutex::new(None),
            move_time: Duration::from_millis(300),
            faulted: AtomicBool::new(false),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Start the valve fully open without recording a command.
    pub fn opened(self) -> Self {
        self.position.store(1.0);
        self
    }

    pub fn with_move_time(mut self, d: Duration) -> Self {
        self.move_time = d;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> f64 {
        self.position.load()
    }

    /// Every action commanded so far, in order.
    pub fn actions(&self) -> Vec<ValveAction> {
        self.log.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn count(&self, action: ValveAction) -> usize {
        self.actions().iter().filter(|a| **a == action).count()
    }

    pub fn set_faulted(&self, on: bool) {
        self.faulted.store(on, Ordering::Release);
    }
}

impl Valve for SimValve {
    fn is_open(&self) -> bool {
        self.position.load() >= 1.0
    }

    fn is_closed(&self) -> bool {
        self.position.load() <= 0.0
    }

    fn last_motion(&self) -> Motion {
        Motion::from_u8(self.motion.load(Ordering::Acquire))
    }

    fn is_busy(&self) -> bool {
        self.busy_until
            .lock()
            .map(|g| g.is_some_and(|t| self.clock.now() < t))
            .unwrap_or(false)
    }

    fn do_action(&self, action: ValveAction) -> Result<(), DeviceError> {
        if self.faulted.load(Ordering::Acquire) {
            return Err(Box::new(HwError::Fault {
                device: self.name.clone(),
                reason: "actuator not responding".into(),
            }));
        }
        let p = (self.position.load() + action_step(action)).clamp(0.0, 1.0);
        self.position.store(p);
        self.motion.store(action.motion().as_u8(), Ordering::Release);
        if let Ok(mut busy) = self.busy_until.lock() {
            *busy = Some(self.clock.now() + self.move_time);
        }
        if let Ok(mut log) = self.log.lock() {
            log.push(action);
        }
        tracing::trace!(valve = %self.name, action = action.name(), position = p, "valve action");
        Ok(())
    }
}

/// A meter whose value and rate are set by the test or simulation driver.
pub struct SimMeter {
    name: String,
    value: AtomicF64,
    sensitivity: f64,
    rate: AtomicF64,
    rate_rate: AtomicF64,
    faulted: AtomicBool,
    zero_requests: AtomicUsize,
}

impl SimMeter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: AtomicF64::new(value),
            sensitivity: 0.0,
            rate: AtomicF64::new(0.0),
            rate_rate: AtomicF64::new(0.0),
            faulted: AtomicBool::new(false),
            zero_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_sensitivity(mut self, s: f64) -> Self {
        self.sensitivity = s;
        self
    }

    pub fn set(&self, value: f64) {
        self.value.store(value);
    }

    pub fn set_rate(&self, rate: f64) {
        self.rate.store(rate);
    }

    pub fn set_rate_rate(&self, rate_rate: f64) {
        self.rate_rate.store(rate_rate);
    }

    pub fn set_faulted(&self, on: bool) {
        self.faulted.store(on, Ordering::Release);
    }

    pub fn zero_requests(&self) -> usize {
        self.zero_requests.load(Ordering::Acquire)
    }
}

impl Meter for SimMeter {
    fn reading(&self) -> Result<MeterReading, DeviceError> {
        if self.faulted.load(Ordering::Acquire) {
            return Err(Box::new(HwError::Timeout(self.name.clone())));
        }
        Ok(MeterReading {
            value: self.value.load().max(self.sensitivity),
            sensitivity: self.sensitivity,
            rate: RateOfChange {
                value: self.rate.load(),
                rate: self.rate_rate.load(),
                interval: Duration::from_millis(50),
            },
            zero: ZeroState::Idle,
        })
    }

    fn zero(&self) -> Result<(), DeviceError> {
        self.zero_requests.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

pub struct SimSwitch {
    name: String,
    on: AtomicBool,
    toggles: AtomicUsize,
}

impl SimSwitch {
    pub fn new(name: impl Into<String>, on: bool) -> Self {
        Self {
            name: name.into(),
            on: AtomicBool::new(on),
            toggles: AtomicUsize::new(0),
        }
    }

    /// Number of state changes commanded so far.
    pub fn toggles(&self) -> usize {
        self.toggles.load(Ordering::Acquire)
    }

    fn set(&self, on: bool) {
        if self.on.swap(on, Ordering::AcqRel) != on {
            self.toggles.fetch_add(1, Ordering::AcqRel);
            tracing::trace!(switch = %self.name, on, "switch toggled");
        }
    }
}

impl Switch for SimSwitch {
    fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    fn turn_on(&self) -> Result<(), DeviceError> {
        self.set(true);
        Ok(())
    }

    fn turn_off(&self) -> Result<(), DeviceError> {
        self.set(false);
        Ok(())
    }
}

pub struct SimThermometer {
    celsius: AtomicF64,
}

impl SimThermometer {
    pub fn new(celsius: f64) -> Self {
        Self {
            celsius: AtomicF64::new(celsius),
        }
    }

    pub fn set(&self, celsius: f64) {
        self.celsius.store(celsius);
    }
}

impl Thermometer for SimThermometer {
    fn temperature(&self) -> Result<f64, DeviceError> {
        Ok(self.celsius.load())
    }
}

/// First-order furnace: temperature approaches the setpoint (or ambient when off)
/// with time constant `tau`.
pub struct SimHeater {
    clock: Arc<dyn Clock>,
    state: Mutex<HeaterState>,
    ambient: f64,
    tau_s: f64,
}

struct HeaterState {
    temperature: f64,
    setpoint: f64,
    on: bool,
    at: Instant,
}

impl SimHeater {
    pub fn new(clock: Arc<dyn Clock>, ambient: f64, tau: Duration) -> Self {
        let at = clock.now();
        Self {
            clock,
            state: Mutex::new(HeaterState {
                temperature: ambient,
                setpoint: ambient,
                on: false,
                at,
            }),
            ambient,
            tau_s: tau.as_secs_f64().max(1e-3),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut HeaterState) -> T) -> Result<T, DeviceError> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| Box::new(HwError::Timeout("heater".into())) as DeviceError)?;
        let now = self.clock.now();
        let dt = now.saturating_duration_since(st.at).as_secs_f64();
        let goal = if st.on { st.setpoint } else { self.ambient };
        st.temperature = goal + (st.temperature - goal) * (-dt / self.tau_s).exp();
        st.at = now;
        Ok(f(&mut st))
    }
}

impl Thermometer for SimHeater {
    fn temperature(&self) -> Result<f64, DeviceError> {
        self.with_state(|s| s.temperature)
    }
}

impl Heater for SimHeater {
    fn setpoint(&self) -> f64 {
        self.with_state(|s| s.setpoint).unwrap_or(f64::NAN)
    }

    fn set_setpoint(&self, celsius: f64) -> Result<(), DeviceError> {
        self.with_state(|s| s.setpoint = celsius)
    }

    fn is_on(&self) -> bool {
        self.with_state(|s| s.on).unwrap_or(false)
    }

    fn turn_on(&self) -> Result<(), DeviceError> {
        self.with_state(|s| s.on = true)
    }

    fn turn_off(&self) -> Result<(), DeviceError> {
        self.with_state(|s| s.on = false)
    }
}

/// Pump-mode monitor whose "switch imminent" flag is set by the driver.
#[derive(Debug, Default)]
pub struct SimPumpMode {
    imminent: AtomicBool,
}

impl SimPumpMode {
    pub fn set_imminent(&self, on: bool) {
        self.imminent.store(on, Ordering::Release);
    }
}

impl cegs_traits::PumpModeMonitor for SimPumpMode {
    fn switch_imminent(&self) -> bool {
        self.imminent.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cegs_traits::ManualClock;

    #[test]
    fn valve_records_motion_and_clears_busy() {
        let clock = ManualClock::new();
        let v = SimValve::new("v_HV", Arc::new(clock.clone())).opened();
        assert!(v.is_open());
        assert_eq!(v.last_motion(), Motion::Unknown);
        v.close().unwrap();
        assert!(v.is_closed());
        assert_eq!(v.last_motion(), Motion::Closing);
        assert!(v.is_busy());
        clock.advance(Duration::from_millis(300));
        assert!(!v.is_busy());
        assert_eq!(v.count(ValveAction::CloseFully), 1);
    }

    #[test]
    fn faulted_devices_report_errors() {
        let clock = ManualClock::new();
        let v = SimValve::new("v_LV", Arc::new(clock));
        v.set_faulted(true);
        let err = v.open().unwrap_err();
        assert!(err.to_string().contains("v_LV"));
        assert!(v.actions().is_empty());

        let m = SimMeter::new("pForeline", 1.0);
        m.set_faulted(true);
        assert!(m.reading().is_err());
    }

    #[test]
    fn meter_floors_at_sensitivity() {
        let m = SimMeter::new("pVM_HP", 1e-5).with_sensitivity(1e-3);
        assert!((m.reading().unwrap().value - 1e-3).abs() < f64::EPSILON);
    }

    #[test]
    fn heater_approaches_setpoint() {
        let clock = ManualClock::new();
        let h = SimHeater::new(Arc::new(clock.clone()), 20.0, Duration::from_secs(10));
        h.set_setpoint(600.0).unwrap();
        h.turn_on().unwrap();
        clock.advance(Duration::from_secs(60));
        let t = h.temperature().unwrap();
        assert!(t > 590.0 && t < 600.0, "t={t}");
    }
}
