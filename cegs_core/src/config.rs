//! Runtime configuration for the control core.
//!
//! These are the typed structs the core runs on, with durations resolved. They are
//! separate from the TOML-deserialized config in `cegs_config`; see `conversions`.
use std::collections::BTreeMap;
use std::time::Duration;

/// Tick pacing and bucket periods, in ticks.
#[derive(Debug, Clone)]
pub struct SchedulerCfg {
    pub tick: Duration,
    pub medium_every: u32,
    pub slow_every: u32,
    pub log_every: u32,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            medium_every: 4,
            slow_every: 20,
            log_every: 200,
        }
    }
}

/// Dual-gauge fusion thresholds and ion-gauge switching policy.
#[derive(Debug, Clone)]
pub struct FusionCfg {
    /// Below this the ion gauge is used exclusively.
    pub max_ig: f64,
    /// Above this the high-pressure gauge is used exclusively.
    pub min_hp: f64,
    pub ig_stabilize: Duration,
    pub switchpoint: f64,
    /// Fractional half-width of the enable/disable band around `switchpoint`.
    pub switch_hysteresis: f64,
    pub min_dwell: Duration,
    pub foreline_safe: f64,
    /// "Rough vacuum" ceiling for the baseline timer.
    pub baseline_max: f64,
    pub foreline_steady_rate: f64,
    /// Baseline time required before a zero calibration is trusted.
    pub baseline: Duration,
}

impl Default for FusionCfg {
    fn default() -> Self {
        Self {
            max_ig: 1e-4,
            min_hp: 1e-2,
            ig_stabilize: Duration::from_secs(10),
            switchpoint: 5e-3,
            switch_hysteresis: 0.2,
            min_dwell: Duration::from_secs(3),
            foreline_safe: 0.1,
            baseline_max: 0.05,
            foreline_steady_rate: 1e-3,
            baseline: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchdogCfg {
    pub backstream_vm_max: f64,
    pub backstream_foreline_max: f64,
    pub flood_vm_max: f64,
    /// Torr/s.
    pub roughing_rise_rate_max: f64,
    pub roughing_failure: Duration,
    /// Ambient temperature (°C) below which a running cryogen supply is shut off.
    pub freeze_c: f64,
}

impl Default for WatchdogCfg {
    fn default() -> Self {
        Self {
            backstream_vm_max: 0.02,
            backstream_foreline_max: 0.02,
            flood_vm_max: 900.0,
            roughing_rise_rate_max: 0.05,
            roughing_failure: Duration::from_secs(120),
            freeze_c: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertCfg {
    /// Identical bodies within this window are suppressed.
    pub cooldown: Duration,
    /// How often the delivery worker re-checks for shutdown while idle.
    pub poll: Duration,
}

impl Default for AlertCfg {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30 * 60),
            poll: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PressurizeCfg {
    pub cycle: Duration,
    pub settle: Duration,
    pub surge_budget: Duration,
    pub cushion_margin: Duration,
    pub approach: Duration,
    pub window_tolerance: f64,
    pub final_dwell: Duration,
}

impl Default for PressurizeCfg {
    fn default() -> Self {
        Self {
            cycle: Duration::from_millis(2_500),
            settle: Duration::from_secs(3),
            surge_budget: Duration::from_secs(20),
            cushion_margin: Duration::from_secs(1),
            approach: Duration::from_secs(30),
            window_tolerance: 0.25,
            final_dwell: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BleedCfg {
    pub cycle: Duration,
    pub cooldown: Duration,
    pub dead_band: f64,
    pub well_below_factor: f64,
    pub pressure_floor: f64,
    pub establish: Duration,
}

impl Default for BleedCfg {
    fn default() -> Self {
        Self {
            cycle: Duration::from_secs(1),
            cooldown: Duration::from_secs(10),
            dead_band: 0.05,
            well_below_factor: 3.0,
            pressure_floor: 0.02,
            establish: Duration::from_secs(150),
        }
    }
}

/// Per-gas constants the regulators are parameterized with.
#[derive(Debug, Clone, PartialEq)]
pub struct GasCalibration {
    pub gas: String,
    /// Torr/s²; the post-surge decline must be steeper than this.
    pub rise_rate_threshold: f64,
    pub shutoff_latency: Duration,
    /// Remaining pressure (Torr) above which the flow is opened in the larger step.
    pub flow_scale: f64,
}

/// Everything the instrument needs at run time.
#[derive(Debug, Clone)]
pub struct InstrumentCfg {
    pub scheduler: SchedulerCfg,
    pub fusion: FusionCfg,
    pub watchdog: WatchdogCfg,
    pub alerts: AlertCfg,
    pub wait_slice: Duration,
    pub pressurize: PressurizeCfg,
    pub bleed: BleedCfg,
    /// Keyed by lowercase gas name.
    pub gases: BTreeMap<String, GasCalibration>,
    pub shutdown_ack: Duration,
}

impl Default for InstrumentCfg {
    fn default() -> Self {
        Self {
            scheduler: SchedulerCfg::default(),
            fusion: FusionCfg::default(),
            watchdog: WatchdogCfg::default(),
            alerts: AlertCfg::default(),
            wait_slice: crate::util::MAX_WAIT_SLICE,
            pressurize: PressurizeCfg::default(),
            bleed: BleedCfg::default(),
            gases: BTreeMap::new(),
            shutdown_ack: Duration::from_secs(3),
        }
    }
}

impl InstrumentCfg {
    pub fn gas(&self, name: &str) -> Option<&GasCalibration> {
        self.gases.get(&name.to_ascii_lowercase())
    }
}
