#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and gas calibration parsing for the CEGS controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - Per-gas calibration constants come from `[[gases]]` tables or from a CSV file
//!   with strict headers; CSV rows override TOML entries with the same name.
//!
//! Pressures are in Torr, rates in Torr/s, durations in milliseconds.
use serde::Deserialize;
use std::collections::BTreeMap;

/// Per-gas constants for the pressurize regulator.
///
/// CSV headers:
/// gas,rise_rate_threshold,shutoff_latency_ms,flow_scale
///
/// Example:
/// gas,rise_rate_threshold,shutoff_latency_ms,flow_scale
/// CO2,0.05,1200,40.0
/// H2,0.20,800,120.0
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct GasRow {
    #[serde(alias = "name")]
    pub gas: String,
    /// Magnitude (Torr/s^2) the surge's rate of change must fall past before flow
    /// regulation begins.
    pub rise_rate_threshold: f64,
    /// Closing latency of the gas supply's shutoff valve.
    pub shutoff_latency_ms: u64,
    /// Remaining pressure (Torr) above which the regulator uses the coarse open step.
    pub flow_scale: f64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerCfg {
    pub tick_ms: u64,
    /// Medium bucket (process polling) runs every N ticks.
    pub medium_every: u32,
    /// Slow bucket (device housekeeping) runs every N ticks; multiple of `medium_every`.
    pub slow_every: u32,
    /// Logging signal every N ticks; multiple of `slow_every`.
    pub log_every: u32,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            medium_every: 4,
            slow_every: 20,
            log_every: 200,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FusionCfg {
    /// Below this the ion gauge is used exclusively.
    pub max_ig: f64,
    /// Above this the high-pressure gauge is used exclusively.
    pub min_hp: f64,
    /// The ion gauge must be enabled this long before it is trusted.
    pub ig_stabilize_ms: u64,
    /// HP pressure around which the ion gauge is switched.
    pub switchpoint: f64,
    /// Fractional hysteresis band around `switchpoint`.
    pub switch_hysteresis: f64,
    /// Minimum time in one enable state before the line may toggle again.
    pub min_dwell_ms: u64,
    /// The ion gauge may only be on while the foreline is below this.
    pub foreline_safe: f64,
    /// Rough-vacuum ceiling for the baseline timer.
    pub baseline_max: f64,
    /// |foreline rate| below this counts as steady.
    pub foreline_steady_rate: f64,
    /// Baseline time required before an HP zero is trusted.
    pub baseline_ms: u64,
}

impl Default for FusionCfg {
    fn default() -> Self {
        Self {
            max_ig: 1e-4,
            min_hp: 1e-2,
            ig_stabilize_ms: 10_000,
            switchpoint: 5e-3,
            switch_hysteresis: 0.2,
            min_dwell_ms: 3_000,
            foreline_safe: 0.1,
            baseline_max: 0.05,
            foreline_steady_rate: 1e-3,
            baseline_ms: 20_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogCfg {
    pub backstream_vm_max: f64,
    pub backstream_foreline_max: f64,
    pub flood_vm_max: f64,
    pub roughing_rise_rate_max: f64,
    pub roughing_failure_ms: u64,
    pub freeze_c: f64,
}

impl Default for WatchdogCfg {
    fn default() -> Self {
        Self {
            backstream_vm_max: 0.02,
            backstream_foreline_max: 0.02,
            flood_vm_max: 900.0,
            roughing_rise_rate_max: 0.05,
            roughing_failure_ms: 120_000,
            freeze_c: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AlertsCfg {
    /// Identical alerts inside this window are suppressed.
    pub cooldown_ms: u64,
    /// Dispatcher wake interval used to observe shutdown.
    pub poll_ms: u64,
    /// Operator event log (plain text, one line per event).
    pub event_log: Option<String>,
}

impl Default for AlertsCfg {
    fn default() -> Self {
        Self {
            cooldown_ms: 30 * 60 * 1000,
            poll_ms: 100,
            event_log: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProcessCfg {
    /// Longest single sleep inside a procedure wait.
    pub wait_slice_ms: u64,
}

impl Default for ProcessCfg {
    fn default() -> Self {
        Self { wait_slice_ms: 35 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PressurizeCfg {
    pub cycle_ms: u64,
    /// Dwell after cracking the flow valve.
    pub settle_ms: u64,
    /// Give up waiting for the admission surge to pass after this long.
    pub surge_budget_ms: u64,
    /// Added to the shutoff latency to form the cushion.
    pub cushion_margin_ms: u64,
    /// Planned time from the start of regulation to the cushion.
    pub approach_ms: u64,
    /// Fractional tolerance around the planned arrival time.
    pub window_tolerance: f64,
    /// Dwell after the shutoff valve is closed.
    pub final_dwell_ms: u64,
}

impl Default for PressurizeCfg {
    fn default() -> Self {
        Self {
            cycle_ms: 2_500,
            settle_ms: 3_000,
            surge_budget_ms: 20_000,
            cushion_margin_ms: 1_000,
            approach_ms: 30_000,
            window_tolerance: 0.25,
            final_dwell_ms: 2_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BleedCfg {
    pub cycle_ms: u64,
    /// Time for a valve move to show up in the measurement.
    pub cooldown_ms: u64,
    /// Absolute band around the target inside which the valve is left alone.
    pub dead_band: f64,
    /// "Well below" means under `-dead_band * well_below_factor`.
    pub well_below_factor: f64,
    /// Measured value below which the valve may be opened fully.
    pub pressure_floor: f64,
    /// Promote Starting to Established after this long even without a crossing.
    pub establish_ms: u64,
}

impl Default for BleedCfg {
    fn default() -> Self {
        Self {
            cycle_ms: 1_000,
            cooldown_ms: 10_000,
            dead_band: 0.05,
            well_below_factor: 3.0,
            pressure_floor: 0.02,
            establish_ms: 150_000,
        }
    }
}

/// Role → device-name map, resolved once at bring-up.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceNames {
    pub ion_gauge: String,
    pub hp_gauge: String,
    pub foreline_gauge: String,
    pub gauge_enable: String,
    pub gauge_isolation: String,
    pub vm_isolation: String,
    pub high_vacuum_valve: String,
    pub roughing_valve: String,
    pub backing_valve: String,
    pub ambient_thermometer: String,
    pub cryogen_supply: String,
    /// Valves closed first on shutdown.
    pub flow_paths: Vec<String>,
}

impl Default for DeviceNames {
    fn default() -> Self {
        Self {
            ion_gauge: "pVM_IG".into(),
            hp_gauge: "pVM_HP".into(),
            foreline_gauge: "pForeline".into(),
            gauge_enable: "IG_Enable".into(),
            gauge_isolation: "v_IG".into(),
            vm_isolation: "v_VM".into(),
            high_vacuum_valve: "v_HV".into(),
            roughing_valve: "v_LV".into(),
            backing_valve: "v_B".into(),
            ambient_thermometer: "tAmbient".into(),
            cryogen_supply: "LN2_Supply".into(),
            flow_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShutdownCfg {
    /// Per-device acknowledgement wait during shutdown.
    pub ack_ms: u64,
}

impl Default for ShutdownCfg {
    fn default() -> Self {
        Self { ack_ms: 3_000 }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerCfg,
    pub fusion: FusionCfg,
    pub watchdog: WatchdogCfg,
    pub alerts: AlertsCfg,
    pub process: ProcessCfg,
    pub pressurize: PressurizeCfg,
    pub bleed: BleedCfg,
    pub devices: DeviceNames,
    pub gases: Vec<GasRow>,
    pub logging: Logging,
    pub shutdown: ShutdownCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Load per-gas constants from CSV, enforcing the exact header row.
pub fn load_gas_csv(path: &std::path::Path) -> eyre::Result<Vec<GasRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open gas CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = [
        "gas",
        "rise_rate_threshold",
        "shutoff_latency_ms",
        "flow_scale",
    ];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "gas CSV must have headers '{}', got: {}",
            expected.join(","),
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<GasRow>().enumerate() {
        match rec {
            Ok(row) => {
                validate_gas(&row).map_err(|e| eyre::eyre!("CSV row {}: {e}", idx + 2))?;
                rows.push(row);
            }
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.is_empty() {
        eyre::bail!("gas CSV {:?} has no rows", path);
    }
    Ok(rows)
}

fn validate_gas(g: &GasRow) -> eyre::Result<()> {
    if g.gas.trim().is_empty() {
        eyre::bail!("gas name must not be empty");
    }
    if !(g.rise_rate_threshold.is_finite() && g.rise_rate_threshold > 0.0) {
        eyre::bail!("gas {}: rise_rate_threshold must be > 0", g.gas);
    }
    if !(g.flow_scale.is_finite() && g.flow_scale > 0.0) {
        eyre::bail!("gas {}: flow_scale must be > 0", g.gas);
    }
    if g.shutoff_latency_ms > 60_000 {
        eyre::bail!("gas {}: shutoff_latency_ms is unreasonably large (>60s)", g.gas);
    }
    Ok(())
}

impl Config {
    /// Merge CSV gas rows over the TOML table (CSV wins on name clashes).
    pub fn merge_gases(&mut self, rows: Vec<GasRow>) {
        let mut by_name: BTreeMap<String, GasRow> = self
            .gases
            .drain(..)
            .map(|g| (g.gas.clone(), g))
            .collect();
        for row in rows {
            by_name.insert(row.gas.clone(), row);
        }
        self.gases = by_name.into_values().collect();
    }

    pub fn gas(&self, name: &str) -> Option<&GasRow> {
        self.gases.iter().find(|g| g.gas.eq_ignore_ascii_case(name))
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Scheduler
        let s = &self.scheduler;
        if s.tick_ms == 0 {
            eyre::bail!("scheduler.tick_ms must be >= 1");
        }
        if s.medium_every == 0 || s.slow_every == 0 || s.log_every == 0 {
            eyre::bail!("scheduler bucket periods must be >= 1");
        }
        if s.slow_every % s.medium_every != 0 {
            eyre::bail!("scheduler.slow_every must be a multiple of scheduler.medium_every");
        }
        if s.log_every % s.slow_every != 0 {
            eyre::bail!("scheduler.log_every must be a multiple of scheduler.slow_every");
        }

        // Fusion
        let f = &self.fusion;
        if !(f.max_ig > 0.0 && f.min_hp.is_finite() && f.max_ig < f.min_hp) {
            eyre::bail!("fusion.max_ig must be > 0 and < fusion.min_hp");
        }
        if !(f.switchpoint > 0.0 && f.switchpoint.is_finite()) {
            eyre::bail!("fusion.switchpoint must be > 0");
        }
        if !(0.0..1.0).contains(&f.switch_hysteresis) {
            eyre::bail!("fusion.switch_hysteresis must be in [0.0, 1.0)");
        }
        if f.foreline_safe <= 0.0 || f.baseline_max <= 0.0 || f.foreline_steady_rate <= 0.0 {
            eyre::bail!("fusion foreline/baseline thresholds must be > 0");
        }

        // Watchdog
        let w = &self.watchdog;
        if w.backstream_vm_max <= 0.0 || w.backstream_foreline_max <= 0.0 {
            eyre::bail!("watchdog backstreaming thresholds must be > 0");
        }
        if w.flood_vm_max <= w.backstream_vm_max {
            eyre::bail!("watchdog.flood_vm_max must exceed watchdog.backstream_vm_max");
        }
        if w.roughing_rise_rate_max <= 0.0 {
            eyre::bail!("watchdog.roughing_rise_rate_max must be > 0");
        }
        if w.roughing_failure_ms == 0 {
            eyre::bail!("watchdog.roughing_failure_ms must be >= 1");
        }

        // Alerts
        if self.alerts.poll_ms == 0 {
            eyre::bail!("alerts.poll_ms must be >= 1");
        }

        // Process
        if !(1..=35).contains(&self.process.wait_slice_ms) {
            eyre::bail!("process.wait_slice_ms must be in [1, 35]");
        }

        // Pressurize
        let p = &self.pressurize;
        if p.cycle_ms == 0 {
            eyre::bail!("pressurize.cycle_ms must be >= 1");
        }
        if p.approach_ms == 0 {
            eyre::bail!("pressurize.approach_ms must be >= 1");
        }
        if !(p.window_tolerance > 0.0 && p.window_tolerance < 1.0) {
            eyre::bail!("pressurize.window_tolerance must be in (0.0, 1.0)");
        }

        // Bleed
        let b = &self.bleed;
        if b.cycle_ms == 0 {
            eyre::bail!("bleed.cycle_ms must be >= 1");
        }
        if !(b.dead_band.is_finite() && b.dead_band >= 0.0) {
            eyre::bail!("bleed.dead_band must be >= 0");
        }
        if b.well_below_factor < 1.0 {
            eyre::bail!("bleed.well_below_factor must be >= 1.0");
        }

        // Gases
        for g in &self.gases {
            validate_gas(g)?;
        }

        Ok(())
    }
}
