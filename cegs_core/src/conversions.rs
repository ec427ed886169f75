//! `From` implementations bridging `cegs_config` types to `cegs_core` types.

use crate::config::{
    AlertCfg, BleedCfg, FusionCfg, GasCalibration, InstrumentCfg, PressurizeCfg, SchedulerCfg,
    WatchdogCfg,
};
use crate::util::ms;

// ── SchedulerCfg ─────────────────────────────────────────────────────────────

impl From<&cegs_config::SchedulerCfg> for SchedulerCfg {
    fn from(c: &cegs_config::SchedulerCfg) -> Self {
        Self {
            tick: ms(c.tick_ms),
            medium_every: c.medium_every,
            slow_every: c.slow_every,
            log_every: c.log_every,
        }
    }
}

// ── FusionCfg ────────────────────────────────────────────────────────────────

impl From<&cegs_config::FusionCfg> for FusionCfg {
    fn from(c: &cegs_config::FusionCfg) -> Self {
        Self {
            max_ig: c.max_ig,
            min_hp: c.min_hp,
            ig_stabilize: ms(c.ig_stabilize_ms),
            switchpoint: c.switchpoint,
            switch_hysteresis: c.switch_hysteresis,
            min_dwell: ms(c.min_dwell_ms),
            foreline_safe: c.foreline_safe,
            baseline_max: c.baseline_max,
            foreline_steady_rate: c.foreline_steady_rate,
            baseline: ms(c.baseline_ms),
        }
    }
}

// ── WatchdogCfg ──────────────────────────────────────────────────────────────

impl From<&cegs_config::WatchdogCfg> for WatchdogCfg {
    fn from(c: &cegs_config::WatchdogCfg) -> Self {
        Self {
            backstream_vm_max: c.backstream_vm_max,
            backstream_foreline_max: c.backstream_foreline_max,
            flood_vm_max: c.flood_vm_max,
            roughing_rise_rate_max: c.roughing_rise_rate_max,
            roughing_failure: ms(c.roughing_failure_ms),
            freeze_c: c.freeze_c,
        }
    }
}

// ── AlertCfg ─────────────────────────────────────────────────────────────────

impl From<&cegs_config::AlertsCfg> for AlertCfg {
    fn from(c: &cegs_config::AlertsCfg) -> Self {
        Self {
            cooldown: ms(c.cooldown_ms),
            poll: ms(c.poll_ms),
        }
    }
}

// ── Regulators ───────────────────────────────────────────────────────────────

impl From<&cegs_config::PressurizeCfg> for PressurizeCfg {
    fn from(c: &cegs_config::PressurizeCfg) -> Self {
        Self {
            cycle: ms(c.cycle_ms),
            settle: ms(c.settle_ms),
            surge_budget: ms(c.surge_budget_ms),
            cushion_margin: ms(c.cushion_margin_ms),
            approach: ms(c.approach_ms),
            window_tolerance: c.window_tolerance,
            final_dwell: ms(c.final_dwell_ms),
        }
    }
}

impl From<&cegs_config::BleedCfg> for BleedCfg {
    fn from(c: &cegs_config::BleedCfg) -> Self {
        Self {
            cycle: ms(c.cycle_ms),
            cooldown: ms(c.cooldown_ms),
            dead_band: c.dead_band,
            well_below_factor: c.well_below_factor,
            pressure_floor: c.pressure_floor,
            establish: ms(c.establish_ms),
        }
    }
}

impl From<&cegs_config::GasRow> for GasCalibration {
    fn from(c: &cegs_config::GasRow) -> Self {
        Self {
            gas: c.gas.clone(),
            rise_rate_threshold: c.rise_rate_threshold,
            shutoff_latency: ms(c.shutoff_latency_ms),
            flow_scale: c.flow_scale,
        }
    }
}

// ── InstrumentCfg ────────────────────────────────────────────────────────────

impl From<&cegs_config::Config> for InstrumentCfg {
    fn from(c: &cegs_config::Config) -> Self {
        Self {
            scheduler: (&c.scheduler).into(),
            fusion: (&c.fusion).into(),
            watchdog: (&c.watchdog).into(),
            alerts: (&c.alerts).into(),
            wait_slice: ms(c.process.wait_slice_ms),
            pressurize: (&c.pressurize).into(),
            bleed: (&c.bleed).into(),
            gases: c
                .gases
                .iter()
                .map(|g| (g.gas.to_ascii_lowercase(), GasCalibration::from(g)))
                .collect(),
            shutdown_ack: ms(c.shutdown.ack_ms),
        }
    }
}
