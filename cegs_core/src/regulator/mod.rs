//! Feedback regulation with discrete valve actions.
//!
//! No actuator here has a proportional input; the only control vocabulary is
//! [`ValveAction`](cegs_traits::ValveAction) plus a rate-of-change signal that carries
//! its own rate. Both policies take per-gas constants as parameters and neither
//! enforces an overall timeout: a runaway is for the watchdogs and the operator.
pub mod bleed;
pub mod pressurize;

pub use bleed::{BleedRegulator, BleedReport, BleedState, ValveView, bleed};
pub use pressurize::{
    Adjustment, GasLineValves, PressurizeReport, cycle_adjustment, expected_time, pressurize,
};

use cegs_traits::{Meter, MeterReading, Valve, ValveAction};
use eyre::WrapErr;

use crate::error::Result;
use crate::hw_error::device_report;

pub(crate) fn read(meter: &dyn Meter, what: &'static str) -> Result<MeterReading> {
    meter
        .reading()
        .map_err(|e| device_report(&*e))
        .wrap_err(what)
}

pub(crate) fn act(valve: &dyn Valve, action: ValveAction, what: &'static str) -> Result<()> {
    tracing::debug!(valve = what, action = action.name(), "regulator action");
    valve
        .do_action(action)
        .map_err(|e| device_report(&*e))
        .wrap_err_with(|| format!("{what}: {}", action.name()))
}
