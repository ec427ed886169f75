//! Simulated devices and plant models for the CEGS controller.
//!
//! Everything here runs off an injected [`cegs_traits::Clock`], so the same plant drives
//! unit tests on a `ManualClock` and the `cegs simulate` command in real time.
pub mod bleed_line;
pub mod error;
pub mod gas_line;
pub mod sim;

pub use bleed_line::{BleedLine, BleedLineParams};
pub use error::HwError;
pub use gas_line::{GasLine, GasLineParams};
pub use sim::{SimHeater, SimMeter, SimPumpMode, SimSwitch, SimThermometer, SimValve};
