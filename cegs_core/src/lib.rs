#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Control core for a carbon extraction and graphitization system (CEGS).
//!
//! Hardware-agnostic: every device is reached through the `cegs_traits` contracts, and
//! every delay goes through a `Clock`, so the whole core runs against simulated plants
//! and a manual clock in tests.
//!
//! ## Architecture
//!
//! - **Scheduler**: one tick loop; fast (watchdogs), medium (process polling), slow and
//!   logging buckets on nested periods (`scheduler`)
//! - **Telemetry**: dual-gauge pressure fusion, ion-gauge switching, baseline timer
//!   (`fusion`), rate estimation and the published fused meter (`telemetry`)
//! - **Safety**: watchdog hazards with idempotent protective actions (`watchdog`)
//! - **Alerts**: duplicate-suppressed, asynchronously delivered (`alert`, `event_log`)
//! - **Processes**: procedure registry, supervisor state machine, step stacks,
//!   cooperative waits (`process`, `steps`, `wait`)
//! - **Regulation**: pressurize-to-target and bleed-to-setpoint with discrete valve
//!   actions (`regulator`)
//! - **Assembly**: device registry and typed plant (`devices`), the instrument context
//!   and its builder (`instrument`)
//!
//! ## Units
//!
//! Pressures are in Torr, rates in Torr/s, temperatures in °C. Durations are
//! `std::time::Duration` everywhere inside the core.

pub mod alert;
pub mod config;
pub mod conversions;
pub mod devices;
pub mod error;
pub mod event_log;
pub mod fusion;
pub mod hw_error;
pub mod instrument;
pub mod mocks;
pub mod process;
pub mod regulator;
pub mod scheduler;
pub mod steps;
pub mod telemetry;
pub mod util;
pub mod wait;
pub mod watchdog;

pub use alert::{AlertDispatcher, AlertMessage};
pub use config::InstrumentCfg;
pub use devices::{Device, DeviceRegistry, Plant};
pub use error::{BuildError, CoreError, Result};
pub use instrument::{Instrument, InstrumentBuilder, ShutdownReport, Telemetry};
pub use process::{Outcome, ProcedureRegistry, ProcessContext, ProcessState, ProcessSupervisor};
pub use steps::{StepGuard, StepTracker};
pub use wait::{Flag, Waiter};
pub use watchdog::{Hazard, WatchdogMonitor};
