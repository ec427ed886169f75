//! Collaborator contracts between the control core and the devices, operator and
//! notification transports it drives.
//!
//! Every device is shared between the scheduler thread, the watchdogs and the process
//! worker, so all methods take `&self`. Implementations keep their state in atomics or
//! behind their own locks; in particular [`Valve::last_motion`] must be published with
//! release/acquire ordering so a watchdog on another thread observes a command issued by
//! the process worker on its next tick.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock, ScaledClock};

use std::time::Duration;

/// Error type crossing every device boundary.
pub type DeviceError = Box<dyn std::error::Error + Send + Sync>;

/// Rate of change of a telemetered quantity, carrying its own rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateOfChange {
    /// First derivative, units per second.
    pub value: f64,
    /// Second derivative, units per second squared.
    pub rate: f64,
    /// Sampling interval the derivatives were estimated over.
    pub interval: Duration,
}

/// Zero-calibration status of a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroState {
    #[default]
    Idle,
    Zeroing,
}

/// One meter sample as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeterReading {
    pub value: f64,
    /// Noise floor; values below this are not meaningful.
    pub sensitivity: f64,
    pub rate: RateOfChange,
    pub zero: ZeroState,
}

pub trait Meter: Send + Sync {
    fn reading(&self) -> Result<MeterReading, DeviceError>;
    /// Begin a zero calibration.
    fn zero(&self) -> Result<(), DeviceError>;

    fn is_zeroing(&self) -> bool {
        self.reading()
            .map(|r| r.zero == ZeroState::Zeroing)
            .unwrap_or(false)
    }
}

/// Last commanded direction of a valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Motion {
    #[default]
    Unknown,
    Opening,
    Closing,
}

impl Motion {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Opening => 1,
            Self::Closing => 2,
        }
    }

    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Opening,
            2 => Self::Closing,
            _ => Self::Unknown,
        }
    }
}

/// Discrete actuation vocabulary understood by every valve controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValveAction {
    PulseOpen,
    OpenABit,
    OpenABitSlower,
    CloseABit,
    OpenFully,
    CloseFully,
}

impl ValveAction {
    /// Direction this action moves the valve in.
    pub const fn motion(self) -> Motion {
        match self {
            Self::PulseOpen | Self::OpenABit | Self::OpenABitSlower | Self::OpenFully => {
                Motion::Opening
            }
            Self::CloseABit | Self::CloseFully => Motion::Closing,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::PulseOpen => "PulseOpen",
            Self::OpenABit => "OpenABit",
            Self::OpenABitSlower => "OpenABitSlower",
            Self::CloseABit => "CloseABit",
            Self::OpenFully => "Open",
            Self::CloseFully => "Close",
        }
    }
}

pub trait Valve: Send + Sync {
    /// Fully open.
    fn is_open(&self) -> bool;
    /// Fully closed.
    fn is_closed(&self) -> bool;
    fn last_motion(&self) -> Motion;
    /// True while the owning actuator controller is still executing a command.
    fn is_busy(&self) -> bool;
    fn do_action(&self, action: ValveAction) -> Result<(), DeviceError>;

    fn open(&self) -> Result<(), DeviceError> {
        self.do_action(ValveAction::OpenFully)
    }

    fn close(&self) -> Result<(), DeviceError> {
        self.do_action(ValveAction::CloseFully)
    }
}

/// A binary output: cryogen supply, gauge enable line, pump relay.
pub trait Switch: Send + Sync {
    fn is_on(&self) -> bool;
    fn turn_on(&self) -> Result<(), DeviceError>;
    fn turn_off(&self) -> Result<(), DeviceError>;
}

pub trait Thermometer: Send + Sync {
    /// Degrees Celsius.
    fn temperature(&self) -> Result<f64, DeviceError>;
}

pub trait Heater: Thermometer {
    fn setpoint(&self) -> f64;
    fn set_setpoint(&self, celsius: f64) -> Result<(), DeviceError>;
    fn is_on(&self) -> bool;
    fn turn_on(&self) -> Result<(), DeviceError>;
    fn turn_off(&self) -> Result<(), DeviceError>;
}

/// Delivers an alert to people who are not at the instrument (mail, chat, pager).
pub trait Notifier: Send + Sync {
    fn send(&self, subject: &str, body: &str) -> Result<(), DeviceError>;
}

/// The operator's side of the instrument. The core has no UI of its own.
pub trait OperatorConsole: Send + Sync {
    /// Fire-and-forget attention sound.
    fn play_sound(&self);
    /// Block until the operator answers; `true` means proceed.
    fn ask(&self, question: &str) -> bool;
}

/// Reports whether the vacuum system is about to change pumping mode
/// (roughing to high-vacuum evacuation or back).
pub trait PumpModeMonitor: Send + Sync {
    fn switch_imminent(&self) -> bool;
}
