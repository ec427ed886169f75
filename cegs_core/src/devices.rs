//! Device registry and the typed plant resolved from it.
//!
//! Drivers register devices by name at bring-up. The roles the core itself drives
//! (gauges, vacuum valves, safety switches) are resolved once into [`Plant`], so hot
//! loops never look anything up by string. Procedures can still ask the plant for any
//! other registered device by name when they start.
use std::collections::BTreeMap;
use std::sync::Arc;

use cegs_config::DeviceNames;
use cegs_traits::{Heater, Meter, PumpModeMonitor, Switch, Thermometer, Valve};

use crate::error::CoreError;

#[derive(Clone)]
pub enum Device {
    Meter(Arc<dyn Meter>),
    Valve(Arc<dyn Valve>),
    Switch(Arc<dyn Switch>),
    Thermometer(Arc<dyn Thermometer>),
    Heater(Arc<dyn Heater>),
    PumpMode(Arc<dyn PumpModeMonitor>),
}

impl Device {
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Meter(_) => "meter",
            Self::Valve(_) => "valve",
            Self::Switch(_) => "switch",
            Self::Thermometer(_) => "thermometer",
            Self::Heater(_) => "heater",
            Self::PumpMode(_) => "pump-mode monitor",
        }
    }
}

#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<String, Device>,
}

macro_rules! typed_lookup {
    ($fn:ident, $variant:ident, $tr:ident, $kind:literal) => {
        pub fn $fn(&self, name: &str) -> Result<Arc<dyn $tr>, CoreError> {
            match self.devices.get(name) {
                Some(Device::$variant(d)) => Ok(Arc::clone(d)),
                _ => Err(CoreError::MissingDevice {
                    name: name.to_owned(),
                    kind: $kind,
                }),
            }
        }
    };
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a device.
    pub fn insert(&mut self, name: impl Into<String>, device: Device) -> &mut Self {
        self.devices.insert(name.into(), device);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = (&str, &'static str)> {
        self.devices.iter().map(|(n, d)| (n.as_str(), d.kind()))
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    typed_lookup!(meter, Meter, Meter, "meter");
    typed_lookup!(valve, Valve, Valve, "valve");
    typed_lookup!(switch, Switch, Switch, "switch");
    typed_lookup!(heater, Heater, Heater, "heater");
    typed_lookup!(pump_mode, PumpMode, PumpModeMonitor, "pump-mode monitor");

    /// Heaters also answer as thermometers.
    pub fn thermometer(&self, name: &str) -> Result<Arc<dyn Thermometer>, CoreError> {
        match self.devices.get(name) {
            Some(Device::Thermometer(t)) => Ok(Arc::clone(t)),
            Some(Device::Heater(h)) => Ok(Arc::new(HeaterThermometer(Arc::clone(h)))),
            _ => Err(CoreError::MissingDevice {
                name: name.to_owned(),
                kind: "thermometer",
            }),
        }
    }
}

struct HeaterThermometer(Arc<dyn Heater>);

impl Thermometer for HeaterThermometer {
    fn temperature(&self) -> Result<f64, cegs_traits::DeviceError> {
        self.0.temperature()
    }
}

/// The three valves between the manifold and the pumps.
#[derive(Clone)]
pub struct VacuumValves {
    pub high_vacuum: Arc<dyn Valve>,
    pub roughing: Arc<dyn Valve>,
    pub backing: Arc<dyn Valve>,
}

/// Typed handles for every role the core drives directly.
#[derive(Clone)]
pub struct Plant {
    pub ion_gauge: Arc<dyn Meter>,
    pub hp_gauge: Arc<dyn Meter>,
    pub foreline_gauge: Arc<dyn Meter>,
    pub gauge_enable: Arc<dyn Switch>,
    pub gauge_isolation: Arc<dyn Valve>,
    pub vm_isolation: Arc<dyn Valve>,
    pub vacuum: VacuumValves,
    pub ambient: Arc<dyn Thermometer>,
    pub cryogen_supply: Arc<dyn Switch>,
    /// Valves closed on shutdown.
    pub flow_paths: Vec<(String, Arc<dyn Valve>)>,
    pub pump_mode: Option<Arc<dyn PumpModeMonitor>>,
    registry: DeviceRegistry,
}

impl Plant {
    pub fn resolve(registry: DeviceRegistry, names: &DeviceNames) -> Result<Self, CoreError> {
        let flow_paths = names
            .flow_paths
            .iter()
            .map(|n| registry.valve(n).map(|v| (n.clone(), v)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ion_gauge: registry.meter(&names.ion_gauge)?,
            hp_gauge: registry.meter(&names.hp_gauge)?,
            foreline_gauge: registry.meter(&names.foreline_gauge)?,
            gauge_enable: registry.switch(&names.gauge_enable)?,
            gauge_isolation: registry.valve(&names.gauge_isolation)?,
            vm_isolation: registry.valve(&names.vm_isolation)?,
            vacuum: VacuumValves {
                high_vacuum: registry.valve(&names.high_vacuum_valve)?,
                roughing: registry.valve(&names.roughing_valve)?,
                backing: registry.valve(&names.backing_valve)?,
            },
            ambient: registry.thermometer(&names.ambient_thermometer)?,
            cryogen_supply: registry.switch(&names.cryogen_supply)?,
            flow_paths,
            pump_mode: registry
                .devices
                .values()
                .find_map(|d| match d {
                    Device::PumpMode(p) => Some(Arc::clone(p)),
                    _ => None,
                }),
            registry,
        })
    }

    /// Every registered device, for procedure-level lookups.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn valve(&self, name: &str) -> Result<Arc<dyn Valve>, CoreError> {
        self.registry.valve(name)
    }

    pub fn meter(&self, name: &str) -> Result<Arc<dyn Meter>, CoreError> {
        self.registry.meter(name)
    }

    pub fn heater(&self, name: &str) -> Result<Arc<dyn Heater>, CoreError> {
        self.registry.heater(name)
    }
}
