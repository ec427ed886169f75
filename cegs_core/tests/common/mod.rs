#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use cegs_config::DeviceNames;
use cegs_core::mocks::{MemoryEventLog, RecordingConsole, RecordingNotifier};
use cegs_core::{Device, DeviceRegistry, Instrument, InstrumentCfg, ProcedureRegistry, ProcessState};
use cegs_hardware::{SimMeter, SimSwitch, SimThermometer, SimValve};
use cegs_traits::Clock;

/// A fully simulated plant wired into an instrument.
pub struct Rig {
    pub ig: Arc<SimMeter>,
    pub hp: Arc<SimMeter>,
    pub foreline: Arc<SimMeter>,
    pub gauge_enable: Arc<SimSwitch>,
    pub gauge_isolation: Arc<SimValve>,
    pub vm_isolation: Arc<SimValve>,
    pub high_vacuum: Arc<SimValve>,
    pub roughing: Arc<SimValve>,
    pub backing: Arc<SimValve>,
    pub ambient: Arc<SimThermometer>,
    pub cryogen: Arc<SimSwitch>,
    pub supply: Arc<SimValve>,
    pub notifier: Arc<RecordingNotifier>,
    pub console: Arc<RecordingConsole>,
    pub events: Arc<MemoryEventLog>,
}

impl Rig {
    pub fn new(clock: &Arc<dyn Clock>) -> Self {
        let valve = |name: &str| Arc::new(SimValve::new(name, Arc::clone(clock)));
        Self {
            ig: Arc::new(SimMeter::new("pVM_IG", 5e-5).with_sensitivity(1e-9)),
            hp: Arc::new(SimMeter::new("pVM_HP", 2e-3).with_sensitivity(1e-3)),
            foreline: Arc::new(SimMeter::new("pForeline", 0.05)),
            gauge_enable: Arc::new(SimSwitch::new("IG_Enable", false)),
            gauge_isolation: Arc::new(SimValve::new("v_IG", Arc::clone(clock)).opened()),
            vm_isolation: Arc::new(SimValve::new("v_VM", Arc::clone(clock)).opened()),
            high_vacuum: Arc::new(SimValve::new("v_HV", Arc::clone(clock)).opened()),
            roughing: valve("v_LV"),
            backing: Arc::new(SimValve::new("v_B", Arc::clone(clock)).opened()),
            ambient: Arc::new(SimThermometer::new(21.0)),
            cryogen: Arc::new(SimSwitch::new("LN2_Supply", false)),
            supply: Arc::new(SimValve::new("v_Supply", Arc::clone(clock)).opened()),
            notifier: Arc::new(RecordingNotifier::new()),
            console: Arc::new(RecordingConsole::default()),
            events: Arc::new(MemoryEventLog::new()),
        }
    }

    pub fn registry(&self) -> DeviceRegistry {
        let mut r = DeviceRegistry::new();
        r.insert("pVM_IG", Device::Meter(self.ig.clone()))
            .insert("pVM_HP", Device::Meter(self.hp.clone()))
            .insert("pForeline", Device::Meter(self.foreline.clone()))
            .insert("IG_Enable", Device::Switch(self.gauge_enable.clone()))
            .insert("v_IG", Device::Valve(self.gauge_isolation.clone()))
            .insert("v_VM", Device::Valve(self.vm_isolation.clone()))
            .insert("v_HV", Device::Valve(self.high_vacuum.clone()))
            .insert("v_LV", Device::Valve(self.roughing.clone()))
            .insert("v_B", Device::Valve(self.backing.clone()))
            .insert("tAmbient", Device::Thermometer(self.ambient.clone()))
            .insert("LN2_Supply", Device::Switch(self.cryogen.clone()))
            .insert("v_Supply", Device::Valve(self.supply.clone()));
        r
    }

    pub fn names() -> DeviceNames {
        DeviceNames {
            flow_paths: vec!["v_Supply".into()],
            ..DeviceNames::default()
        }
    }

    pub fn build(
        &self,
        clock: Arc<dyn Clock>,
        cfg: InstrumentCfg,
        procedures: ProcedureRegistry,
    ) -> Instrument {
        Instrument::builder()
            .with_cfg(cfg)
            .with_device_names(Self::names())
            .with_devices(self.registry())
            .with_procedures(procedures)
            .with_notifier(self.notifier.clone())
            .with_console(self.console.clone())
            .with_event_log(self.events.clone())
            .with_clock(clock)
            .try_build()
            .unwrap()
    }
}

/// Poll the supervisor (as the medium bucket would) until it reaches `state`.
pub fn poll_until(inst: &Instrument, state: ProcessState) -> bool {
    for _ in 0..5_000 {
        inst.supervisor().poll();
        if inst.process_state() == state {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}
