use std::sync::Arc;
use std::time::Duration;

use cegs_core::config::{AlertCfg, WatchdogCfg};
use cegs_core::devices::VacuumValves;
use cegs_core::mocks::{MemoryEventLog, RecordingConsole, RecordingNotifier};
use cegs_core::watchdog::Snapshot;
use cegs_core::{AlertDispatcher, Hazard, WatchdogMonitor};
use cegs_hardware::{SimSwitch, SimValve};
use cegs_traits::{Clock, ManualClock, Switch, Valve, ValveAction};
use rstest::{fixture, rstest};

struct Plant {
    clock: ManualClock,
    hv: Arc<SimValve>,
    rough: Arc<SimValve>,
    backing: Arc<SimValve>,
    cryogen: Arc<SimSwitch>,
    notifier: Arc<RecordingNotifier>,
    alerts: AlertDispatcher,
}

impl Plant {
    fn vacuum(&self) -> VacuumValves {
        VacuumValves {
            high_vacuum: self.hv.clone(),
            roughing: self.rough.clone(),
            backing: self.backing.clone(),
        }
    }

    fn closes(&self, v: &SimValve) -> usize {
        v.count(ValveAction::CloseFully)
    }
}

#[fixture]
fn plant() -> Plant {
    let clock = ManualClock::new();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let notifier = Arc::new(RecordingNotifier::new());
    let alerts = AlertDispatcher::spawn(
        &AlertCfg::default(),
        Arc::clone(&shared),
        notifier.clone(),
        Arc::new(RecordingConsole::default()),
        Arc::new(MemoryEventLog::new()),
    );
    Plant {
        hv: Arc::new(SimValve::new("v_HV", Arc::clone(&shared)).opened()),
        rough: Arc::new(SimValve::new("v_LV", Arc::clone(&shared)).opened()),
        backing: Arc::new(SimValve::new("v_B", Arc::clone(&shared)).opened()),
        cryogen: Arc::new(SimSwitch::new("LN2_Supply", true)),
        clock,
        notifier,
        alerts,
    }
}

fn snapshot(vm: f64, foreline: f64) -> Snapshot {
    Snapshot {
        vm_pressure: vm,
        foreline,
        foreline_rate: 0.0,
        roughing_open: true,
        ambient: 21.0,
        cryogen_on: true,
    }
}

fn tick(wd: &mut WatchdogMonitor, p: &Plant, s: &Snapshot) -> Vec<Hazard> {
    let acted = wd.check(p.clock.now(), s, &p.vacuum(), p.cryogen.as_ref(), &p.alerts);
    p.clock.advance(Duration::from_millis(50));
    acted
}

#[rstest]
fn flooding_closes_high_vacuum_once(plant: Plant) {
    let mut wd = WatchdogMonitor::new(WatchdogCfg::default());
    let flooded = snapshot(1000.0, 5.0);
    assert_eq!(tick(&mut wd, &plant, &flooded), vec![Hazard::PumpFlooded]);
    for _ in 0..20 {
        assert!(tick(&mut wd, &plant, &flooded).is_empty());
    }
    assert_eq!(plant.closes(&plant.hv), 1);
    assert_eq!(plant.closes(&plant.rough), 1);
    assert_eq!(plant.closes(&plant.backing), 0);
    plant.alerts.shutdown();
    assert_eq!(plant.notifier.sent().len(), 1);
}

#[rstest]
fn flooding_closes_high_vacuum_before_roughing(plant: Plant) {
    let mut wd = WatchdogMonitor::new(WatchdogCfg::default());
    // Roughing already being closed by someone else: only the HV valve is commanded.
    plant.rough.close().unwrap();
    tick(&mut wd, &plant, &snapshot(1000.0, 5.0));
    assert_eq!(plant.closes(&plant.hv), 1);
    assert_eq!(plant.closes(&plant.rough), 1);
}

#[rstest]
fn backstreaming_closes_roughing_unless_closing(plant: Plant) {
    let mut wd = WatchdogMonitor::new(WatchdogCfg::default());
    let low = snapshot(1e-3, 1e-3);
    assert_eq!(tick(&mut wd, &plant, &low), vec![Hazard::Backstreaming]);
    assert!(tick(&mut wd, &plant, &low).is_empty());
    assert_eq!(plant.closes(&plant.rough), 1);
    assert_eq!(plant.closes(&plant.hv), 0);
}

#[rstest]
fn sustained_foreline_rise_closes_everything(plant: Plant) {
    let mut wd = WatchdogMonitor::new(WatchdogCfg::default());
    let rising = Snapshot {
        foreline_rate: 0.5,
        ..snapshot(1.0, 1.0)
    };
    assert!(tick(&mut wd, &plant, &rising).is_empty());
    plant.clock.advance(Duration::from_secs(119));
    assert!(tick(&mut wd, &plant, &rising).is_empty());
    plant.clock.advance(Duration::from_secs(2));
    assert_eq!(tick(&mut wd, &plant, &rising), vec![Hazard::RoughingFailure]);
    assert_eq!(plant.closes(&plant.hv), 1);
    assert_eq!(plant.closes(&plant.rough), 1);
    assert_eq!(plant.closes(&plant.backing), 1);
}

#[rstest]
fn recovery_restarts_the_roughing_timer(plant: Plant) {
    let mut wd = WatchdogMonitor::new(WatchdogCfg::default());
    let rising = Snapshot {
        foreline_rate: 0.5,
        ..snapshot(1.0, 1.0)
    };
    tick(&mut wd, &plant, &rising);
    plant.clock.advance(Duration::from_secs(100));
    tick(&mut wd, &plant, &snapshot(1.0, 1.0));
    tick(&mut wd, &plant, &rising);
    plant.clock.advance(Duration::from_secs(100));
    assert!(tick(&mut wd, &plant, &rising).is_empty());
    assert_eq!(plant.closes(&plant.backing), 0);
}

#[rstest]
fn freezing_ambient_shuts_off_cryogen(plant: Plant) {
    let mut wd = WatchdogMonitor::new(WatchdogCfg::default());
    let cold = Snapshot {
        ambient: -3.0,
        ..snapshot(1.0, 1.0)
    };
    assert_eq!(tick(&mut wd, &plant, &cold), vec![Hazard::ContainmentFailure]);
    assert!(!plant.cryogen.is_on());
    let cold_off = Snapshot {
        cryogen_on: false,
        ..cold
    };
    assert!(tick(&mut wd, &plant, &cold_off).is_empty());
}
