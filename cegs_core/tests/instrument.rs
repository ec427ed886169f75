mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cegs_core::fusion::Source;
use cegs_core::scheduler::Buckets;
use cegs_core::{BuildError, CoreError, Flag, Instrument, InstrumentCfg, ProcedureRegistry, ProcessState};
use cegs_core::mocks::RecordingNotifier;
use cegs_traits::{Clock, ManualClock, MonotonicClock, Switch, Valve};
use common::Rig;

fn manual() -> (ManualClock, Arc<dyn Clock>) {
    let clock = ManualClock::new();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    (clock, shared)
}

fn eventually(budget: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let until = Instant::now() + budget;
    while Instant::now() < until {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn builder_requires_devices_and_transports() {
    let err = Instrument::builder().try_build().err();
    assert!(matches!(err, Some(BuildError::MissingDevices)));

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let rig = Rig::new(&clock);
    let err = Instrument::builder()
        .with_device_names(Rig::names())
        .with_devices(rig.registry())
        .try_build()
        .err();
    assert!(matches!(err, Some(BuildError::MissingNotifier)));
}

#[test]
fn builder_reports_a_missing_role() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new());
    let rig = Rig::new(&clock);
    let mut names = Rig::names();
    names.foreline_gauge = "pForeline_2".into();
    let err = Instrument::builder()
        .with_device_names(names)
        .with_devices(rig.registry())
        .with_notifier(Arc::new(RecordingNotifier::new()))
        .with_console(rig.console.clone())
        .try_build()
        .err()
        .map(|e| e.to_string())
        .unwrap_or_default();
    assert!(err.contains("pForeline_2"), "{err}");
}

#[test]
fn refresh_switches_to_the_ion_gauge_once_it_has_stabilized() {
    let (clock, shared) = manual();
    let rig = Rig::new(&shared);
    let inst = rig.build(shared, InstrumentCfg::default(), ProcedureRegistry::new());

    inst.tick(0);
    let t = inst.telemetry();
    assert!(t.healthy);
    assert_eq!(t.source, Some(Source::HighPressure));
    assert!((t.pressure - 2e-3).abs() < 1e-12);
    assert!(!rig.gauge_enable.is_on());

    // below the enable threshold and past the dwell: gauge comes on
    clock.advance(Duration::from_secs(3));
    inst.tick(1);
    assert!(rig.gauge_enable.is_on());
    assert_eq!(inst.telemetry().source, Some(Source::HighPressure));

    clock.advance(Duration::from_secs(1));
    inst.tick(2);
    clock.advance(Duration::from_secs(10));
    inst.tick(3);
    let t = inst.telemetry();
    assert!(t.ion_gauge_on);
    assert_eq!(t.source, Some(Source::IonGauge));
    assert!((t.pressure - 5e-5).abs() < 1e-12);
    assert!((inst.vm_meter().value() - 5e-5).abs() < 1e-12);
    inst.shut_down();
}

#[test]
fn hp_zero_waits_for_a_steady_baseline() {
    let (clock, shared) = manual();
    let rig = Rig::new(&shared);
    let inst = rig.build(shared, InstrumentCfg::default(), ProcedureRegistry::new());

    inst.tick(0);
    assert!(!inst.zero_hp_gauge().unwrap());
    clock.advance(Duration::from_secs(21));
    inst.tick(1);
    assert!(inst.telemetry().baseline >= Duration::from_secs(20));
    assert!(inst.zero_hp_gauge().unwrap());
    assert_eq!(rig.hp.zero_requests(), 1);

    // a moving foreline restarts the baseline
    rig.foreline.set_rate(0.01);
    inst.tick(2);
    assert!(!inst.zero_hp_gauge().unwrap());
    assert_eq!(rig.hp.zero_requests(), 1);
    inst.shut_down();
}

#[test]
fn unhealthy_telemetry_skips_watchdogs_but_still_signals_logging() {
    let (_clock, shared) = manual();
    let rig = Rig::new(&shared);
    let inst = rig.build(shared, InstrumentCfg::default(), ProcedureRegistry::new());
    let logged = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&logged);
    inst.on_log("status-log", move || {
        counter.fetch_add(1, Ordering::AcqRel);
    })
    .unwrap();

    rig.cryogen.turn_on().unwrap();
    rig.ambient.set(-4.0);
    rig.ig.set_faulted(true);
    let due = inst.tick(0);
    assert!(due.log);
    assert!(!inst.telemetry().healthy);
    assert!(rig.cryogen.is_on(), "watchdog ran on untrusted telemetry");
    assert!(eventually(Duration::from_secs(2), || logged.load(Ordering::Acquire) == 1));

    rig.ig.set_faulted(false);
    inst.tick(1);
    assert!(inst.telemetry().healthy);
    assert!(!rig.cryogen.is_on());
    inst.shut_down();
    assert_eq!(rig.notifier.sent().len(), 1);
    assert!(rig.notifier.sent()[0].0.contains("Cryogen containment failure"));
}

#[test]
fn medium_bucket_drives_the_supervisor() {
    let (_clock, shared) = manual();
    let rig = Rig::new(&shared);
    let mut procedures = ProcedureRegistry::new();
    procedures.register("noop", |_| Ok(()));
    let inst = rig.build(shared, InstrumentCfg::default(), procedures);

    inst.run_process("noop").unwrap();
    assert_eq!(
        inst.tick(1),
        Buckets {
            medium: false,
            slow: false,
            log: false
        }
    );
    assert_eq!(inst.process_state(), ProcessState::Ready);
    assert!(inst.tick(4).medium);
    assert_eq!(inst.process_state(), ProcessState::Running);
    inst.shut_down();
}

#[test]
fn shutdown_closes_flow_paths_and_disables_the_ion_gauge() {
    let (_clock, shared) = manual();
    let rig = Rig::new(&shared);
    rig.gauge_enable.turn_on().unwrap();
    let inst = rig.build(shared, InstrumentCfg::default(), ProcedureRegistry::new());

    let report = inst.shut_down();
    assert_eq!(report.flow_paths_closed, 1);
    assert!(report.unacknowledged.is_empty(), "{:?}", report.unacknowledged);
    assert!(report.worker_exited);
    assert!(rig.supply.is_closed());
    assert!(!rig.gauge_enable.is_on());
    assert_eq!(inst.run_process("noop"), Err(CoreError::Cancelled));

    // idempotent
    assert_eq!(inst.shut_down().flow_paths_closed, 1);
}

#[test]
fn scheduler_waits_for_bring_up() {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let rig = Rig::new(&clock);
    let inst = rig.build(clock, InstrumentCfg::default(), ProcedureRegistry::new());
    inst.spawn_scheduler().unwrap();
    assert!(inst.spawn_scheduler().is_err());

    std::thread::sleep(Duration::from_millis(200));
    assert!(!inst.telemetry().healthy);

    inst.bring_up_complete();
    assert!(eventually(Duration::from_secs(5), || inst.telemetry().healthy));
    let report = inst.shut_down();
    assert!(report.worker_exited);
}

#[test]
fn shutdown_flag_is_shared_with_waits() {
    let (_clock, shared) = manual();
    let rig = Rig::new(&shared);
    let inst = rig.build(shared, InstrumentCfg::default(), ProcedureRegistry::new());
    let flag: Flag = inst.shutdown_flag().clone();
    assert!(!flag.is_raised());
    inst.shut_down();
    assert!(flag.is_raised());
}
