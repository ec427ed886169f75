//! The instrument: one context object owning every long-lived piece of the controller.
//!
//! [`Instrument::builder`] assembles the plant, alerting, step trackers and process
//! supervisor; nothing lives in globals. The scheduler thread, the housekeepers and the
//! alert worker are all owned here and stopped by [`Instrument::shut_down`].
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cegs_config::{Config, DeviceNames};
use cegs_traits::{Clock, Meter, MeterReading, MonotonicClock, Notifier, OperatorConsole};
use eyre::WrapErr;

use crate::alert::AlertDispatcher;
use crate::config::InstrumentCfg;
use crate::devices::{DeviceRegistry, Plant};
use crate::error::{BuildError, CoreError, Result};
use crate::event_log::{EventLog, TracingEventLog};
use crate::fusion::{FusionInputs, PressureFusion, Source};
use crate::hw_error::{device_report, map_device_error};
use crate::process::{ProcedureRegistry, ProcessContext, ProcessState, ProcessSupervisor};
use crate::scheduler::{Bucketed, Buckets, Housekeeper, Scheduler, Trigger, run_tick};
use crate::steps::StepTracker;
use crate::telemetry::{AtomicF64, FusedMeter, RateEstimator};
use crate::wait::{Flag, Waiter};
use crate::watchdog::{Snapshot, WatchdogMonitor};

/// Point-in-time view for status lines and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub pressure: f64,
    pub source: Option<Source>,
    pub ion_gauge_on: bool,
    pub foreline: f64,
    pub foreline_rate: f64,
    pub healthy: bool,
    pub baseline: Duration,
    pub process: ProcessState,
    pub running: Option<String>,
    pub step: Vec<String>,
}

/// What `shut_down` managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub flow_paths_closed: usize,
    /// Devices that did not acknowledge within the bounded wait.
    pub unacknowledged: Vec<String>,
    pub worker_exited: bool,
}

const SOURCE_NONE: u8 = 0;

fn source_code(s: Source) -> u8 {
    match s {
        Source::HighPressure => 1,
        Source::IonGauge => 2,
        Source::Blend => 3,
    }
}

fn source_from(code: u8) -> Option<Source> {
    match code {
        1 => Some(Source::HighPressure),
        2 => Some(Source::IonGauge),
        3 => Some(Source::Blend),
        _ => None,
    }
}

/// State the scheduler thread and the public handle share.
struct Shared {
    cfg: Arc<InstrumentCfg>,
    clock: Arc<dyn Clock>,
    plant: Arc<Plant>,
    fusion: Mutex<PressureFusion>,
    vm_rate: Mutex<RateEstimator>,
    vm: Arc<FusedMeter>,
    source: AtomicU8,
    foreline: AtomicF64,
    foreline_rate: AtomicF64,
    healthy: AtomicBool,
    watchdog: Mutex<WatchdogMonitor>,
    alerts: Arc<AlertDispatcher>,
    supervisor: ProcessSupervisor,
}

impl Shared {
    fn read_all(&self) -> std::result::Result<[MeterReading; 3], CoreError> {
        let read = |m: &dyn Meter| m.reading().map_err(|e| map_device_error(&*e));
        Ok([
            read(self.plant.ion_gauge.as_ref())?,
            read(self.plant.hp_gauge.as_ref())?,
            read(self.plant.foreline_gauge.as_ref())?,
        ])
    }
}

impl Bucketed for Shared {
    fn refresh(&self) -> bool {
        let [ig, hp, foreline] = match self.read_all() {
            Ok(r) => r,
            Err(e) => {
                if self.healthy.swap(false, Ordering::AcqRel) {
                    tracing::warn!(error = %e, "telemetry refresh failed");
                }
                return false;
            }
        };
        let now = self.clock.now();
        let inputs = FusionInputs {
            p_ig: ig.value,
            p_hp: hp.value.max(hp.sensitivity),
            foreline: foreline.value,
            foreline_rate: foreline.rate.value,
            isolation_open: self.plant.gauge_isolation.is_open() && self.plant.vm_isolation.is_open(),
            gauge_on: self.plant.gauge_enable.is_on(),
        };
        let Ok(mut fusion) = self.fusion.lock() else {
            tracing::error!("fusion state poisoned");
            return false;
        };
        let out = fusion.update(now, &inputs);
        drop(fusion);

        if let Some(on) = out.gauge_command {
            tracing::info!(on, pressure = out.pressure, "switching ion gauge");
            let switched = if on {
                self.plant.gauge_enable.turn_on()
            } else {
                self.plant.gauge_enable.turn_off()
            };
            if let Err(e) = switched {
                tracing::warn!(error = %map_device_error(&*e), "ion gauge switch failed");
            }
        }

        let sensitivity = match out.source {
            Source::HighPressure => hp.sensitivity,
            Source::IonGauge | Source::Blend => ig.sensitivity,
        };
        let rate = self
            .vm_rate
            .lock()
            .map(|mut r| r.update(now, out.pressure))
            .unwrap_or_default();
        self.vm.publish(out.pressure, sensitivity, rate);
        self.source.store(source_code(out.source), Ordering::Release);
        self.foreline.store(foreline.value);
        self.foreline_rate.store(foreline.rate.value);
        if !self.healthy.swap(true, Ordering::AcqRel) {
            tracing::info!("telemetry healthy");
        }
        true
    }

    fn fast(&self) {
        let ambient = self.plant.ambient.temperature().unwrap_or_else(|e| {
            tracing::warn!(error = %map_device_error(&*e), "ambient temperature unavailable");
            f64::NAN
        });
        let snapshot = Snapshot {
            vm_pressure: self.vm.value(),
            foreline: self.foreline.load(),
            foreline_rate: self.foreline_rate.load(),
            roughing_open: !self.plant.vacuum.roughing.is_closed(),
            ambient,
            cryogen_on: self.plant.cryogen_supply.is_on(),
        };
        if let Ok(mut wd) = self.watchdog.lock() {
            wd.check(
                self.clock.now(),
                &snapshot,
                &self.plant.vacuum,
                self.plant.cryogen_supply.as_ref(),
                &self.alerts,
            );
        }
    }

    fn medium(&self) {
        self.supervisor.poll();
    }
}

pub struct Instrument {
    shared: Arc<Shared>,
    shutdown: Flag,
    bring_up: Flag,
    slow: Trigger,
    log: Trigger,
    steps: Arc<StepTracker>,
    scheduler: Mutex<Option<Scheduler>>,
    housekeepers: Mutex<Vec<Housekeeper>>,
}

impl Instrument {
    pub fn builder() -> InstrumentBuilder {
        InstrumentBuilder::default()
    }

    pub fn cfg(&self) -> &InstrumentCfg {
        &self.shared.cfg
    }

    pub fn plant(&self) -> &Plant {
        &self.shared.plant
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.shared.alerts
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.shared.supervisor
    }

    pub fn steps(&self) -> &StepTracker {
        &self.steps
    }

    pub fn shutdown_flag(&self) -> &Flag {
        &self.shutdown
    }

    /// Fused manifold pressure as a meter.
    pub fn vm_meter(&self) -> Arc<FusedMeter> {
        Arc::clone(&self.shared.vm)
    }

    pub fn alert(&self, subject: &str, body: &str) -> bool {
        self.shared.alerts.alert(subject, body)
    }

    pub fn run_process(&self, name: &str) -> std::result::Result<(), CoreError> {
        if self.shutdown.is_raised() {
            return Err(CoreError::Cancelled);
        }
        self.shared.supervisor.run_process(name)
    }

    pub fn set_sample_run(&self, on: bool) {
        self.shared.supervisor.set_sample_run(on);
    }

    pub fn process_state(&self) -> ProcessState {
        self.shared.supervisor.state()
    }

    pub fn procedure_names(&self) -> Vec<String> {
        self.shared
            .supervisor
            .registry()
            .names()
            .map(str::to_owned)
            .collect()
    }

    /// Run tick `n` synchronously on the calling thread.
    pub fn tick(&self, n: u64) -> Buckets {
        run_tick(
            n,
            &self.shared.cfg.scheduler,
            self.shared.as_ref(),
            &self.slow,
            &self.log,
        )
    }

    /// Signal that device bring-up is done; the scheduler starts ticking.
    pub fn bring_up_complete(&self) {
        tracing::info!("bring-up complete");
        self.bring_up.raise();
    }

    pub fn spawn_scheduler(&self) -> Result<()> {
        let mut slot = self
            .scheduler
            .lock()
            .map_err(|_| CoreError::State("scheduler slot poisoned".into()))?;
        if slot.is_some() {
            return Err(CoreError::State("scheduler already running".into()).into());
        }
        let target: Arc<dyn Bucketed> = self.shared.clone();
        let scheduler = Scheduler::spawn(
            self.shared.cfg.scheduler.clone(),
            Arc::clone(&self.shared.clock),
            self.shutdown.clone(),
            self.bring_up.clone(),
            target,
            self.slow.clone(),
            self.log.clone(),
        )
        .wrap_err("starting scheduler")?;
        *slot = Some(scheduler);
        Ok(())
    }

    fn add_housekeeper(
        &self,
        name: &str,
        trigger: &Trigger,
        job: impl FnMut() + Send + 'static,
    ) -> Result<()> {
        let hk = Housekeeper::spawn(name, trigger.clone(), self.shared.cfg.scheduler.tick, job)
            .wrap_err_with(|| format!("starting housekeeper {name}"))?;
        self.housekeepers
            .lock()
            .map_err(|_| CoreError::State("housekeeper list poisoned".into()))?
            .push(hk);
        Ok(())
    }

    /// Run `job` on its own thread whenever the slow bucket fires.
    pub fn on_slow(&self, name: &str, job: impl FnMut() + Send + 'static) -> Result<()> {
        self.add_housekeeper(name, &self.slow, job)
    }

    /// Run `job` on its own thread whenever the logging signal fires.
    pub fn on_log(&self, name: &str, job: impl FnMut() + Send + 'static) -> Result<()> {
        self.add_housekeeper(name, &self.log, job)
    }

    pub fn telemetry(&self) -> Telemetry {
        let s = &self.shared;
        let now = s.clock.now();
        let (ion_gauge_on, baseline) = s
            .fusion
            .lock()
            .map(|f| (f.gauge_on(), f.baseline_elapsed(now)))
            .unwrap_or((false, Duration::ZERO));
        Telemetry {
            pressure: s.vm.value(),
            source: source_from(s.source.load(Ordering::Acquire)),
            ion_gauge_on,
            foreline: s.foreline.load(),
            foreline_rate: s.foreline_rate.load(),
            healthy: s.healthy.load(Ordering::Acquire),
            baseline,
            process: s.supervisor.state(),
            running: s.supervisor.running(),
            step: self.steps.path(),
        }
    }

    /// Zero the high-pressure gauge if the baseline has held long enough to trust it.
    /// Returns whether a zero was started.
    pub fn zero_hp_gauge(&self) -> Result<bool> {
        let now = self.shared.clock.now();
        let trusted = self
            .shared
            .fusion
            .lock()
            .map(|f| f.zero_trusted(now))
            .map_err(|_| CoreError::State("fusion state poisoned".into()))?;
        if !trusted {
            tracing::debug!("baseline not steady long enough; HP gauge zero skipped");
            return Ok(false);
        }
        self.shared
            .plant
            .hp_gauge
            .zero()
            .map_err(|e| device_report(&*e))
            .wrap_err("zeroing HP gauge")?;
        tracing::info!("HP gauge zero started");
        Ok(true)
    }

    /// Stop everything: raise the shutdown flag, stop the scheduler, close flow paths,
    /// disable the ion gauge, and give each device and the process worker a bounded
    /// time to acknowledge. Safe to call more than once.
    pub fn shut_down(&self) -> ShutdownReport {
        tracing::info!("shutting down");
        self.shutdown.raise();
        if let Ok(mut slot) = self.scheduler.lock()
            && let Some(mut scheduler) = slot.take()
        {
            scheduler.stop();
        }

        let cfg = &self.shared.cfg;
        let plant = &self.shared.plant;
        // The shutdown flag is already raised, so acknowledgement waits use their own.
        let waiter = Waiter::new(Arc::clone(&self.shared.clock), Flag::new(), cfg.wait_slice);
        let mut report = ShutdownReport::default();

        for (name, valve) in &plant.flow_paths {
            match valve.close() {
                Ok(()) => report.flow_paths_closed += 1,
                Err(e) => {
                    tracing::error!(valve = %name, error = %map_device_error(&*e), "flow path close failed");
                }
            }
            if !waiter
                .wait_until(cfg.shutdown_ack, || !valve.is_busy())
                .unwrap_or(false)
            {
                tracing::warn!(valve = %name, "no close acknowledgement");
                report.unacknowledged.push(name.clone());
            }
        }

        if let Err(e) = plant.gauge_enable.turn_off() {
            tracing::warn!(error = %map_device_error(&*e), "ion gauge disable failed");
        }
        if !waiter
            .wait_until(cfg.shutdown_ack, || !plant.gauge_enable.is_on())
            .unwrap_or(false)
        {
            report.unacknowledged.push("ion gauge".into());
        }

        report.worker_exited = self.shared.supervisor.join_for(cfg.shutdown_ack);
        if !report.worker_exited {
            tracing::warn!(
                procedure = ?self.shared.supervisor.running(),
                "process worker still running after shutdown"
            );
        }

        if let Ok(mut hks) = self.housekeepers.lock() {
            hks.iter_mut().for_each(Housekeeper::stop);
            hks.clear();
        }
        self.shared.alerts.shutdown();
        tracing::info!(?report, "shutdown complete");
        report
    }
}

#[derive(Default)]
pub struct InstrumentBuilder {
    cfg: Option<InstrumentCfg>,
    names: Option<DeviceNames>,
    devices: Option<DeviceRegistry>,
    procedures: ProcedureRegistry,
    notifier: Option<Arc<dyn Notifier>>,
    console: Option<Arc<dyn OperatorConsole>>,
    event_log: Option<Arc<dyn EventLog>>,
    clock: Option<Arc<dyn Clock>>,
}

impl InstrumentBuilder {
    /// Runtime settings and device names from a loaded config file.
    pub fn apply_config(self, config: &Config) -> Self {
        self.with_cfg(InstrumentCfg::from(config))
            .with_device_names(config.devices.clone())
    }

    pub fn with_cfg(mut self, cfg: InstrumentCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    pub fn with_device_names(mut self, names: DeviceNames) -> Self {
        self.names = Some(names);
        self
    }

    pub fn with_devices(mut self, devices: DeviceRegistry) -> Self {
        self.devices = Some(devices);
        self
    }

    pub fn with_procedures(mut self, procedures: ProcedureRegistry) -> Self {
        self.procedures = procedures;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_console(mut self, console: Arc<dyn OperatorConsole>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn with_event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn try_build(self) -> std::result::Result<Instrument, BuildError> {
        let cfg = self.cfg.unwrap_or_default();
        if cfg.scheduler.tick.is_zero() {
            return Err(BuildError::InvalidConfig("scheduler tick must be > 0".into()));
        }
        if cfg.shutdown_ack.is_zero() {
            return Err(BuildError::InvalidConfig("shutdown ack wait must be > 0".into()));
        }
        let devices = self.devices.ok_or(BuildError::MissingDevices)?;
        let notifier = self.notifier.ok_or(BuildError::MissingNotifier)?;
        let console = self.console.ok_or(BuildError::MissingConsole)?;
        let event_log = self
            .event_log
            .unwrap_or_else(|| Arc::new(TracingEventLog));
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let names = self.names.unwrap_or_default();

        let plant = Arc::new(Plant::resolve(devices, &names)?);
        let cfg = Arc::new(cfg);
        let shutdown = Flag::new();
        let waiter = Waiter::new(Arc::clone(&clock), shutdown.clone(), cfg.wait_slice);
        let alerts = Arc::new(AlertDispatcher::spawn(
            &cfg.alerts,
            Arc::clone(&clock),
            notifier,
            Arc::clone(&console),
            Arc::clone(&event_log),
        ));
        let steps = Arc::new(StepTracker::new("step", Arc::clone(&clock)));
        let substeps = Arc::new(StepTracker::new("substep", Arc::clone(&clock)));
        let vm = Arc::new(FusedMeter::new());
        let context = ProcessContext::new(
            waiter,
            Arc::clone(&steps),
            substeps,
            Arc::clone(&alerts),
            console,
            Arc::clone(&plant),
            Arc::clone(&cfg),
            Arc::clone(&vm),
        );
        let supervisor = ProcessSupervisor::new(self.procedures, context, event_log);
        let fusion = PressureFusion::new(
            cfg.fusion.clone(),
            clock.now(),
            plant.gauge_enable.is_on(),
        );

        tracing::info!(
            devices = plant.registry().len(),
            procedures = supervisor.registry().len(),
            gases = cfg.gases.len(),
            "instrument assembled"
        );
        let shared = Arc::new(Shared {
            watchdog: Mutex::new(WatchdogMonitor::new(cfg.watchdog.clone())),
            cfg,
            clock,
            plant,
            fusion: Mutex::new(fusion),
            vm_rate: Mutex::new(RateEstimator::default()),
            vm,
            source: AtomicU8::new(SOURCE_NONE),
            foreline: AtomicF64::new(0.0),
            foreline_rate: AtomicF64::new(0.0),
            healthy: AtomicBool::new(false),
            alerts,
            supervisor,
        });
        Ok(Instrument {
            shared,
            shutdown,
            bring_up: Flag::new(),
            slow: Trigger::new(),
            log: Trigger::new(),
            steps,
            scheduler: Mutex::new(None),
            housekeepers: Mutex::new(Vec::new()),
        })
    }
}
