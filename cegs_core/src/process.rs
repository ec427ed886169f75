//! Procedure execution: a name→procedure registry, the context handed to a running
//! procedure, and the supervisor that owns at most one worker thread.
//!
//! The supervisor is a three-state machine polled from the medium bucket:
//!
//! - `Ready` with a queued procedure: spawn the worker, go `Running`.
//! - `Running` once the worker has returned: collect the outcome, go `Finished`.
//! - `Finished`: clear the step stacks and the queue, go `Ready`.
//!
//! Workers are never preempted. Cancellation happens when a wait inside the procedure
//! sees the shutdown flag and returns `CoreError::Cancelled`.
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cegs_traits::{Clock, Meter, OperatorConsole, Valve};
use eyre::WrapErr;

use crate::alert::AlertDispatcher;
use crate::config::{GasCalibration, InstrumentCfg};
use crate::devices::Plant;
use crate::error::{CoreError, Result, is_cancelled};
use crate::event_log::EventLog;
use crate::regulator::{self, BleedReport, GasLineValves, PressurizeReport};
use crate::steps::{StepGuard, StepTracker};
use crate::telemetry::FusedMeter;
use crate::wait::Waiter;

pub type Procedure = Arc<dyn Fn(&ProcessContext) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ProcedureRegistry {
    procedures: BTreeMap<String, Procedure>,
}

impl ProcedureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, procedure: F) -> &mut Self
    where
        F: Fn(&ProcessContext) -> Result<()> + Send + Sync + 'static,
    {
        self.procedures.insert(name.into(), Arc::new(procedure));
        self
    }

    pub fn get(&self, name: &str) -> std::result::Result<Procedure, CoreError> {
        self.procedures
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownProcedure(name.to_owned()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

/// Everything a running procedure may touch.
#[derive(Clone)]
pub struct ProcessContext {
    name: String,
    waiter: Waiter,
    steps: Arc<StepTracker>,
    substeps: Arc<StepTracker>,
    alerts: Arc<AlertDispatcher>,
    console: Arc<dyn OperatorConsole>,
    plant: Arc<Plant>,
    cfg: Arc<InstrumentCfg>,
    vm: Arc<FusedMeter>,
}

impl ProcessContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        waiter: Waiter,
        steps: Arc<StepTracker>,
        substeps: Arc<StepTracker>,
        alerts: Arc<AlertDispatcher>,
        console: Arc<dyn OperatorConsole>,
        plant: Arc<Plant>,
        cfg: Arc<InstrumentCfg>,
        vm: Arc<FusedMeter>,
    ) -> Self {
        Self {
            name: String::new(),
            waiter,
            steps,
            substeps,
            alerts,
            console,
            plant,
            cfg,
            vm,
        }
    }

    fn for_run(&self, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..self.clone()
        }
    }

    /// Name of the procedure this context was handed to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        self.waiter.clock()
    }

    pub fn now(&self) -> Instant {
        self.waiter.now()
    }

    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn cfg(&self) -> &InstrumentCfg {
        &self.cfg
    }

    pub fn sleep(&self, d: Duration) -> Result<()> {
        Ok(self.waiter.sleep(d)?)
    }

    /// Poll `cond` until it holds or `budget` runs out; `Ok(false)` on budget.
    pub fn wait_until(&self, budget: Duration, cond: impl FnMut() -> bool) -> Result<bool> {
        Ok(self.waiter.wait_until(budget, cond)?)
    }

    /// Wait until the current step has run for `target()`. The target is re-read every
    /// slice and measured from the step's start, so raising it mid-wait extends the wait.
    pub fn wait_in_step(&self, target: impl FnMut() -> Duration) -> Result<()> {
        let started = self.steps.current().map_or_else(|| self.now(), |f| f.started);
        Ok(self.waiter.wait_for_elapsed(started, target)?)
    }

    pub fn step(&self, description: &str) -> StepGuard<'_> {
        StepGuard::new(&self.steps, description)
    }

    pub fn substep(&self, description: &str) -> StepGuard<'_> {
        StepGuard::new(&self.substeps, description)
    }

    pub fn steps(&self) -> &StepTracker {
        &self.steps
    }

    pub fn substeps(&self) -> &StepTracker {
        &self.substeps
    }

    pub fn alert(&self, subject: &str, body: &str) -> bool {
        self.alerts.alert(subject, body)
    }

    /// Get the operator's attention and ask; `true` means proceed.
    pub fn confirm(&self, question: &str) -> bool {
        self.console.play_sound();
        self.console.ask(question)
    }

    /// Latest fused manifold pressure.
    pub fn vm_pressure(&self) -> f64 {
        self.vm.value()
    }

    pub fn vm_meter(&self) -> Arc<FusedMeter> {
        Arc::clone(&self.vm)
    }

    pub fn gas(&self, name: &str) -> Result<&GasCalibration> {
        self.cfg
            .gas(name)
            .ok_or_else(|| CoreError::Config(format!("no calibration for gas {name}")).into())
    }

    pub fn pressurize(
        &self,
        line: &GasLineValves,
        target: f64,
        gas: &str,
    ) -> Result<PressurizeReport> {
        let _step = self.substep(&format!("Pressurize {gas} to {target}"));
        let gas = self.gas(gas)?;
        regulator::pressurize(&self.waiter, line, target, &self.cfg.pressurize, gas)
            .wrap_err_with(|| format!("pressurizing with {}", gas.gas))
    }

    pub fn bleed(&self, valve: &dyn Valve, meter: &dyn Meter, target: f64) -> Result<BleedReport> {
        let _step = self.substep(&format!("Bleed to {target}"));
        regulator::bleed(
            &self.waiter,
            valve,
            meter,
            self.plant.pump_mode.as_deref(),
            target,
            &self.cfg.bleed,
        )
        .wrap_err("bleeding to setpoint")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Ready,
    Running,
    Finished,
}

/// How a procedure's worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed(String),
    Panicked(String),
}

impl Outcome {
    pub const fn is_normal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

struct Inner {
    state: ProcessState,
    queued: Option<(String, Procedure)>,
    running: Option<String>,
    worker: Option<JoinHandle<Outcome>>,
    spawn_failure: Option<Outcome>,
    started_at: Option<Instant>,
    last: Option<(String, Outcome)>,
}

pub struct ProcessSupervisor {
    registry: ProcedureRegistry,
    context: ProcessContext,
    event_log: Arc<dyn EventLog>,
    inner: Mutex<Inner>,
    sample_run: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(
        registry: ProcedureRegistry,
        context: ProcessContext,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            registry,
            context,
            event_log,
            inner: Mutex::new(Inner {
                state: ProcessState::Ready,
                queued: None,
                running: None,
                worker: None,
                spawn_failure: None,
                started_at: None,
                last: None,
            }),
            sample_run: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::result::Result<MutexGuard<'_, Inner>, CoreError> {
        self.inner
            .lock()
            .map_err(|_| CoreError::State("process supervisor lock poisoned".into()))
    }

    pub fn registry(&self) -> &ProcedureRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    /// Queue `name` to start on the next poll. Unknown names and a busy supervisor are
    /// rejected here, synchronously.
    pub fn run_process(&self, name: &str) -> std::result::Result<(), CoreError> {
        let mut inner = self.lock()?;
        if let Some(current) = inner
            .running
            .as_ref()
            .or(inner.queued.as_ref().map(|(n, _)| n))
        {
            return Err(CoreError::ProcessBusy(current.clone()));
        }
        if inner.state != ProcessState::Ready {
            return Err(CoreError::ProcessBusy(name.to_owned()));
        }
        let procedure = self.registry.get(name)?;
        tracing::info!(procedure = name, "process queued");
        inner.queued = Some((name.to_owned(), procedure));
        Ok(())
    }

    /// Mark whether the next run handles a sample; a sample run that ends abnormally
    /// is recorded in the event log. Cleared when the supervisor returns to Ready.
    pub fn set_sample_run(&self, on: bool) {
        self.sample_run.store(on, Ordering::Release);
    }

    pub fn is_sample_run(&self) -> bool {
        self.sample_run.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ProcessState {
        self.lock().map_or(ProcessState::Ready, |i| i.state)
    }

    pub fn running(&self) -> Option<String> {
        self.lock().ok().and_then(|i| i.running.clone())
    }

    /// Time since the current procedure started.
    pub fn elapsed(&self) -> Option<Duration> {
        let started = self.lock().ok()?.started_at?;
        Some(self.context.now().saturating_duration_since(started))
    }

    /// The most recent procedure to finish and how it ended.
    pub fn last_outcome(&self) -> Option<(String, Outcome)> {
        self.lock().ok().and_then(|i| i.last.clone())
    }

    /// Advance the state machine by at most one transition.
    pub fn poll(&self) {
        let Ok(mut inner) = self.lock() else {
            tracing::error!("process supervisor lock poisoned");
            return;
        };
        match inner.state {
            ProcessState::Ready => {
                if let Some((name, procedure)) = inner.queued.take() {
                    self.start(&mut inner, name, procedure);
                }
            }
            ProcessState::Running => {
                let finished = inner.spawn_failure.is_some()
                    || inner.worker.as_ref().is_none_or(JoinHandle::is_finished);
                if finished {
                    let outcome = match (inner.spawn_failure.take(), inner.worker.take()) {
                        (Some(o), _) => o,
                        (None, Some(h)) => h
                            .join()
                            .unwrap_or_else(|_| Outcome::Panicked("worker panicked".into())),
                        (None, None) => Outcome::Failed("worker missing".into()),
                    };
                    let name = inner.running.clone().unwrap_or_default();
                    self.finish(&name, &outcome);
                    inner.last = Some((name, outcome));
                    inner.state = ProcessState::Finished;
                }
            }
            ProcessState::Finished => {
                self.context.steps.clear();
                self.context.substeps.clear();
                inner.started_at = None;
                inner.queued = None;
                inner.running = None;
                self.sample_run.store(false, Ordering::Release);
                inner.state = ProcessState::Ready;
                tracing::debug!("process supervisor ready");
            }
        }
    }

    fn start(&self, inner: &mut Inner, name: String, procedure: Procedure) {
        let ctx = self.context.for_run(&name);
        let spawned = std::thread::Builder::new()
            .name(format!("cegs-proc-{name}"))
            .spawn(move || run_worker(&ctx, &procedure));
        match spawned {
            Ok(handle) => {
                tracing::info!(procedure = %name, "process started");
                inner.worker = Some(handle);
            }
            Err(e) => {
                tracing::error!(procedure = %name, error = %e, "could not start process worker");
                inner.spawn_failure = Some(Outcome::Failed(format!("could not start worker: {e}")));
            }
        }
        inner.started_at = Some(self.context.now());
        inner.running = Some(name);
        inner.state = ProcessState::Running;
    }

    fn finish(&self, name: &str, outcome: &Outcome) {
        match outcome {
            Outcome::Completed => tracing::info!(procedure = name, "process completed"),
            Outcome::Cancelled => tracing::warn!(procedure = name, "process cancelled"),
            Outcome::Failed(reason) | Outcome::Panicked(reason) => {
                tracing::error!(procedure = name, reason = %reason, "process faulted");
                self.context.alert(
                    "Process fault",
                    &format!("Procedure {name} stopped: {reason}"),
                );
            }
        }
        if self.is_sample_run() && !outcome.is_normal() {
            let reason = match outcome {
                Outcome::Failed(r) | Outcome::Panicked(r) => r.as_str(),
                Outcome::Cancelled => "cancelled",
                Outcome::Completed => "",
            };
            self.event_log.record(&format!("Aborted run: {name}: {reason}"));
        }
    }

    /// Wait boundedly for a running worker to return, after shutdown has been raised.
    pub fn join_for(&self, budget: Duration) -> bool {
        let waiter = Waiter::new(
            Arc::clone(self.context.clock()),
            crate::wait::Flag::new(),
            crate::util::MAX_WAIT_SLICE,
        );
        waiter
            .wait_until(budget, || {
                self.lock()
                    .map(|i| i.worker.as_ref().is_none_or(JoinHandle::is_finished))
                    .unwrap_or(true)
            })
            .unwrap_or(false)
    }
}

fn run_worker(ctx: &ProcessContext, procedure: &Procedure) -> Outcome {
    match catch_unwind(AssertUnwindSafe(|| procedure(ctx))) {
        Ok(Ok(())) => Outcome::Completed,
        Ok(Err(report)) if is_cancelled(&report) => Outcome::Cancelled,
        Ok(Err(report)) => Outcome::Failed(format!("{report:#}")),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic".into());
            Outcome::Panicked(msg)
        }
    }
}
