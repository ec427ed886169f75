//! The simulated instrument: a plant built from `cegs_hardware` models, a handful of
//! demonstration procedures, and the run loop behind `cegs simulate`.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use cegs_config::Config;
use cegs_core::event_log::{EventLog, FileEventLog, TracingEventLog};
use cegs_core::hw_error::device_report;
use cegs_core::regulator::GasLineValves;
use cegs_core::{
    CoreError, Device, DeviceRegistry, Flag, Instrument, Outcome, ProcedureRegistry,
    ProcessContext, ProcessState,
};
use cegs_hardware::{
    BleedLine, BleedLineParams, GasLine, GasLineParams, SimHeater, SimMeter, SimPumpMode,
    SimSwitch, SimThermometer, SimValve,
};
use cegs_traits::{
    Clock, DeviceError, Heater, Meter, Notifier, OperatorConsole, ScaledClock, Thermometer,
};
use eyre::{Result, WrapErr};

pub const GAS_SHUTOFF: &str = "v_GasSupply";
pub const GAS_FLOW: &str = "v_GasFlow";
pub const GAS_METER: &str = "pGM";
pub const BLEED_VALVE: &str = "v_Bleed";
pub const BLEED_METER: &str = "pBleed";
pub const REACTOR: &str = "h_Reactor";

const BAKE_C: f64 = 200.0;
const BAKE_BAND_C: f64 = 5.0;
const BAKE_RAMP_BUDGET: Duration = Duration::from_secs(15 * 60);
const BAKE_HOLD: Duration = Duration::from_secs(2 * 60);
const REACTOR_LIMIT_C: f64 = 250.0;
const DEFAULT_PRESSURIZE_TORR: f64 = 500.0;
const DEFAULT_BLEED_TORR: f64 = 1.0;
const WALL_POLL: Duration = Duration::from_millis(10);

/// Parameters of one `simulate` invocation.
#[derive(Debug, Clone)]
pub struct SimArgs {
    pub procedure: String,
    pub gas: String,
    pub target: Option<f64>,
    pub sample: bool,
    pub speed: f64,
}

/// How a simulated run ended.
#[derive(Debug, Clone)]
pub struct SimSummary {
    pub procedure: String,
    pub outcome: Outcome,
    /// Simulated time from start request to outcome.
    pub elapsed: Duration,
    /// The quantity the procedure drives: Torr for regulators, °C for the bake.
    pub final_value: Option<f64>,
    pub vm_pressure: f64,
    pub unacknowledged: Vec<String>,
}

/// A procedure that did not complete.
#[derive(Debug)]
pub struct ProcedureFailed {
    pub procedure: String,
    pub outcome: Outcome,
}

impl fmt::Display for ProcedureFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Failed(reason) => write!(f, "procedure {} failed: {reason}", self.procedure),
            Outcome::Panicked(reason) => {
                write!(f, "procedure {} panicked: {reason}", self.procedure)
            }
            Outcome::Cancelled => write!(f, "procedure {} was cancelled", self.procedure),
            Outcome::Completed => write!(f, "procedure {} completed", self.procedure),
        }
    }
}

impl std::error::Error for ProcedureFailed {}

pub fn outcome_name(o: &Outcome) -> &'static str {
    match o {
        Outcome::Completed => "Completed",
        Outcome::Cancelled => "Cancelled",
        Outcome::Failed(_) => "Failed",
        Outcome::Panicked(_) => "Panicked",
    }
}

/// Alerts go to the log; there is nobody to mail in a simulation.
struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, subject: &str, body: &str) -> std::result::Result<(), DeviceError> {
        tracing::warn!(subject, body, "alert");
        Ok(())
    }
}

/// No operator attached: every question is answered "proceed".
struct UnattendedConsole;

impl OperatorConsole for UnattendedConsole {
    fn play_sound(&self) {
        tracing::debug!("operator attention requested");
    }

    fn ask(&self, question: &str) -> bool {
        tracing::info!(question, "no operator attached; proceeding");
        true
    }
}

/// Every simulated device, kept so the run can report on them afterwards.
pub struct SimPlant {
    registry: DeviceRegistry,
    gas_line: Arc<GasLine>,
    bleed_meter: Arc<dyn Meter>,
    reactor: Arc<SimHeater>,
}

impl SimPlant {
    /// A quiet, pumped-down manifold with a gas supply, a bleed line and a reactor
    /// furnace, registered under the names `cfg` asks for.
    pub fn new(cfg: &Config, clock: &Arc<dyn Clock>) -> Self {
        let n = &cfg.devices;
        let valve = |name: &str| Arc::new(SimValve::new(name, Arc::clone(clock)));
        let open_valve = |name: &str| Arc::new(SimValve::new(name, Arc::clone(clock)).opened());
        let gas_line = GasLine::new(Arc::clone(clock), GasLineParams::default());
        let bleed_line = BleedLine::new(Arc::clone(clock), BleedLineParams::default());
        let reactor = Arc::new(SimHeater::new(
            Arc::clone(clock),
            21.0,
            Duration::from_secs(30),
        ));

        let mut r = DeviceRegistry::new();
        r.insert(
            n.ion_gauge.as_str(),
            Device::Meter(Arc::new(
                SimMeter::new(n.ion_gauge.as_str(), 5e-5).with_sensitivity(1e-9),
            )),
        )
        .insert(
            n.hp_gauge.as_str(),
            Device::Meter(Arc::new(
                SimMeter::new(n.hp_gauge.as_str(), 2e-3).with_sensitivity(1e-3),
            )),
        )
        .insert(
            n.foreline_gauge.as_str(),
            Device::Meter(Arc::new(SimMeter::new(n.foreline_gauge.as_str(), 0.05))),
        )
        .insert(
            n.gauge_enable.as_str(),
            Device::Switch(Arc::new(SimSwitch::new(n.gauge_enable.as_str(), false))),
        )
        .insert(n.gauge_isolation.as_str(), Device::Valve(open_valve(&n.gauge_isolation)))
        .insert(n.vm_isolation.as_str(), Device::Valve(open_valve(&n.vm_isolation)))
        .insert(n.high_vacuum_valve.as_str(), Device::Valve(open_valve(&n.high_vacuum_valve)))
        .insert(n.roughing_valve.as_str(), Device::Valve(valve(&n.roughing_valve)))
        .insert(n.backing_valve.as_str(), Device::Valve(open_valve(&n.backing_valve)))
        .insert(
            n.ambient_thermometer.as_str(),
            Device::Thermometer(Arc::new(SimThermometer::new(21.0))),
        )
        .insert(
            n.cryogen_supply.as_str(),
            Device::Switch(Arc::new(SimSwitch::new(n.cryogen_supply.as_str(), false))),
        )
        .insert(GAS_SHUTOFF, Device::Valve(gas_line.shutoff_valve()))
        .insert(GAS_FLOW, Device::Valve(gas_line.flow_valve()))
        .insert(GAS_METER, Device::Meter(gas_line.pressure_meter()))
        .insert(BLEED_VALVE, Device::Valve(bleed_line.valve()))
        .insert(BLEED_METER, Device::Meter(bleed_line.meter()))
        .insert(REACTOR, Device::Heater(reactor.clone()))
        .insert("pump_mode", Device::PumpMode(Arc::new(SimPumpMode::default())));
        for name in &n.flow_paths {
            if r.valve(name).is_err() {
                r.insert(name.as_str(), Device::Valve(open_valve(name)));
            }
        }

        Self {
            registry: r,
            bleed_meter: bleed_line.meter(),
            gas_line,
            reactor,
        }
    }

    pub fn registry(&self) -> DeviceRegistry {
        self.registry.clone()
    }

    fn final_value(&self, procedure: &str) -> Option<f64> {
        match procedure {
            "pressurize" => Some(self.gas_line.pressure()),
            "bleed" => self.bleed_meter.reading().ok().map(|r| r.value),
            "bake" => self.reactor.temperature().ok(),
            _ => None,
        }
    }
}

fn pressurize(ctx: &ProcessContext, gas: &str, target: f64) -> Result<()> {
    let _step = ctx.step(&format!("Admit {gas}"));
    let plant = ctx.plant();
    let line = GasLineValves {
        shutoff: plant.valve(GAS_SHUTOFF)?,
        flow: plant.valve(GAS_FLOW)?,
        meter: plant.meter(GAS_METER)?,
    };
    let report = ctx.pressurize(&line, target, gas)?;
    tracing::info!(
        gas,
        target,
        final_value = report.final_value,
        adjustments = report.adjustments,
        "gas admitted"
    );
    Ok(())
}

fn bleed(ctx: &ProcessContext, target: f64) -> Result<()> {
    let _step = ctx.step("Bleed");
    let valve = ctx.plant().valve(BLEED_VALVE)?;
    let meter = ctx.plant().meter(BLEED_METER)?;
    let report = ctx.bleed(valve.as_ref(), meter.as_ref(), target)?;
    tracing::info!(
        target,
        final_value = report.final_value,
        actions = report.actions,
        "bleed finished"
    );
    Ok(())
}

fn bake(ctx: &ProcessContext) -> Result<()> {
    let heater = ctx.plant().heater(REACTOR)?;
    if !ctx.confirm(&format!("Bake the reactor at {BAKE_C} °C?")) {
        tracing::info!("bake declined by operator");
        return Ok(());
    }
    {
        let _step = ctx.step("Heat reactor");
        heater
            .set_setpoint(BAKE_C)
            .and_then(|()| heater.turn_on())
            .map_err(|e| device_report(&*e))
            .wrap_err("starting reactor furnace")?;
        let reached = ctx.wait_until(BAKE_RAMP_BUDGET, || {
            heater
                .temperature()
                .is_ok_and(|t| t >= BAKE_C - BAKE_BAND_C)
        })?;
        if !reached {
            let _ = heater.turn_off();
            ctx.alert(
                "Reactor heating slow",
                "The reactor furnace did not reach bake temperature in time.",
            );
            eyre::bail!("reactor did not reach {BAKE_C} °C");
        }
    }
    {
        let _step = ctx.step("Bake");
        ctx.wait_in_step(|| BAKE_HOLD)?;
    }
    heater
        .turn_off()
        .map_err(|e| device_report(&*e))
        .wrap_err("stopping reactor furnace")?;
    Ok(())
}

/// The demonstration procedures, parameterized by the command line.
pub fn procedures(gas: &str, target: Option<f64>) -> ProcedureRegistry {
    let gas = gas.to_owned();
    let mut r = ProcedureRegistry::new();
    r.register("pressurize", move |ctx| {
        pressurize(ctx, &gas, target.unwrap_or(DEFAULT_PRESSURIZE_TORR))
    })
    .register("bleed", move |ctx| {
        bleed(ctx, target.unwrap_or(DEFAULT_BLEED_TORR))
    })
    .register("bake", bake);
    r
}

fn event_log(cfg: &Config) -> Arc<dyn EventLog> {
    match cfg.alerts.event_log.as_deref() {
        Some(path) => Arc::new(FileEventLog::new(path)),
        None => Arc::new(TracingEventLog),
    }
}

fn log_telemetry(inst: &Weak<Instrument>) {
    let Some(inst) = inst.upgrade() else { return };
    let t = inst.telemetry();
    tracing::info!(
        pressure = t.pressure,
        source = ?t.source,
        foreline = t.foreline,
        healthy = t.healthy,
        process = ?t.process,
        running = t.running.as_deref().unwrap_or("-"),
        step = %t.step.join(" / "),
        "telemetry"
    );
}

/// Zero the HP gauge once per steady baseline.
fn auto_zero(inst: &Weak<Instrument>, zeroed: &mut bool) {
    let Some(inst) = inst.upgrade() else { return };
    if inst.telemetry().baseline.is_zero() {
        *zeroed = false;
        return;
    }
    if *zeroed {
        return;
    }
    match inst.zero_hp_gauge() {
        Ok(z) => *zeroed = z,
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "HP gauge auto-zero failed"),
    }
}

fn guard_reactor(inst: &Weak<Instrument>, heater: &dyn Heater) {
    let Some(inst) = inst.upgrade() else { return };
    match heater.temperature() {
        Ok(t) if t > REACTOR_LIMIT_C => {
            if let Err(e) = heater.turn_off() {
                tracing::error!(error = %device_report(&*e), "reactor furnace would not turn off");
            }
            inst.alert(
                "Reactor overheating",
                &format!("Reactor furnace reached {t:.0} °C and was turned off."),
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %device_report(&*e), "reactor thermocouple unreadable"),
    }
}

/// Assemble the simulated instrument and run one procedure to its end, or until
/// `interrupt` is raised.
pub fn run(cfg: &Config, args: &SimArgs, interrupt: &Flag) -> Result<SimSummary> {
    let clock: Arc<dyn Clock> = Arc::new(ScaledClock::new(args.speed));
    let plant = SimPlant::new(cfg, &clock);
    let inst = Instrument::builder()
        .apply_config(cfg)
        .with_devices(plant.registry())
        .with_procedures(procedures(&args.gas, args.target))
        .with_notifier(Arc::new(LogNotifier))
        .with_console(Arc::new(UnattendedConsole))
        .with_event_log(event_log(cfg))
        .with_clock(Arc::clone(&clock))
        .try_build()
        .wrap_err("assembling simulated instrument")?;
    let inst = Arc::new(inst);

    let weak = Arc::downgrade(&inst);
    inst.on_log("telemetry-log", move || log_telemetry(&weak))?;
    let weak = Arc::downgrade(&inst);
    let mut zeroed = false;
    inst.on_slow("auto-zero", move || auto_zero(&weak, &mut zeroed))?;
    let weak = Arc::downgrade(&inst);
    let reactor = Arc::clone(&plant.reactor);
    inst.on_slow("reactor-guard", move || guard_reactor(&weak, reactor.as_ref()))?;
    inst.spawn_scheduler()?;
    inst.bring_up_complete();
    inst.set_sample_run(args.sample);

    let started = clock.now();
    inst.run_process(&args.procedure)?;
    tracing::info!(procedure = %args.procedure, speed = args.speed, "simulation started");

    while inst.supervisor().last_outcome().is_none() {
        if interrupt.is_raised() {
            tracing::warn!("interrupted; shutting down");
            break;
        }
        std::thread::sleep(WALL_POLL);
    }
    let elapsed = clock.now().saturating_duration_since(started);
    let report = inst.shut_down();
    // The scheduler is gone; collect an interrupted worker's outcome by hand.
    if inst.process_state() == ProcessState::Running {
        inst.supervisor().poll();
    }
    let outcome = inst
        .supervisor()
        .last_outcome()
        .map_or(Outcome::Cancelled, |(_, o)| o);

    Ok(SimSummary {
        procedure: args.procedure.clone(),
        outcome,
        elapsed,
        final_value: plant.final_value(&args.procedure),
        vm_pressure: inst.vm_meter().value(),
        unacknowledged: report.unacknowledged,
    })
}

/// Names without building a plant.
pub fn procedure_names() -> Vec<String> {
    procedures("CO2", None).names().map(str::to_owned).collect()
}

/// Turn a finished run into the command's result.
pub fn into_result(summary: &SimSummary) -> Result<()> {
    match &summary.outcome {
        Outcome::Completed => Ok(()),
        Outcome::Cancelled => Err(CoreError::Cancelled).wrap_err_with(|| {
            format!("procedure {} did not finish", summary.procedure)
        }),
        other => Err(ProcedureFailed {
            procedure: summary.procedure.clone(),
            outcome: other.clone(),
        }
        .into()),
    }
}
