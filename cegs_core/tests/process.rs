mod common;

use std::sync::Arc;
use std::time::Duration;

use cegs_core::{CoreError, Flag, InstrumentCfg, Outcome, ProcedureRegistry, ProcessState};
use cegs_traits::{Clock, MonotonicClock};
use common::{Rig, poll_until};
use rstest::rstest;

fn clock() -> Arc<dyn Clock> {
    Arc::new(MonotonicClock::new())
}

fn procedures(release: &Flag) -> ProcedureRegistry {
    let release = release.clone();
    let mut r = ProcedureRegistry::new();
    r.register("noop", |_| Ok(()))
        .register("fails", |ctx| {
            let _s = ctx.step("Admit CO2");
            eyre::bail!("sample valve stuck")
        })
        .register("panics", |_| panic!("driver bug"))
        .register("hold", move |ctx| {
            let _s = ctx.step("Hold");
            ctx.wait_until(Duration::from_secs(60), || release.is_raised())?;
            Ok(())
        });
    r
}

#[test]
fn unknown_procedure_is_rejected_synchronously() {
    let clock = clock();
    let rig = Rig::new(&clock);
    let inst = rig.build(clock, InstrumentCfg::default(), procedures(&Flag::new()));
    assert_eq!(
        inst.run_process("graphitize"),
        Err(CoreError::UnknownProcedure("graphitize".into()))
    );
    assert_eq!(inst.process_state(), ProcessState::Ready);
}

#[test]
fn second_start_while_running_is_rejected() {
    let clock = clock();
    let rig = Rig::new(&clock);
    let release = Flag::new();
    let inst = rig.build(clock, InstrumentCfg::default(), procedures(&release));

    inst.run_process("hold").unwrap();
    assert!(matches!(inst.run_process("noop"), Err(CoreError::ProcessBusy(_))));
    assert!(poll_until(&inst, ProcessState::Running));
    assert_eq!(
        inst.run_process("noop"),
        Err(CoreError::ProcessBusy("hold".into()))
    );

    release.raise();
    assert!(poll_until(&inst, ProcessState::Finished));
    assert!(poll_until(&inst, ProcessState::Ready));
    assert_eq!(
        inst.supervisor().last_outcome(),
        Some(("hold".into(), Outcome::Completed))
    );
    inst.run_process("noop").unwrap();
    inst.shut_down();
}

#[rstest]
#[case("fails", true)]
#[case("panics", true)]
#[case("noop", false)]
fn abnormal_sample_runs_are_logged(#[case] name: &str, #[case] aborted: bool) {
    let clock = clock();
    let rig = Rig::new(&clock);
    let inst = rig.build(clock, InstrumentCfg::default(), procedures(&Flag::new()));
    inst.set_sample_run(true);

    inst.run_process(name).unwrap();
    assert!(poll_until(&inst, ProcessState::Finished));
    let events = rig.events.events();
    assert_eq!(
        events.iter().any(|e| e.starts_with(&format!("Aborted run: {name}"))),
        aborted,
        "{events:?}"
    );

    assert!(poll_until(&inst, ProcessState::Ready));
    assert_eq!(inst.steps().depth(), 0);
    inst.shut_down();
    assert_eq!(rig.notifier.sent().len(), usize::from(aborted));
}

#[test]
fn sample_flag_lasts_one_run() {
    let clock = clock();
    let rig = Rig::new(&clock);
    let inst = rig.build(clock, InstrumentCfg::default(), procedures(&Flag::new()));
    inst.set_sample_run(true);
    inst.run_process("noop").unwrap();
    assert!(poll_until(&inst, ProcessState::Finished));
    assert!(inst.supervisor().is_sample_run());
    assert!(poll_until(&inst, ProcessState::Ready));
    assert!(!inst.supervisor().is_sample_run());

    inst.run_process("fails").unwrap();
    assert!(poll_until(&inst, ProcessState::Finished));
    assert!(matches!(
        inst.supervisor().last_outcome(),
        Some((_, Outcome::Failed(_)))
    ));
    assert!(rig.events.events().iter().all(|e| !e.starts_with("Aborted run")));
    inst.shut_down();
}

#[test]
fn non_sample_faults_still_alert_but_leave_no_aborted_run() {
    let clock = clock();
    let rig = Rig::new(&clock);
    let inst = rig.build(clock, InstrumentCfg::default(), procedures(&Flag::new()));
    inst.run_process("fails").unwrap();
    assert!(poll_until(&inst, ProcessState::Finished));
    match inst.supervisor().last_outcome() {
        Some((name, Outcome::Failed(reason))) => {
            assert_eq!(name, "fails");
            assert!(reason.contains("sample valve stuck"), "{reason}");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(rig.events.events().iter().all(|e| !e.starts_with("Aborted run")));
    inst.shut_down();
    assert_eq!(rig.notifier.sent().len(), 1);
}

#[test]
fn shutdown_cancels_a_waiting_procedure() {
    let clock = clock();
    let rig = Rig::new(&clock);
    let inst = rig.build(clock, InstrumentCfg::default(), procedures(&Flag::new()));
    inst.set_sample_run(true);
    inst.run_process("hold").unwrap();
    assert!(poll_until(&inst, ProcessState::Running));

    let report = inst.shut_down();
    assert!(report.worker_exited);
    assert!(poll_until(&inst, ProcessState::Finished));
    assert_eq!(
        inst.supervisor().last_outcome(),
        Some(("hold".into(), Outcome::Cancelled))
    );
    assert!(rig.events.events().iter().any(|e| e == "Aborted run: hold: cancelled"));
}
