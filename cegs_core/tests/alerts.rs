use std::sync::Arc;
use std::time::Duration;

use cegs_core::AlertDispatcher;
use cegs_core::config::AlertCfg;
use cegs_core::mocks::{FailingNotifier, MemoryEventLog, RecordingConsole, RecordingNotifier};
use cegs_traits::{Clock, ManualClock, Notifier};

struct Fixture {
    clock: ManualClock,
    notifier: Arc<RecordingNotifier>,
    console: Arc<RecordingConsole>,
    events: Arc<MemoryEventLog>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            clock: ManualClock::new(),
            notifier: Arc::new(RecordingNotifier::new()),
            console: Arc::new(RecordingConsole::default()),
            events: Arc::new(MemoryEventLog::new()),
        }
    }

    fn dispatcher(&self, notifier: Arc<dyn Notifier>) -> AlertDispatcher {
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());
        AlertDispatcher::spawn(
            &AlertCfg::default(),
            clock,
            notifier,
            self.console.clone(),
            self.events.clone(),
        )
    }
}

#[test]
fn identical_bodies_within_cooldown_are_sent_once() {
    let f = Fixture::new();
    let alerts = f.dispatcher(f.notifier.clone());
    assert!(alerts.alert("Leak", "X"));
    f.clock.advance(Duration::from_secs(60));
    assert!(!alerts.alert("Leak again", "X"));
    alerts.shutdown();

    assert_eq!(f.notifier.sent().len(), 1);
    assert_eq!(f.events.events(), vec!["Leak: X".to_owned()]);
    assert_eq!(f.console.sounds(), 1);
}

#[test]
fn identical_bodies_outside_cooldown_are_sent_twice() {
    let f = Fixture::new();
    let alerts = f.dispatcher(f.notifier.clone());
    assert!(alerts.alert("Leak", "X"));
    f.clock.advance(Duration::from_secs(30 * 60 + 1));
    assert!(alerts.alert("Leak", "X"));
    alerts.shutdown();
    assert_eq!(f.notifier.sent().len(), 2);
    assert_eq!(alerts.delivered(), 2);
}

#[test]
fn a_different_body_resets_suppression() {
    let f = Fixture::new();
    let alerts = f.dispatcher(f.notifier.clone());
    assert!(alerts.alert("A", "X"));
    assert!(alerts.alert("B", "Y"));
    assert!(alerts.alert("A", "X"));
    alerts.shutdown();
    let bodies: Vec<_> = f.notifier.sent().into_iter().map(|(_, b)| b).collect();
    assert_eq!(bodies, ["X", "Y", "X"]);
}

#[test]
fn subjects_carry_a_timestamp() {
    let f = Fixture::new();
    let alerts = f.dispatcher(f.notifier.clone());
    alerts.alert("Pump flooded", "body");
    alerts.shutdown();
    let (subject, _) = f.notifier.sent().remove(0);
    assert!(subject.starts_with("Pump flooded ("), "{subject}");
    assert!(subject.ends_with(')'));
}

#[test]
fn transport_failures_are_swallowed() {
    let f = Fixture::new();
    let alerts = f.dispatcher(Arc::new(FailingNotifier));
    assert!(alerts.alert("Leak", "X"));
    alerts.shutdown();
    assert_eq!(alerts.delivered(), 0);
    // Bookkeeping on the caller still happened.
    assert_eq!(f.events.events().len(), 1);
    assert_eq!(f.console.sounds(), 1);
}
