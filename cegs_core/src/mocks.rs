//! Test and helper collaborators for driving the instrument without real transports.
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use cegs_traits::{DeviceError, Notifier, OperatorConsole};

use crate::event_log::EventLog;

/// Keeps every delivered `(subject, body)`.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, subject: &str, body: &str) -> Result<(), DeviceError> {
        if let Ok(mut s) = self.sent.lock() {
            s.push((subject.to_owned(), body.to_owned()));
        }
        Ok(())
    }
}

/// A transport that is always down.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn send(&self, _subject: &str, _body: &str) -> Result<(), DeviceError> {
        Err(Box::new(std::io::Error::other("mail relay unreachable")))
    }
}

/// Console that answers every question the same way and counts sounds.
#[derive(Debug)]
pub struct RecordingConsole {
    answer: AtomicBool,
    sounds: AtomicUsize,
    questions: Mutex<Vec<String>>,
}

impl Default for RecordingConsole {
    fn default() -> Self {
        Self::answering(true)
    }
}

impl RecordingConsole {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer: AtomicBool::new(answer),
            sounds: AtomicUsize::new(0),
            questions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_answer(&self, answer: bool) {
        self.answer.store(answer, Ordering::Release);
    }

    pub fn sounds(&self) -> usize {
        self.sounds.load(Ordering::Acquire)
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

impl OperatorConsole for RecordingConsole {
    fn play_sound(&self) {
        self.sounds.fetch_add(1, Ordering::AcqRel);
    }

    fn ask(&self, question: &str) -> bool {
        if let Ok(mut q) = self.questions.lock() {
            q.push(question.to_owned());
        }
        self.answer.load(Ordering::Acquire)
    }
}

/// In-memory event log.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<String>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventLog for MemoryEventLog {
    fn record(&self, event: &str) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event.to_owned());
        }
    }
}
