//! Alert dispatch: synchronous bookkeeping on the caller, asynchronous delivery.
//!
//! `alert()` never blocks on the transport. It suppresses a body identical to the last
//! alert within the cool-down window, otherwise writes the event log, triggers the
//! attention sound, and queues the message. One worker thread drains the queue and
//! hands each message to the [`Notifier`]; transport errors and panics are logged and
//! dropped.
//!
//! The worker is stopped and joined when the dispatcher is dropped.
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cegs_traits::{Clock, Notifier, OperatorConsole};
use crossbeam_channel as xch;

use crate::config::AlertCfg;
use crate::event_log::EventLog;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    /// Subject qualified with the wall-clock time the alert was raised.
    pub timestamped_subject: String,
    pub body: String,
}

impl AlertMessage {
    pub fn new(subject: &str, body: &str) -> Self {
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        Self {
            subject: subject.to_owned(),
            timestamped_subject: format!("{subject} ({stamp})"),
            body: body.to_owned(),
        }
    }
}

pub struct AlertDispatcher {
    clock: Arc<dyn Clock>,
    cooldown: Duration,
    last: Mutex<Option<(String, Instant)>>,
    tx: xch::Sender<AlertMessage>,
    event_log: Arc<dyn EventLog>,
    console: Arc<dyn OperatorConsole>,
    delivered: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AlertDispatcher {
    pub fn spawn(
        cfg: &AlertCfg,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        console: Arc<dyn OperatorConsole>,
        event_log: Arc<dyn EventLog>,
    ) -> Self {
        let (tx, rx) = xch::unbounded::<AlertMessage>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);
        let delivered = Arc::new(AtomicU64::new(0));
        let delivered_worker = Arc::clone(&delivered);
        let poll = cfg.poll.max(Duration::from_millis(1));

        let deliver = move |msg: AlertMessage| {
            let sent = catch_unwind(AssertUnwindSafe(|| {
                notifier.send(&msg.timestamped_subject, &msg.body)
            }));
            match sent {
                Ok(Ok(())) => {
                    delivered_worker.fetch_add(1, Ordering::AcqRel);
                    tracing::debug!(subject = %msg.subject, "alert delivered");
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, subject = %msg.subject, "alert delivery failed");
                }
                Err(_) => {
                    tracing::warn!(subject = %msg.subject, "alert transport panicked");
                }
            }
        };

        let join_handle = std::thread::Builder::new()
            .name("cegs-alerts".into())
            .spawn(move || {
                loop {
                    if stop_worker.load(Ordering::Acquire) {
                        rx.try_iter().for_each(&deliver);
                        break;
                    }
                    match rx.recv_timeout(poll) {
                        Ok(msg) => {
                            deliver(msg);
                            rx.try_iter().for_each(&deliver);
                        }
                        Err(xch::RecvTimeoutError::Timeout) => {}
                        Err(xch::RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::trace!("alert worker exiting cleanly");
            });
        let join_handle = match join_handle {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::error!(error = %e, "could not start alert worker; alerts will only be logged");
                None
            }
        };

        Self {
            clock,
            cooldown: cfg.cooldown,
            last: Mutex::new(None),
            tx,
            event_log,
            console,
            delivered,
            stop,
            join_handle: Mutex::new(join_handle),
        }
    }

    /// Raise an alert. Returns `false` if it was suppressed as a duplicate.
    pub fn alert(&self, subject: &str, body: &str) -> bool {
        let now = self.clock.now();
        {
            let Ok(mut last) = self.last.lock() else {
                tracing::error!(subject, body, "alert state poisoned");
                return false;
            };
            if let Some((prev, at)) = last.as_ref()
                && prev == body
                && now.saturating_duration_since(*at) < self.cooldown
            {
                tracing::debug!(subject, "duplicate alert suppressed");
                return false;
            }
            *last = Some((body.to_owned(), now));
        }

        tracing::warn!(subject, body, "alert");
        self.event_log.record(&format!("{subject}: {body}"));
        self.console.play_sound();
        if self.tx.send(AlertMessage::new(subject, body)).is_err() {
            tracing::warn!(subject, "alert queue closed");
        }
        true
    }

    /// Messages queued but not yet picked up by the worker.
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    /// Messages the transport accepted.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// Stop the worker after it drains the queue, and wait for it.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self.join_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::warn!("alert worker panicked during shutdown");
        }
    }
}

impl Drop for AlertDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
