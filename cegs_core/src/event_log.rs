//! Operator event log: append-only, synchronous, one timestamped line per event.
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

pub trait EventLog: Send + Sync {
    fn record(&self, event: &str);
}

/// Appends `YYYY-MM-DD HH:MM:SS<TAB>event` lines to a file.
pub struct FileEventLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }
}

impl EventLog for FileEventLog {
    fn record(&self, event: &str) {
        let _guard = self.lock.lock();
        let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        match OpenOptions::new().create(true).append(true).open(&self.path) {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{stamp}\t{event}") {
                    tracing::warn!(error = %e, path = %self.path.display(), "event log write failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %self.path.display(), "event log open failed");
            }
        }
    }
}

/// Event log that only forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn record(&self, event: &str) {
        tracing::info!(target: "cegs::events", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_log_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let log = FileEventLog::new(&path);
        log.record("first");
        log.record("second");
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("\tfirst"));
        assert!(lines[1].ends_with("\tsecond"));
        assert_eq!(lines[0].split('\t').next().unwrap().len(), 19);
    }
}
