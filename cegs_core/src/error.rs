use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("device error: {0}")]
    Device(String),
    #[error("device fault: {0}")]
    DeviceFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown procedure: {0}")]
    UnknownProcedure(String),
    #[error("process busy: {0} is still running")]
    ProcessBusy(String),
    #[error("no {kind} named {name}")]
    MissingDevice { name: String, kind: &'static str },
    #[error("cancelled by shutdown")]
    Cancelled,
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing device registry")]
    MissingDevices,
    #[error("missing notifier")]
    MissingNotifier,
    #[error("missing operator console")]
    MissingConsole,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// True if `report` (or anything it wraps) is a shutdown cancellation.
pub fn is_cancelled(report: &Report) -> bool {
    report
        .chain()
        .any(|e| e.downcast_ref::<CoreError>() == Some(&CoreError::Cancelled))
}
