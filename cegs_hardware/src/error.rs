use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("device {0} not responding")]
    Timeout(String),
    #[error("device {device} fault: {reason}")]
    Fault { device: String, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
