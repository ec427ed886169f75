//! Maps `Box<dyn Error>` from trait boundaries to typed `CoreError`.
//!
//! The traits in `cegs_traits` use `Box<dyn Error + Send + Sync>` so any driver can plug
//! in; this module converts those to our typed error enum, with an optional
//! feature-gated path for `cegs_hardware::HwError` downcasting.

use crate::error::CoreError;

/// Map a trait-boundary error to a typed `CoreError`.
///
/// Known hardware error types are downcast first, then string heuristics apply.
pub fn map_device_error(e: &(dyn std::error::Error + 'static)) -> CoreError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<cegs_hardware::HwError>() {
            return match hw {
                cegs_hardware::HwError::Timeout(_) => CoreError::Device(hw.to_string()),
                other => CoreError::DeviceFault(other.to_string()),
            };
        }
    }
    if let Some(core) = e.downcast_ref::<CoreError>() {
        return core.clone();
    }

    let s = e.to_string();
    if s.to_lowercase().contains("fault") {
        CoreError::DeviceFault(s)
    } else {
        CoreError::Device(s)
    }
}

/// Shorthand for `map_err` at device call sites.
pub fn device_report(e: &(dyn std::error::Error + Send + Sync + 'static)) -> eyre::Report {
    eyre::Report::new(map_device_error(e))
}
