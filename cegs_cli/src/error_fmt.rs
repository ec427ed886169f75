//! Human-readable error descriptions and structured JSON error formatting.

use crate::simulate::{ProcedureFailed, outcome_name};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    use cegs_core::error::{BuildError, CoreError};

    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingDevices => {
                "What happened: The instrument was assembled without a device registry.\nLikely causes: Device bring-up failed before the registry was handed over.\nHow to fix: Check the driver logs above this message, then rerun.".to_string()
            }
            BuildError::MissingNotifier | BuildError::MissingConsole => format!(
                "What happened: Instrument assembly is incomplete ({be}).\nLikely causes: The alert transport or operator console was not wired into the builder.\nHow to fix: Pass both with_notifier(...) and with_console(...) before try_build()."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun `cegs check-config`."
            ),
            BuildError::Core(core) => humanize_core(core),
        };
    }

    if let Some(pf) = err.downcast_ref::<ProcedureFailed>() {
        return format!(
            "What happened: {pf}.\nLikely causes: A device stopped responding or a wait ran past its budget.\nHow to fix: Check the event log and the lines above for the failing step, then rerun with --log-level=debug."
        );
    }

    if let Some(ce) = err.downcast_ref::<CoreError>() {
        return humanize_core(ce);
    }

    if let Some(te) = err.downcast_ref::<toml::de::Error>() {
        return format!(
            "What happened: The config file is not valid TOML or has a mistyped value.\nDetails: {}\nHow to fix: Correct the indicated line and rerun `cegs check-config`.",
            te.message()
        );
    }

    if let Some(io) = err.downcast_ref::<std::io::Error>()
        && io.kind() == std::io::ErrorKind::NotFound
    {
        return format!(
            "What happened: A file could not be found ({err}).\nLikely causes: Wrong --config or --gases path.\nHow to fix: Pass the correct path, e.g. `cegs --config etc/cegs.toml check-config`."
        );
    }

    // String-based heuristics for errors coming from config loading
    let msg = err.to_string();
    let lower = format!("{err:#}").to_ascii_lowercase();

    if lower.contains("gas csv must have headers") {
        return "Invalid headers in gas CSV. Expected 'gas,rise_rate_threshold,shutoff_latency_ms,flow_scale'.".to_string();
    }

    if lower.contains("invalid configuration") {
        let detail = err
            .chain()
            .last()
            .map_or_else(String::new, ToString::to_string);
        return format!(
            "What happened: Configuration is invalid ({detail}).\nLikely causes: Out-of-range values or bucket periods that do not nest.\nHow to fix: Edit the TOML config and rerun `cegs check-config`."
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn humanize_core(err: &cegs_core::CoreError) -> String {
    use cegs_core::CoreError;
    match err {
        CoreError::UnknownProcedure(name) => format!(
            "What happened: No procedure named {name}.\nHow to fix: Run `cegs list-procedures` for the available names."
        ),
        CoreError::ProcessBusy(name) => format!(
            "What happened: Procedure {name} is still running.\nHow to fix: Wait for it to finish before starting another."
        ),
        CoreError::MissingDevice { name, kind } => format!(
            "What happened: No {kind} named {name} is registered.\nLikely causes: The [devices] table names a device the drivers did not bring up.\nHow to fix: Fix the name in [devices] or the driver registration."
        ),
        CoreError::Cancelled => {
            "What happened: The run was cancelled by shutdown.\nLikely causes: Ctrl-C or an operator shutdown.\nHow to fix: Start the procedure again when ready.".to_string()
        }
        CoreError::Device(msg) | CoreError::DeviceFault(msg) => format!(
            "What happened: A device reported an error ({msg}).\nLikely causes: Wiring, power, or a driver that stopped responding.\nHow to fix: Check the device, then rerun."
        ),
        CoreError::Config(msg) => format!(
            "What happened: Configuration problem ({msg}).\nHow to fix: Edit the TOML config and rerun `cegs check-config`."
        ),
        CoreError::State(msg) => format!(
            "What happened: Internal state error ({msg}).\nHow to fix: Re-run with --log-level=debug and report the output."
        ),
    }
}

/// Stable exit codes: 2 for configuration and usage problems, 3 for a cancelled run,
/// 4 for device faults, 5 for a failed procedure, 1 otherwise.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    use cegs_core::error::{BuildError, CoreError};

    let core = err.downcast_ref::<CoreError>().or_else(|| {
        err.downcast_ref::<BuildError>().and_then(|b| match b {
            BuildError::Core(c) => Some(c),
            _ => None,
        })
    });
    match core {
        Some(CoreError::Cancelled) => return 3,
        Some(CoreError::Device(_) | CoreError::DeviceFault(_)) => return 4,
        Some(_) => return 2,
        None => {}
    }
    if err.downcast_ref::<ProcedureFailed>().is_some() {
        return 5;
    }
    if err.downcast_ref::<BuildError>().is_some() || err.downcast_ref::<toml::de::Error>().is_some()
    {
        return 2;
    }
    let lower = format!("{err:#}").to_ascii_lowercase();
    if lower.contains("invalid configuration") || lower.contains("gas csv") {
        return 2;
    }
    1
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    if let Some(pf) = err.downcast_ref::<ProcedureFailed>() {
        return json!({
            "reason": outcome_name(&pf.outcome),
            "procedure": pf.procedure,
            "message": humanize(err),
        })
        .to_string();
    }

    // Generic error JSON
    json!({ "reason": "Error", "exit_code": exit_code_for_error(err), "message": humanize(err) })
        .to_string()
}
