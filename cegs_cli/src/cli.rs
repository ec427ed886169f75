//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "cegs", version, about = "CEGS controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/cegs.toml")]
    pub config: PathBuf,

    /// Optional gas calibration CSV (strict header); rows override [[gases]]
    #[arg(long, value_name = "FILE")]
    pub gases: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); falls back to [logging] level, then info
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load and validate the config, then print a summary
    CheckConfig,
    /// List the procedures the simulated instrument offers
    ListProcedures,
    /// Run one procedure against the simulated plant
    Simulate {
        /// Procedure name (see list-procedures)
        #[arg(long)]
        procedure: String,
        /// Gas to admit for `pressurize`
        #[arg(long, default_value = "CO2")]
        gas: String,
        /// Target pressure in Torr for `pressurize` and `bleed`
        #[arg(long, value_name = "TORR")]
        target: Option<f64>,
        /// Treat the run as handling a sample (abnormal endings go to the event log)
        #[arg(long, action = ArgAction::SetTrue)]
        sample: bool,
        /// Simulated seconds per wall-clock second
        #[arg(long, value_name = "X", default_value_t = 50.0)]
        speed: f64,
    },
}
