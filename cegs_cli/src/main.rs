//! `cegs`: config checking and simulated runs of the CEGS control core.

mod cli;
mod error_fmt;
mod simulate;

use std::path::Path;

use cegs_config::{Config, Logging};
use cegs_core::Flag;
use clap::Parser;
use eyre::{Result, WrapErr};
use serde_json::json;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};
use crate::simulate::{SimArgs, SimSummary, outcome_name};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(e) = color_eyre::install() {
        eprintln!("color-eyre unavailable: {e}");
    }

    let loaded = load_config(&cli);
    let logging = loaded.as_ref().ok().map(|c| &c.logging);
    let level = cli
        .log_level
        .as_deref()
        .or_else(|| logging.and_then(|l| l.level.as_deref()))
        .unwrap_or("info");
    if let Err(e) = init_tracing(level, cli.json, logging) {
        eprintln!("logging setup failed: {e:#}");
    }

    let result = loaded.and_then(|cfg| run(&cli, &cfg));
    if let Err(e) = result {
        tracing::error!(error = %format!("{e:#}"), "command failed");
        if JSON_MODE.get().copied().unwrap_or(false) {
            println!("{}", format_error_json(&e));
        } else {
            eprintln!("{}", humanize(&e));
        }
        std::process::exit(exit_code_for_error(&e));
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let text = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("reading config {}", cli.config.display()))?;
    let mut cfg = cegs_config::load_toml(&text).wrap_err("parsing config TOML")?;
    if let Some(path) = &cli.gases {
        cfg.merge_gases(cegs_config::load_gas_csv(path)?);
    }
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

/// Console layer on stderr (JSON with `--json`), plus a JSON file layer when
/// `[logging] file` is set. `RUST_LOG` overrides `--log-level`.
fn init_tracing(level: &str, json: bool, logging: Option<&Logging>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .wrap_err_with(|| format!("invalid log level {level:?}"))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .boxed(),
        );
    }

    if let Some(path) = logging.and_then(|l| l.file.as_deref()) {
        let path = Path::new(path);
        let dir = path
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("logging.file {} has no file name", path.display()))?;
        let appender = match logging.and_then(|l| l.rotation.as_deref()) {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .wrap_err("installing tracing subscriber")
}

fn run(cli: &Cli, cfg: &Config) -> Result<()> {
    match &cli.cmd {
        Commands::CheckConfig => {
            check_config(cli, cfg);
            Ok(())
        }
        Commands::ListProcedures => {
            let names = simulate::procedure_names();
            if cli.json {
                println!("{}", json!({ "procedures": names }));
            } else {
                names.iter().for_each(|n| println!("{n}"));
            }
            Ok(())
        }
        Commands::Simulate {
            procedure,
            gas,
            target,
            sample,
            speed,
        } => {
            let interrupt = Flag::new();
            let on_signal = interrupt.clone();
            ctrlc::set_handler(move || on_signal.raise())
                .wrap_err("installing Ctrl-C handler")?;
            let args = SimArgs {
                procedure: procedure.clone(),
                gas: gas.clone(),
                target: *target,
                sample: *sample,
                speed: *speed,
            };
            let summary = simulate::run(cfg, &args, &interrupt)?;
            print_summary(cli.json, &summary);
            simulate::into_result(&summary)
        }
    }
}

fn check_config(cli: &Cli, cfg: &Config) {
    let gases: Vec<&str> = cfg.gases.iter().map(|g| g.gas.as_str()).collect();
    if cli.json {
        println!(
            "{}",
            json!({
                "ok": true,
                "config": cli.config.display().to_string(),
                "tick_ms": cfg.scheduler.tick_ms,
                "gases": gases,
                "flow_paths": cfg.devices.flow_paths,
            })
        );
    } else {
        println!("config ok: {}", cli.config.display());
        println!(
            "  scheduler: tick {} ms, medium/slow/log every {}/{}/{} ticks",
            cfg.scheduler.tick_ms,
            cfg.scheduler.medium_every,
            cfg.scheduler.slow_every,
            cfg.scheduler.log_every
        );
        println!("  gases: {}", if gases.is_empty() { "-".into() } else { gases.join(", ") });
        println!("  flow paths closed at shutdown: {}", cfg.devices.flow_paths.len());
    }
}

fn print_summary(as_json: bool, s: &SimSummary) {
    let reason = match &s.outcome {
        cegs_core::Outcome::Failed(r) | cegs_core::Outcome::Panicked(r) => Some(r.as_str()),
        _ => None,
    };
    if as_json {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        println!(
            "{}",
            json!({
                "timestamp": timestamp,
                "procedure": s.procedure,
                "outcome": outcome_name(&s.outcome),
                "reason": reason,
                "elapsed_s": s.elapsed.as_secs_f64(),
                "final_value": s.final_value,
                "vm_pressure": s.vm_pressure,
                "unacknowledged": s.unacknowledged,
            })
        );
    } else {
        let value = s
            .final_value
            .map_or_else(|| "-".to_string(), |v| format!("{v:.3}"));
        println!(
            "{} {}: {:.1} s simulated, final value {value}",
            s.procedure,
            outcome_name(&s.outcome).to_ascii_lowercase(),
            s.elapsed.as_secs_f64()
        );
        if !s.unacknowledged.is_empty() {
            println!("unacknowledged at shutdown: {}", s.unacknowledged.join(", "));
        }
    }
}
