#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `canline` — fill-line control server.
//!
//! Wires the SQLite ledger, the in-process broker, the ingestion pipeline,
//! and the status broadcast together, then drives them with the built-in
//! line simulator.

mod cli;
mod run;
mod sim;

use clap::Parser;
use cli::{Cli, Commands, FILE_GUARD};
use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();
    let cfg = load_config(&args)?;
    init_logging(&args, &cfg.logging);

    match args.cmd {
        Commands::Run { cans, seed } => run::run_line(&cfg, cans, seed),
        Commands::Spc { sku } => run::print_spc(&cfg, &sku),
        Commands::Corr { sku } => run::send_corr(&cfg, &sku),
        Commands::SelfCheck => run::self_check(),
    }
}

/// A missing config file falls back to defaults; a present but invalid one
/// is a hard error.
fn load_config(args: &Cli) -> Result<canline_config::Config> {
    if !args.config.exists() {
        return Ok(canline_config::Config::default());
    }
    let text = std::fs::read_to_string(&args.config)
        .wrap_err_with(|| format!("reading config {}", args.config.display()))?;
    let cfg = canline_config::load_toml(&text)
        .wrap_err_with(|| format!("parsing config {}", args.config.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("validating config {}", args.config.display()))?;
    Ok(cfg)
}

/// Console logging on stderr (stdout is reserved for status events and
/// reports); optional JSON-lines file sink per `[logging]`.
fn init_logging(args: &Cli, logging: &canline_config::Logging) {
    let level = logging
        .level
        .clone()
        .unwrap_or_else(|| args.log_level.clone());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &logging.file {
        Some(path) => {
            let (dir, name) = split_log_path(path);
            let appender = match logging.rotation.as_deref() {
                Some("daily") => tracing_appender::rolling::daily(dir, name),
                Some("hourly") => tracing_appender::rolling::hourly(dir, name),
                _ => tracing_appender::rolling::never(dir, name),
            };
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .json()
                .init();
        }
        None if args.json => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

fn split_log_path(path: &str) -> (&str, &str) {
    let p = std::path::Path::new(path);
    let dir = p.parent().and_then(|d| d.to_str()).filter(|d| !d.is_empty());
    let name = p.file_name().and_then(|f| f.to_str());
    (dir.unwrap_or("."), name.unwrap_or("canline.log"))
}
