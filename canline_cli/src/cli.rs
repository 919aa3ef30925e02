//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "canline", version, about = "Fill-line control server")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/canline.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control server against the built-in line simulator
    Run {
        /// Number of cans to simulate (overrides [simulator].cans; 0 runs
        /// until interrupted)
        #[arg(long)]
        cans: Option<u64>,
        /// PRNG seed for a reproducible run (overrides [simulator].seed)
        #[arg(long)]
        seed: Option<u32>,
    },
    /// Print the current SPC report for a product
    Spc {
        /// Product SKU to evaluate
        #[arg(long)]
        sku: String,
    },
    /// Issue a manual correction command for a product
    Corr {
        /// Product SKU to correct
        #[arg(long)]
        sku: String,
    },
    /// Quick health check (database + broker round-trip)
    SelfCheck,
}
