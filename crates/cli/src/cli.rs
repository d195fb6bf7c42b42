//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Dispatch Router - event routing core of a telemetry SDK
#[derive(Parser, Debug)]
#[command(
    name = "dispatch-router",
    author,
    version,
    about = "Event routing core for telemetry dispatches",
    long_about = "Routes tracked events through load rules, consent, transformations and \n\
                  mappings into per-processor queues, and delivers them while barriers allow."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "DISPATCH_ROUTER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "DISPATCH_ROUTER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay recorded events through the dispatch loop
    Replay(ReplayArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `replay` command
#[derive(Parser, Debug, Clone)]
pub struct ReplayArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "router.toml",
        env = "DISPATCH_ROUTER_CONFIG"
    )]
    pub config: PathBuf,

    /// JSON lines file of `{"name": ..., "data": {...}}` events (stdin when absent)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Flush every gated queue after the last event
    #[arg(long)]
    pub flush: bool,

    /// Barrier ids to start closed (others start open)
    #[arg(long = "closed-barrier", value_name = "ID")]
    pub closed_barriers: Vec<String>,

    /// Seconds to wait for queues to drain (0 = no timeout)
    #[arg(long, default_value = "10", env = "DISPATCH_ROUTER_TIMEOUT")]
    pub timeout: u64,

    /// Validate configuration and exit without replaying
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "DISPATCH_ROUTER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "router.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "router.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show load rule details
    #[arg(long)]
    pub rules: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}
