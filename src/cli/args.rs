//! CLI argument definitions.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable format.
    #[default]
    Human,
    /// Newline-delimited JSON.
    Json,
}

/// Operating mode argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ModeArg {
    /// Mutate live traffic.
    #[default]
    Live,
    /// Mutate and record to a tape.
    Record,
    /// Serve from a tape; no upstream traffic.
    Playback,
}

/// Chaos-engineering interception core for AI-agent traffic.
#[derive(Debug, Parser)]
#[command(name = "chaosproxy", author, version, about)]
pub struct Cli {
    /// Path to the chaos plan YAML file.
    #[arg(short, long, env = "CHAOS_PLAN")]
    pub plan: PathBuf,

    /// Validate the plan and exit without starting anything.
    #[arg(long)]
    pub check: bool,

    /// Operating mode.
    #[arg(short, long, value_enum, default_value = "live", env = "CHAOS_MODE")]
    pub mode: ModeArg,

    /// Tape file path (required for record and playback modes).
    #[arg(short, long, env = "CHAOS_TAPE")]
    pub tape: Option<PathBuf>,

    /// Control-plane listen address.
    #[arg(long, default_value = "127.0.0.1:9901", env = "CHAOS_CONTROL_LISTEN")]
    pub control_listen: String,

    /// Event log file (newline-delimited JSON).
    #[arg(long, default_value = "chaos-events.jsonl", env = "CHAOS_EVENT_LOG")]
    pub event_log: PathBuf,

    /// Prometheus metrics port on localhost; disabled when unset.
    #[arg(long, env = "CHAOS_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Default deadline in seconds for strategy suspensions.
    #[arg(long, default_value_t = 30.0)]
    pub suspension_deadline: f64,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value = "human")]
    pub log_format: LogFormat,
}
