// src/cli.rs

//! Command-line flags of the `jobengine` binary.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `jobengine`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobengine",
    version,
    about = "Poll job queues and run the claimed jobs on this node.",
    long_about = None
)]
pub struct CliArgs {
    /// TOML file describing the engine, queues, nodes and job definitions.
    #[arg(long, value_name = "PATH", default_value = "jobengine.toml")]
    pub config: String,

    /// Name of the node to run as. Overrides `[engine].node`.
    #[arg(long, value_name = "NAME")]
    pub node: Option<String>,

    /// Submit one instance of this application once the engine is up.
    /// May be repeated.
    #[arg(long = "enqueue", value_name = "APPLICATION")]
    pub enqueue: Vec<String>,

    /// Log verbosity. Falls back to `JOBENGINE_LOG`, then `info`.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the config and print what it declares without starting.
    #[arg(long)]
    pub dry_run: bool,
}

/// Values accepted by `--log-level`.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
