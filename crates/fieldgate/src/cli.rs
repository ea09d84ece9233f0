//! Argument definitions for the `fieldgate` binary.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "fieldgate",
    version,
    about = "Industrial telemetry gateway: poll PLC controllers and fan readings out to viewers"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Config file path (defaults to the platform config directory).
    #[arg(short, long, global = true, env = "FIELDGATE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate the configuration and print the resolved fleet.
    Check,

    /// Run the gateway and stream telemetry updates to stdout as JSON.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Run against a built-in two-park simulated fleet; no config needed.
    #[arg(long)]
    pub demo: bool,

    /// Exit after printing this many telemetry updates.
    #[arg(long, value_name = "N")]
    pub updates: Option<u64>,
}
