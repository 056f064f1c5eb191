use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;
mod host;

use commands::{eval::EvalCommand, run::RunCommand, snapshot::SnapshotCommand};

#[derive(Parser)]
#[command(name = "jsvm", version, about = "Host for the Otter JavaScript VM")]
struct Cli {
    /// Config file (defaults to jsvm.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Extra engine flags, e.g. --engine-flag=--expose-gc
    #[arg(long = "engine-flag", value_name = "FLAG", global = true, allow_hyphen_values = true)]
    engine_flags: Vec<String>,

    /// Log engine activity
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file
    Run(RunCommand),
    /// Evaluate source given on the command line
    Eval(EvalCommand),
    /// Run scripts and write a startup snapshot of the resulting globals
    Snapshot(SnapshotCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;
    config.init.flags.extend(cli.engine_flags);
    config.init.remove_flags = true;
    let unknown = otter_jsvm::init(config.init.clone())?;
    for flag in unknown {
        tracing::warn!(%flag, "ignoring unknown engine flag");
    }

    match cli.command {
        Commands::Run(cmd) => cmd.run(&config),
        Commands::Eval(cmd) => cmd.run(&config),
        Commands::Snapshot(cmd) => cmd.run(&config),
    }
}
