//! Starsync CLI - mirror one directory into many
//!
//! Provides commands for:
//! - Running the replication engine against host directories
//! - One-shot mirroring (bootstrap without watching)

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::mirror::MirrorCommand;
use commands::run::RunCommand;

#[derive(Debug, Parser)]
#[command(name = "starsync", version, about = "Multi-target file synchronization")]
pub struct Cli {
    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch a primary directory and replicate changes into mirrors
    Run(RunCommand),
    /// Rebuild every mirror from the primary once, then exit
    Mirror(MirrorCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(cmd) => cmd.execute(cli.config.as_deref()).await,
        Commands::Mirror(cmd) => cmd.execute(cli.config.as_deref()).await,
    }
}
