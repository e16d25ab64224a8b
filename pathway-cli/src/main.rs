use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod config;
mod publisher;

#[derive(Parser)]
#[command(name = "pathway", about = "Learner event orchestration")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL event file through the engine
    Run(commands::run::RunArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Config(args) => commands::config::run(args),
    }
}
