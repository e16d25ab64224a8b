use crate::config::ConfigLoader;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (merged)
    Show {
        /// Config file layered over the user config
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show configuration file path
    Path,
}

pub fn run(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Show { config } => show_config(config),
        ConfigCommands::Path => show_path(),
    }
}

fn show_config(explicit: Option<PathBuf>) -> Result<()> {
    let config = ConfigLoader::load(explicit.as_deref())?;
    println!("{}", config.to_toml_string()?);
    Ok(())
}

fn show_path() -> Result<()> {
    println!("User config: {:?}", ConfigLoader::user_config_path());
    Ok(())
}
