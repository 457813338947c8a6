use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ustat_cli::commands::{mute, probe, status, watch};
use ustat_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Logs go to stderr so stdout stays clean for JSON output.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config =
        Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    match &cli.command {
        Some(Commands::Watch { live }) => watch::run(&config, *live)?,
        Some(Commands::Status { json }) => status::run(&mut std::io::stdout(), &config, *json)?,
        Some(Commands::Probe) => probe::run(&mut std::io::stdout(), &config)?,
        Some(Commands::MuteGitWarning) => mute::run(&config)?,
        None => {
            // No subcommand, show help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
