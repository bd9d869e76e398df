mod cli;
mod commands;
mod host;
mod observability;
mod output;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Run(args) => {
            let config = sbguard_config::load_config(Some(&cli.config))
                .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;
            let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
            observability::init_tracing(level);
            commands::run::run(&cli.config, config, args, cli.log_level.is_some()).await?;
        }
        Commands::CheckConfig => {
            observability::init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            commands::check::check_config(&cli.config, format)?;
        }
        Commands::Identity(args) => {
            commands::identity::normalize(&args.inputs, format)?;
        }
    }

    Ok(())
}
