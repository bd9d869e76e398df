use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sbguard")]
#[command(about = "sbguard: ban and admin verification for game servers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "SBGUARD_CONFIG", default_value = "sbguard.toml")]
    pub config: PathBuf,

    /// Log level, overrides `logging.level` from the configuration
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an interactive host backed by the in-memory store
    Run(RunArgs),
    /// Load and validate the configuration, then print the effective settings
    CheckConfig,
    /// Normalize player identities to SteamID64
    Identity(IdentityArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// JSON fixture with groups, admins and bans
    #[arg(long)]
    pub fixture: Option<PathBuf>,
    /// Do not reload the configuration when the file changes
    #[arg(long)]
    pub no_watch: bool,
}

#[derive(clap::Args)]
pub struct IdentityArgs {
    /// Identities as SteamID64, STEAM_X:Y:Z or [U:1:N]
    #[arg(required = true)]
    pub inputs: Vec<String>,
}
