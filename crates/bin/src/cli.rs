//! CLI argument definitions for the Guardsync binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for command results
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Format {
    /// Aligned tables for terminals
    Human,
    /// One JSON document on stdout
    Json,
}

/// Guardsync synchronization engine
#[derive(Parser, Debug)]
#[command(name = "guardsync")]
#[command(about = "Guardsync: keeps the admin console and the client portal in step")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, global = true, default_value = "human", env = "GUARDSYNC_OUTPUT")]
    pub output: Format,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the synchronization service against the admin and client APIs
    Run(RunArgs),
    /// Replay a fixture of events against in-memory stores and report results
    Replay(ReplayArgs),
}

/// Arguments for the run command
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Base URL of the admin console API
    #[arg(long, env = "GUARDSYNC_ADMIN_URL")]
    pub admin_url: String,

    /// Base URL of the client portal API
    #[arg(long, env = "GUARDSYNC_CLIENT_URL")]
    pub client_url: String,

    /// Service token sent as a bearer credential to both APIs
    #[arg(long, env = "GUARDSYNC_API_TOKEN", hide_env_values = true)]
    pub token: String,

    /// JSON config file; missing fields use their defaults
    #[arg(short, long, env = "GUARDSYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Arguments for the replay command
#[derive(clap::Args, Debug)]
pub struct ReplayArgs {
    /// Fixture file with seed data and events
    pub fixture: PathBuf,

    /// JSON config file; missing fields use their defaults
    #[arg(short, long, env = "GUARDSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Run a reconciliation cycle after the events
    #[arg(long)]
    pub reconcile: bool,
}
