use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("guardsync=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let format = cli.output.into();
    match &cli.command {
        Commands::Run(args) => commands::run::run(args).await,
        Commands::Replay(args) => commands::replay::run(args, format).await,
    }
}
