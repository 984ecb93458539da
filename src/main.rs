mod cli;
mod commands;
mod config;
mod models;
mod server;
mod services;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::{Cli, Commands};
use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    // Initialize tracing
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            tracing::error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Extract(args) => commands::extract(&config, args),
        Commands::Segment(args) => commands::segment(&config, args),
        Commands::Ingest(args) => commands::ingest(&config, args),
        Commands::Chapters => commands::chapters(&config),
        Commands::Generate(args) => commands::generate(&config, args).await,
        Commands::Chunked(args) => commands::chunked(&config, args).await,
        Commands::Serve => commands::serve(config).await,
    }
}
