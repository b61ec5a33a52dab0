//! # Project Sync Main Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use project_sync::{config::ConfigLoader, db, server::run_server, telemetry};

#[derive(Parser, Debug)]
#[command(name = "project-sync", version, about = "Project sync job service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Default)]
enum Command {
    /// Apply migrations and serve the HTTP API (default)
    #[default]
    Serve,
    /// Apply pending migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("Failed to load configuration")?;

    telemetry::init_tracing(&config).context("Failed to initialize tracing")?;
    match config.redacted_json() {
        Ok(redacted) => tracing::info!(
            profile = %config.profile,
            config = %redacted,
            "Loaded configuration"
        ),
        Err(err) => tracing::warn!(error = %err, "Could not render configuration"),
    }

    let pool = db::init_pool(&config).await?;
    db::run_migrations(&pool).await?;

    match cli.command.unwrap_or_default() {
        Command::Migrate => {
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Serve => run_server(config, pool).await,
    }
}
