use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use benchd::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "benchd=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Serve { port, host } => {
            benchd::cli::serve(config, port, host).await?;
        }
        Commands::Frameworks { probe } => {
            benchd::cli::frameworks(config, probe).await?;
        }
        Commands::Gpu { json } => {
            benchd::cli::gpu(config, json).await?;
        }
    }

    Ok(())
}
