//! Daemon command

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::BenchdConfig;
use crate::engine::Engine;
use crate::server;

/// Run the daemon until Ctrl+C
pub async fn serve(config_path: Option<&Path>, port: Option<u16>, host: Option<String>) -> Result<()> {
    let mut config = BenchdConfig::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    tracing::info!(
        frameworks = ?config.frameworks.keys().collect::<Vec<_>>(),
        scenarios = ?config.bench.scenarios,
        "loaded configuration"
    );

    let engine = Arc::new(Engine::from_config(&config));
    let background = engine.spawn_background();

    // The HTTP listener outlives the engine so open streams see their
    // terminal frames before the connection closes.
    let http_shutdown = CancellationToken::new();
    let signal = {
        let engine = Arc::clone(&engine);
        let http_shutdown = http_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", e);
                return;
            }
            tracing::info!("received shutdown signal");
            engine.shutdown().await;
            http_shutdown.cancel();
        })
    };

    let result = server::start(Arc::clone(&engine), config.server.clone(), http_shutdown).await;

    signal.abort();
    engine.shutdown_token().cancel();
    for handle in background {
        let _ = handle.await;
    }

    result
}
