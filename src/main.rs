use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bedrock_raknet::{Hooks, RaknetServer, ServerConfig};

const CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::path::Path::new(CONFIG_PATH).exists() {
        true => ServerConfig::load(CONFIG_PATH)
            .with_context(|| format!("loading {CONFIG_PATH}"))?,
        false => ServerConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let (server, mut events, _handle) = RaknetServer::bind(config, Hooks::default())
        .await
        .context("binding raknet server")?;
    info!("listening on {}", server.local_addr());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let server_task = tokio::spawn(server.run(shutdown_rx));

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(?event, "transport event");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    shutdown_tx.send(true).ok();

    if let Err(e) = server_task.await {
        warn!(error = %e, "server task ended abnormally");
    }
    event_task.abort();
    Ok(())
}
