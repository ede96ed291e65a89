use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use typhoon::aggregator::CounterAggregator;
use typhoon::config::Config;
use typhoon::flush::{self, Flusher};
use typhoon::server::{CountingServer, CountingService};
use typhoon::store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("typhoon=debug,info")),
        )
        .init();

    info!("Starting typhoon counting server");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    info!("Loading config from {}", config_path);

    let config = Config::load(&config_path)?;

    let store = store::connect(&config.store.database_url, config.store.max_connections)
        .await
        .with_context(|| format!("opening counter store {}", config.store.database_url))?;

    let aggregator = Arc::new(CounterAggregator::new());
    let flusher = Flusher::new(
        aggregator.clone(),
        store,
        config.flush.interval(),
        config.store.write_timeout(),
    );

    let (flush_stop, flush_rx) = watch::channel(false);
    let flush_task = tokio::spawn(async move { flusher.run(flush_rx).await });
    info!("Flusher started, interval {:?}", config.flush.interval());

    let service = CountingService::new(aggregator, &config.server);
    let server = CountingServer::bind(config.server.listen_addr, service).await?;

    let (server_stop, server_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        let _ = server_stop.send(true);
    });

    info!(
        "Counting requests at {}{}",
        config.server.listen_addr, config.server.counting_path
    );
    // the flusher is stopped only once connections are closed, so nothing
    // can increment after its final flush
    let served = async {
        let served = server.run(server_rx).await;
        if let Err(e) = &served {
            error!("Server stopped with error: {}", e);
        }
        served
    };
    let (served, report) = flush::finish_after(served, flush_stop, flush_task).await?;
    info!(
        "Final flush wrote {} counters, {} failed",
        report.written, report.failed
    );

    served?;
    Ok(())
}
