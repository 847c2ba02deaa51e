use anyhow::{Context, Result};
use fleet_sim::broker::{BrokerClient, JetStreamTransport};
use fleet_sim::directory::DirectoryClient;
use fleet_sim::signals::cancel_on_shutdown_signal;
use fleet_sim::{config, Simulator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleet_sim=info".into()),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %format!("{:#}", e), "Fatal error");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    info!("Fleet simulator starting...");

    let config = config::from_env()?;
    info!(
        broker_url = %config.broker.url,
        queue = %config.broker.queue_name,
        device_api = %config.directory.url,
        poll_ms = config.simulation.poll_ms,
        max_delta = config.simulation.max_delta,
        seeded = config.simulation.seed.is_some(),
        generator_mode = ?config.simulation.generator_mode,
        "Configuration loaded"
    );

    let broker = BrokerClient::connect(config.broker.clone())
        .await
        .context("Failed to initialize broker")?;

    let directory = DirectoryClient::new(&config.directory)?;
    let device_ids = directory
        .fetch_device_ids()
        .await
        .context("Failed to load devices")?;

    let transport = Arc::new(JetStreamTransport::new(broker.jetstream().clone()));
    let simulator = Simulator::from_config(&config, device_ids, transport);

    let cancel = CancellationToken::new();
    let signal_handle = cancel_on_shutdown_signal(cancel.clone());

    let summary = simulator.run(cancel).await;
    signal_handle.abort();

    info!(
        ticks = summary.ticks,
        published = summary.published,
        failed = summary.failed,
        "Simulation finished"
    );

    broker.close().await?;
    info!("Fleet simulator stopped");

    Ok(())
}
