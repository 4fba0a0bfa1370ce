//! Host Metrics Agent
//!
//! Long-running collector that:
//! - Connects to the MQTT broker (fatal if the first attempt fails)
//! - Samples CPU, memory and disk usage every collection interval
//! - Publishes each sample with QoS 1 and echoes it to stdout as JSON

use std::sync::Arc;

use agent::{AgentConfig, Publisher, PublishingSink, Sampler, SystemSource};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Observability Agent...");

    // Load configuration
    let config = AgentConfig::from_env();
    info!(
        tenant_id = %config.tenant_id,
        agent_id = %config.agent_id,
        interval_secs = config.collection_interval.as_secs(),
        "Configuration loaded"
    );

    // Initialize MQTT publisher
    let publisher = match Publisher::new(Some(config.publisher_config())).await {
        Ok(p) => Arc::new(p),
        Err(e) => {
            error!("Failed to initialize MQTT publisher: {}", e);
            return Err(e.into());
        }
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal.cancel();
    });

    let source = SystemSource::new(config.disk_mount_point.clone());
    let mut sampler = Sampler::new(config.tenant_id.clone(), config.agent_id.clone(), source);
    let mut sink = PublishingSink::stdout(Arc::clone(&publisher));

    sampler
        .run(config.collection_interval, &mut sink, shutdown)
        .await;

    publisher.close().await;
    Ok(())
}
