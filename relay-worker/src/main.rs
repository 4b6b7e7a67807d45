//! Mailrelay Worker - async RabbitMQ consumer for SES notifications.
//!
//! This worker consumes SNS event batches from the inbound_notifications
//! queue, forwards every notification to its mapped destinations and
//! acknowledges the batch only when all of its records went through.

mod consumer;

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailrelay::{load_routing, Config, Forwarder, ForwarderSettings, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    tracing::info!("worker_starting");

    // Load configuration from environment
    let config = Config::from_env();
    tracing::info!(
        cloudamqp_url_set = !config.cloudamqp_url.is_empty(),
        concurrency = config.worker_concurrency,
        content_encoding = ?config.content_encoding,
        rewrite_policy = ?config.rewrite_policy,
        transmit_mode = ?config.transmit_mode,
        "config_loaded"
    );

    // Routing rules are loaded once and never reloaded
    let routing = Arc::new(load_routing(&config)?);
    let transport = Transport::from_config(&config)?;

    let forwarder = Arc::new(Forwarder::new(
        routing,
        ForwarderSettings::from_config(&config),
        transport,
    ));

    // Start the consumer
    consumer::run(config, Arc::clone(&forwarder)).await?;

    forwarder.transmitter().close().await;

    Ok(())
}
