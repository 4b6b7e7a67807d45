//! RabbitMQ consumer module using lapin.
//!
//! This module handles connecting to RabbitMQ, consuming SNS event batches
//! from the inbound_notifications queue, and spawning an async task per
//! delivery to forward its records.

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties,
};
use tokio::{signal, task::JoinSet};
use tracing::{error, info, warn};

use mailrelay::{Config, Forwarder, Transport, INBOUND_QUEUE};

/// Run the RabbitMQ consumer.
///
/// This function:
/// 1. Connects to RabbitMQ using the configured URL
/// 2. Sets up QoS so at most `worker_concurrency` batches are in flight
/// 3. Declares the queue (idempotent operation)
/// 4. Starts consuming messages, spawning a task for each
/// 5. Handles graceful shutdown on SIGINT/SIGTERM, waiting for in-flight
///    deliveries before returning
pub async fn run(config: Config, forwarder: Arc<Forwarder<Transport>>) -> Result<()> {
    // Connect to RabbitMQ
    info!(url_length = config.cloudamqp_url.len(), "rabbitmq_connecting");

    let conn = Connection::connect(&config.cloudamqp_url, ConnectionProperties::default())
        .await
        .context("Failed to connect to RabbitMQ")?;

    info!("rabbitmq_connected");

    let channel = conn.create_channel().await.context("Failed to create channel")?;

    info!("rabbitmq_channel_created");

    let prefetch_count = u16::try_from(config.worker_concurrency).unwrap_or(u16::MAX);
    channel
        .basic_qos(prefetch_count, BasicQosOptions::default())
        .await
        .context("Failed to set QoS")?;

    info!(prefetch_count = prefetch_count, "rabbitmq_qos_set");

    channel
        .queue_declare(
            INBOUND_QUEUE,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .context("Failed to declare queue")?;

    info!(queue = INBOUND_QUEUE, "rabbitmq_queue_declared");

    let mut consumer = channel
        .basic_consume(
            INBOUND_QUEUE,
            "mailrelay-worker",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .context("Failed to start consumer")?;

    info!(queue = INBOUND_QUEUE, "rabbitmq_consumer_started");
    info!("worker_ready");

    let channel = Arc::new(channel);

    let mut tasks = JoinSet::new();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // Process messages until shutdown
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("worker_stopping");
                break;
            }
            delivery = consumer.next() => {
                match delivery {
                    Some(Ok(delivery)) => {
                        let channel = Arc::clone(&channel);
                        let forwarder = Arc::clone(&forwarder);

                        tasks.spawn(async move {
                            handle_delivery(&channel, &forwarder, delivery).await;
                        });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "rabbitmq_delivery_error");
                    }
                    None => {
                        warn!("rabbitmq_consumer_closed");
                        break;
                    }
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                log_task_result(joined);
            }
        }
    }

    drain_tasks(&mut tasks).await;

    info!("worker_shutdown_complete");
    Ok(())
}

/// Wait for every spawned delivery to finish.
async fn drain_tasks(tasks: &mut JoinSet<()>) {
    info!(in_flight = tasks.len(), "worker_draining");

    while let Some(joined) = tasks.join_next().await {
        log_task_result(joined);
    }
}

fn log_task_result(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "delivery_task_failed");
    }
}

/// Forward one SNS batch, then ack it or reject it without requeue.
async fn handle_delivery(channel: &Channel, forwarder: &Forwarder<Transport>, delivery: Delivery) {
    let delivery_tag = delivery.delivery_tag;
    let message_id = delivery
        .properties
        .message_id()
        .as_ref()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    info!(
        queue = INBOUND_QUEUE,
        message_id = %message_id,
        delivery_tag = delivery_tag,
        body_length = delivery.data.len(),
        "rabbitmq_batch_received"
    );

    match forwarder.process_event(&delivery.data).await {
        Ok(report) => {
            if let Err(e) = channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
            {
                error!(
                    delivery_tag = delivery_tag,
                    error = %e,
                    "rabbitmq_ack_failed"
                );
            } else {
                info!(
                    queue = INBOUND_QUEUE,
                    message_id = %message_id,
                    forwarded = report.forwarded.len(),
                    "rabbitmq_batch_completed"
                );
            }
        }
        Err(e) => {
            error!(
                message_id = %message_id,
                error = %e,
                "rabbitmq_batch_failed"
            );

            // Redelivery would replay records that were already forwarded
            if let Err(nack_err) = channel
                .basic_nack(
                    delivery_tag,
                    BasicNackOptions {
                        requeue: false,
                        ..Default::default()
                    },
                )
                .await
            {
                error!(
                    delivery_tag = delivery_tag,
                    error = %nack_err,
                    "rabbitmq_nack_failed"
                );
            }
        }
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "sigint_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
