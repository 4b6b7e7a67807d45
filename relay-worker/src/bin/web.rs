//! Mailrelay Web Server - HTTP entry point for SES notifications.
//!
//! This binary provides a small web server that:
//! - Receives SNS notification batches over HTTP
//! - Verifies authentication
//! - Forwards every record before answering
//!
//! A 200 response means the whole batch was forwarded.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailrelay::web::{health, notifications, AppState};
use mailrelay::{load_routing, Config, Forwarder, ForwarderSettings, Transport};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        webhook_auth_configured = config.webhook_auth_token.is_some(),
        transmit_mode = ?config.transmit_mode,
        rewrite_policy = ?config.rewrite_policy,
        "config_loaded"
    );

    let routing = Arc::new(load_routing(&config)?);
    let transport = Transport::from_config(&config)?;
    let forwarder = Arc::new(Forwarder::new(
        routing,
        ForwarderSettings::from_config(&config),
        transport,
    ));

    // Create application state
    let state = AppState::new(config.clone(), Arc::clone(&forwarder));

    // Build the router
    let app = Router::new()
        .route("/health", get(health))
        .route("/notifications", post(notifications::<Transport>))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Close publisher connection
    forwarder.transmitter().close().await;

    info!("web_server_shutdown_complete");

    Ok(())
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

    info!("web_server_shutting_down");
}
