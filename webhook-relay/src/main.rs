//! Webhook Relay - signed webhook receiver.
//!
//! This binary provides a thin web server that:
//! - Receives webhooks and verifies their HMAC signature
//! - Relays verified payloads to a RabbitMQ queue
//! - Drains the queue on demand for inspection

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use webhook_relay::{router, AmqpQueue, AppState, Config};

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

    let config = Config::from_env();
    info!(
        port = config.port,
        queue_name = ?config.queue_name,
        hmac_secret_configured = config.hmac_secret.is_some(),
        amqp_url_configured = config.amqp_url.is_some(),
        poll_wait_ms = config.poll_wait_ms,
        queue_timeout_ms = config.queue_timeout_ms,
        "config_loaded"
    );

    let missing = config.missing();
    if !missing.is_empty() {
        warn!(missing = ?missing, "config_incomplete");
    }

    let queue = AmqpQueue::new(config.amqp_url().to_string());

    // Lookups never create queues, so make sure the relay target exists
    if let Some(queue_name) = config.queue_name.as_deref() {
        if let Err(e) = queue.ensure_queue(queue_name).await {
            warn!(queue = %queue_name, error = %e, "queue_declare_failed");
        }
    }
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let state = AppState::new(config, Arc::new(queue.clone()));
    let app = router(state);

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    queue.close().await;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
