//! Webhook Relay Drain - print every visible message in the queue.
//!
//! Performs one drain of the configured queue and writes each body to
//! stdout on its own line. Messages are not acknowledged and become
//! visible again once the drain ends.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use webhook_relay::{AmqpQueue, Config, QueueRelay};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only message bodies
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true).with_writer(io::stderr))
        .init();

    info!("drain_starting");

    let config = Config::from_env();
    let queue_name = config
        .queue_name
        .clone()
        .context("QUEUE_NAME must be set")?;

    let queue = AmqpQueue::new(config.amqp_url().to_string());
    let relay = QueueRelay::new(
        Arc::new(queue.clone()),
        config.poll_wait(),
        config.queue_timeout(),
    );

    let drained = relay.drain_all(&queue_name).await;
    queue.close().await;

    let bodies = drained.with_context(|| format!("Failed to drain queue {}", queue_name))?;

    let mut stdout = io::stdout().lock();
    for body in &bodies {
        writeln!(stdout, "{}", body).context("Failed to write message")?;
    }

    info!(queue = %queue_name, message_count = bodies.len(), "drain_complete");

    Ok(())
}
