//! RabbitMQ queue client.
//!
//! A persistent connection and publish channel are shared across requests
//! and re-established on failure. Each receive session gets its own
//! channel; closing that channel returns every unacknowledged delivery to
//! the queue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lapin::{
    options::{BasicGetOptions, BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::client::{QueueClient, QueueConsumer};
use super::types::{QueueError, QueueOperation, QueueUrl, Receipt, ReceivedMessage};

/// RabbitMQ-backed [`QueueClient`].
#[derive(Clone)]
pub struct AmqpQueue {
    inner: Arc<AmqpInner>,
}

struct AmqpInner {
    url: String,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
}

impl AmqpQueue {
    /// Create a client for the given RabbitMQ URL. Connects lazily.
    pub fn new(url: String) -> Self {
        Self {
            inner: Arc::new(AmqpInner {
                url,
                connection: RwLock::new(None),
                channel: RwLock::new(None),
            }),
        }
    }

    /// Ensure we have a valid connection and publish channel.
    async fn ensure_connected(&self) -> Result<Channel, QueueError> {
        {
            let channel = self.inner.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                if ch.status().connected() {
                    return Ok(ch.clone());
                }
            }
        }

        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        // Double-check after acquiring write lock
        if let Some(ch) = channel.as_ref() {
            if ch.status().connected() {
                return Ok(ch.clone());
            }
        }

        let conn = match connection.take() {
            Some(conn) if conn.status().connected() => conn,
            _ => {
                info!("rabbitmq_connecting");
                let conn = Connection::connect(&self.inner.url, ConnectionProperties::default())
                    .await
                    .map_err(|e| QueueError::Connection(e.into()))?;
                info!("rabbitmq_connected");
                conn
            }
        };

        let ch = conn
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.into()))?;

        ch.confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Connection(e.into()))?;

        *connection = Some(conn);
        *channel = Some(ch.clone());

        Ok(ch)
    }

    /// Open a channel dedicated to one receive session.
    async fn open_channel(&self) -> Result<Channel, QueueError> {
        self.ensure_connected().await?;

        let connection = self.inner.connection.read().await;
        let conn = connection.as_ref().ok_or_else(|| {
            QueueError::Connection("connection dropped while opening channel".into())
        })?;

        conn.create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.into()))
    }

    /// Declare a durable queue, creating it if absent (idempotent operation).
    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), QueueError> {
        let channel = self.ensure_connected().await?;

        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::transport(QueueOperation::Resolve, e))?;

        info!(queue = %queue_name, "rabbitmq_queue_declared");
        Ok(())
    }

    /// Look up an existing queue and return its message count.
    ///
    /// Runs on a throwaway channel because the broker closes the channel
    /// when the queue does not exist.
    async fn lookup(&self, queue_name: &str, operation: QueueOperation) -> Result<u32, QueueError> {
        let channel = self.open_channel().await?;

        let declared = channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match declared {
            Ok(queue) => {
                if let Err(e) = channel.close(200, "Lookup complete").await {
                    debug!(error = %e, "rabbitmq_lookup_channel_close_error");
                }
                Ok(queue.message_count())
            }
            Err(e) if is_not_found(&e) => Err(QueueError::NotFound(queue_name.to_string())),
            Err(e) => Err(QueueError::transport(operation, e)),
        }
    }

    /// Close the connection gracefully.
    pub async fn close(&self) {
        let mut connection = self.inner.connection.write().await;
        let mut channel = self.inner.channel.write().await;

        if let Some(ch) = channel.take() {
            if let Err(e) = ch.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_channel_close_error");
            }
        }

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close(200, "Normal shutdown").await {
                warn!(error = %e, "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_client_closed");
    }
}

#[async_trait]
impl QueueClient for AmqpQueue {
    async fn resolve_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError> {
        if queue_name.is_empty() {
            return Err(QueueError::NotFound(queue_name.to_string()));
        }
        self.lookup(queue_name, QueueOperation::Resolve).await?;
        Ok(QueueUrl::new(queue_name))
    }

    async fn send(&self, url: &QueueUrl, body: &str) -> Result<Receipt, QueueError> {
        let channel = self.ensure_connected().await?;
        let receipt = Receipt::generate();

        let confirmation = channel
            .basic_publish(
                "",
                url.as_str(),
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default()
                    .with_delivery_mode(2) // Persistent
                    .with_content_type("text/plain".into())
                    .with_message_id(receipt.message_id.clone().into()),
            )
            .await
            .map_err(|e| QueueError::transport(QueueOperation::Send, e))?
            .await
            .map_err(|e| QueueError::transport(QueueOperation::Send, e))?;

        if confirmation.is_nack() {
            return Err(QueueError::transport(
                QueueOperation::Send,
                "broker rejected the message",
            ));
        }

        Ok(receipt)
    }

    async fn approximate_count(&self, url: &QueueUrl) -> Result<u64, QueueError> {
        let count = self.lookup(url.as_str(), QueueOperation::Count).await?;
        Ok(u64::from(count))
    }

    async fn consumer(&self, url: &QueueUrl) -> Result<Box<dyn QueueConsumer>, QueueError> {
        let channel = self.open_channel().await?;
        debug!(queue = %url, channel_id = channel.id(), "rabbitmq_consumer_channel_opened");
        Ok(Box::new(AmqpConsumer {
            channel,
            queue: url.clone(),
        }))
    }
}

/// Whether the broker refused an operation because the queue is missing.
fn is_not_found(error: &lapin::Error) -> bool {
    match error {
        lapin::Error::ProtocolError(e) => {
            matches!(e.kind(), AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND))
        }
        _ => false,
    }
}

/// Receive session backed by a dedicated channel.
struct AmqpConsumer {
    channel: Channel,
    queue: QueueUrl,
}

impl AmqpConsumer {
    async fn get(&self) -> Result<Option<ReceivedMessage>, QueueError> {
        let message = self
            .channel
            .basic_get(self.queue.as_str(), BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| QueueError::transport(QueueOperation::Receive, e))?;

        Ok(message.map(|m| ReceivedMessage {
            message_id: m
                .delivery
                .properties
                .message_id()
                .as_ref()
                .map(|s| s.to_string()),
            body: String::from_utf8_lossy(&m.delivery.data).into_owned(),
        }))
    }
}

#[async_trait]
impl QueueConsumer for AmqpConsumer {
    async fn receive(
        &mut self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut batch = Vec::with_capacity(max_messages);

        // basic.get never blocks, so an empty queue gets one more look after the wait
        let first = match self.get().await? {
            Some(message) => message,
            None => {
                tokio::time::sleep(wait).await;
                match self.get().await? {
                    Some(message) => message,
                    None => return Ok(batch),
                }
            }
        };
        batch.push(first);

        while batch.len() < max_messages {
            match self.get().await? {
                Some(message) => batch.push(message),
                None => break,
            }
        }

        Ok(batch)
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        // Unacked deliveries are requeued by the broker
        self.channel
            .close(200, "Drain complete")
            .await
            .map_err(|e| QueueError::transport(QueueOperation::Close, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::AMQPError;

    #[test]
    fn test_client_creation() {
        let client = AmqpQueue::new("amqp://localhost:5672".to_string());
        // Connects lazily
        assert!(Arc::strong_count(&client.inner) == 1);
    }

    #[test]
    fn test_missing_queue_error_is_not_found() {
        let missing = lapin::Error::ProtocolError(AMQPError::new(
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND),
            "NOT_FOUND - no queue 'webhooks' in vhost '/'".into(),
        ));
        assert!(is_not_found(&missing));

        let refused = lapin::Error::ProtocolError(AMQPError::new(
            AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED),
            "ACCESS_REFUSED".into(),
        ));
        assert!(!is_not_found(&refused));
        assert!(!is_not_found(&lapin::Error::ChannelsLimitReached));
    }

    #[tokio::test]
    async fn test_resolve_empty_name_is_not_found() {
        let client = AmqpQueue::new("amqp://localhost:5672".to_string());
        let err = client.resolve_url("").await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }
}
