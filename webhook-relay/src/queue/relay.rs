//! Relay between the web layer and the queue service.
//!
//! Every queue call is bounded by a timeout and every failure surfaces as
//! a [`QueueError`]. Nothing is retried here.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::client::{QueueClient, QueueConsumer};
use super::types::{QueueError, QueueOperation, Receipt, MAX_BATCH_SIZE};

/// Sends webhook bodies to a queue and drains queues for inspection.
#[derive(Clone)]
pub struct QueueRelay {
    client: Arc<dyn QueueClient>,
    poll_wait: Duration,
    call_timeout: Duration,
}

impl QueueRelay {
    pub fn new(
        client: Arc<dyn QueueClient>,
        poll_wait: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            poll_wait,
            call_timeout,
        }
    }

    /// Submit `body` as a single message to the named queue.
    pub async fn send(&self, queue_name: &str, body: &str) -> Result<Receipt, QueueError> {
        let url = self
            .bounded(
                QueueOperation::Resolve,
                self.call_timeout,
                self.client.resolve_url(queue_name),
            )
            .await?;

        let receipt = self
            .bounded(QueueOperation::Send, self.call_timeout, self.client.send(&url, body))
            .await?;

        info!(
            queue = %queue_name,
            message_id = %receipt.message_id,
            body_length = body.len(),
            "queue_message_sent"
        );

        Ok(receipt)
    }

    /// Poll the named queue until a poll comes back empty and return the
    /// bodies seen, in receipt order.
    ///
    /// Messages are not acknowledged. They become visible to other
    /// consumers again once their visibility window lapses, so a later
    /// drain can return them a second time. Messages arriving while the
    /// drain runs may or may not be included.
    pub async fn drain_all(&self, queue_name: &str) -> Result<Vec<String>, QueueError> {
        let url = self
            .bounded(
                QueueOperation::Resolve,
                self.call_timeout,
                self.client.resolve_url(queue_name),
            )
            .await?;

        // Advisory only, never used to stop the loop
        match self
            .timed(
                QueueOperation::Count,
                self.call_timeout,
                self.client.approximate_count(&url),
            )
            .await
        {
            Ok(count) => {
                info!(queue = %queue_name, approximate_count = count, "queue_drain_started")
            }
            Err(e) => warn!(queue = %queue_name, error = %e, "queue_count_unavailable"),
        }

        let mut consumer = self
            .bounded(QueueOperation::Receive, self.call_timeout, self.client.consumer(&url))
            .await?;

        let drained = self.poll_until_empty(consumer.as_mut(), queue_name).await;

        if let Err(e) = self
            .bounded(QueueOperation::Close, self.call_timeout, consumer.close())
            .await
        {
            warn!(queue = %queue_name, error = %e, "queue_consumer_close_failed");
        }

        let bodies = drained?;
        if bodies.is_empty() {
            info!(queue = %queue_name, "queue_drain_empty");
        } else {
            info!(queue = %queue_name, message_count = bodies.len(), "queue_drain_complete");
        }

        Ok(bodies)
    }

    async fn poll_until_empty(
        &self,
        consumer: &mut dyn QueueConsumer,
        queue_name: &str,
    ) -> Result<Vec<String>, QueueError> {
        let mut bodies = Vec::new();
        // A poll may legitimately take the full wait before returning
        let receive_timeout = self.call_timeout + self.poll_wait;

        loop {
            let batch = self
                .bounded(
                    QueueOperation::Receive,
                    receive_timeout,
                    consumer.receive(MAX_BATCH_SIZE, self.poll_wait),
                )
                .await?;

            if batch.is_empty() {
                return Ok(bodies);
            }

            info!(queue = %queue_name, batch_size = batch.len(), "queue_batch_received");
            bodies.extend(batch.into_iter().map(|m| m.body));
        }
    }

    /// Run a queue call under `limit`, logging any failure.
    async fn bounded<T>(
        &self,
        operation: QueueOperation,
        limit: Duration,
        call: impl Future<Output = Result<T, QueueError>>,
    ) -> Result<T, QueueError> {
        let result = self.timed(operation, limit, call).await;

        if let Err(e) = &result {
            error!(operation = %operation, error = %e, "queue_call_failed");
        }

        result
    }

    async fn timed<T>(
        &self,
        operation: QueueOperation,
        limit: Duration,
        call: impl Future<Output = Result<T, QueueError>>,
    ) -> Result<T, QueueError> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Timeout {
                operation,
                after: limit,
            }),
        }
    }
}
