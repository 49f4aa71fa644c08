//! Transport seam between the relay and a concrete queue service.

use std::time::Duration;

use async_trait::async_trait;

use super::types::{QueueError, QueueUrl, Receipt, ReceivedMessage};

/// Poll-based message queue capability.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Look up the address of a queue by name.
    async fn resolve_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError>;

    /// Submit one message.
    async fn send(&self, url: &QueueUrl, body: &str) -> Result<Receipt, QueueError>;

    /// Advisory number of visible messages. Eventually consistent.
    async fn approximate_count(&self, url: &QueueUrl) -> Result<u64, QueueError>;

    /// Open a receive session on a queue.
    async fn consumer(&self, url: &QueueUrl) -> Result<Box<dyn QueueConsumer>, QueueError>;
}

/// Receive session opened by [`QueueClient::consumer`].
///
/// Messages received through a session are never acknowledged. They stay
/// hidden from other consumers until their visibility window lapses and
/// are then delivered again.
#[async_trait]
pub trait QueueConsumer: Send {
    /// Receive up to `max_messages`, waiting up to `wait` when none are visible.
    ///
    /// An empty batch means nothing was visible within the wait.
    async fn receive(
        &mut self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// End the session.
    async fn close(&mut self) -> Result<(), QueueError>;
}
