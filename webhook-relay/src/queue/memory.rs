//! In-process queue client.
//!
//! Models a poll-based queue with a visibility timeout: received messages
//! are hidden until the timeout lapses and then become visible again.
//! Messages are never removed. Used to exercise the relay without a broker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::client::{QueueClient, QueueConsumer};
use super::types::{QueueError, QueueOperation, QueueUrl, Receipt, ReceivedMessage};

/// Default visibility timeout, matching common queue services.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

struct StoredMessage {
    message_id: String,
    body: String,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |until| until <= now)
    }
}

#[derive(Default)]
struct MemoryState {
    queues: HashMap<String, Vec<StoredMessage>>,
    unavailable: bool,
}

/// In-memory [`QueueClient`]. Clones share the same queues.
#[derive(Clone)]
pub struct MemoryQueue {
    state: Arc<Mutex<MemoryState>>,
    visibility_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_visibility_timeout(DEFAULT_VISIBILITY_TIMEOUT)
    }

    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            visibility_timeout,
        }
    }

    /// Create an empty queue. Existing queues are left untouched.
    pub fn create_queue(&self, queue_name: &str) -> &Self {
        self.lock()
            .queues
            .entry(queue_name.to_string())
            .or_default();
        self
    }

    /// Make every call fail with a transport error until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Bodies of every stored message, visible or not, in send order.
    pub fn bodies(&self, queue_name: &str) -> Vec<String> {
        self.lock()
            .queues
            .get(queue_name)
            .map(|messages| messages.iter().map(|m| m.body.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // State stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(
        &self,
        operation: QueueOperation,
    ) -> Result<MutexGuard<'_, MemoryState>, QueueError> {
        let state = self.lock();
        if state.unavailable {
            return Err(QueueError::transport(operation, "queue service unavailable"));
        }
        Ok(state)
    }

    fn take_visible(
        &self,
        url: &QueueUrl,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut state = self.check_available(QueueOperation::Receive)?;
        let messages = state
            .queues
            .get_mut(url.as_str())
            .ok_or_else(|| QueueError::NotFound(url.to_string()))?;

        let now = Instant::now();
        let invisible_until = now + self.visibility_timeout;

        Ok(messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(max_messages)
            .map(|m| {
                m.invisible_until = Some(invisible_until);
                ReceivedMessage {
                    message_id: Some(m.message_id.clone()),
                    body: m.body.clone(),
                }
            })
            .collect())
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn resolve_url(&self, queue_name: &str) -> Result<QueueUrl, QueueError> {
        let state = self.check_available(QueueOperation::Resolve)?;
        if !state.queues.contains_key(queue_name) {
            return Err(QueueError::NotFound(queue_name.to_string()));
        }
        Ok(QueueUrl::new(queue_name))
    }

    async fn send(&self, url: &QueueUrl, body: &str) -> Result<Receipt, QueueError> {
        let mut state = self.check_available(QueueOperation::Send)?;
        let messages = state
            .queues
            .get_mut(url.as_str())
            .ok_or_else(|| QueueError::NotFound(url.to_string()))?;

        let receipt = Receipt::generate();
        messages.push(StoredMessage {
            message_id: receipt.message_id.clone(),
            body: body.to_string(),
            invisible_until: None,
        });
        Ok(receipt)
    }

    async fn approximate_count(&self, url: &QueueUrl) -> Result<u64, QueueError> {
        let state = self.check_available(QueueOperation::Count)?;
        let messages = state
            .queues
            .get(url.as_str())
            .ok_or_else(|| QueueError::NotFound(url.to_string()))?;

        let now = Instant::now();
        Ok(messages.iter().filter(|m| m.is_visible(now)).count() as u64)
    }

    async fn consumer(&self, url: &QueueUrl) -> Result<Box<dyn QueueConsumer>, QueueError> {
        drop(self.check_available(QueueOperation::Receive)?);
        Ok(Box::new(MemoryConsumer {
            queue: self.clone(),
            url: url.clone(),
        }))
    }
}

struct MemoryConsumer {
    queue: MemoryQueue,
    url: QueueUrl,
}

#[async_trait]
impl QueueConsumer for MemoryConsumer {
    async fn receive(
        &mut self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let batch = self.queue.take_visible(&self.url, max_messages)?;
        if !batch.is_empty() || wait.is_zero() {
            return Ok(batch);
        }

        tokio::time::sleep(wait).await;
        self.queue.take_visible(&self.url, max_messages)
    }

    async fn close(&mut self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn queue_with(bodies: &[&str]) -> (MemoryQueue, QueueUrl) {
        let queue = MemoryQueue::new();
        queue.create_queue("events");
        let url = queue.resolve_url("events").await.unwrap();
        for body in bodies {
            queue.send(&url, body).await.unwrap();
        }
        (queue, url)
    }

    #[tokio::test]
    async fn test_resolve_unknown_queue() {
        let queue = MemoryQueue::new();
        let err = queue.resolve_url("missing").await.unwrap_err();
        assert!(matches!(err, QueueError::NotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_receive_respects_batch_size_and_order() {
        let (queue, url) = queue_with(&["1", "2", "3"]).await;
        let mut consumer = queue.consumer(&url).await.unwrap();

        let first = consumer.receive(2, Duration::ZERO).await.unwrap();
        let bodies: Vec<_> = first.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["1", "2"]);

        let second = consumer.receive(2, Duration::ZERO).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, "3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_received_messages_reappear_after_visibility_timeout() {
        let (queue, url) = queue_with(&["hello"]).await;
        let mut consumer = queue.consumer(&url).await.unwrap();

        assert_eq!(consumer.receive(10, Duration::ZERO).await.unwrap().len(), 1);
        assert!(consumer.receive(10, Duration::ZERO).await.unwrap().is_empty());
        assert_eq!(queue.approximate_count(&url).await.unwrap(), 0);

        tokio::time::advance(DEFAULT_VISIBILITY_TIMEOUT).await;

        assert_eq!(queue.approximate_count(&url).await.unwrap(), 1);
        let again = consumer.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(again[0].body, "hello");
        assert_eq!(queue.bodies("events"), vec!["hello".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_waits_for_late_message() {
        let (queue, url) = queue_with(&[]).await;
        let mut consumer = queue.consumer(&url).await.unwrap();

        let sender = queue.clone();
        let send_url = url.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            sender.send(&send_url, "late").await.unwrap();
        });

        let batch = consumer.receive(10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test]
    async fn test_unavailable_queue_fails_every_call() {
        let (queue, url) = queue_with(&[]).await;
        queue.set_available(false);

        assert!(matches!(
            queue.send(&url, "x").await,
            Err(QueueError::Transport { operation: QueueOperation::Send, .. })
        ));
        assert!(queue.resolve_url("events").await.is_err());
        assert!(queue.consumer(&url).await.is_err());

        queue.set_available(true);
        assert!(queue.send(&url, "x").await.is_ok());
    }
}
