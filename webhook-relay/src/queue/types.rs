//! Queue message and error types shared by every queue backend.

use std::fmt;
use std::time::Duration;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of messages requested per poll.
pub const MAX_BATCH_SIZE: usize = 10;

/// Boxed transport error from a queue backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Resolved address of a queue.
///
/// Produced by [`QueueClient::resolve_url`](super::QueueClient::resolve_url)
/// and only meaningful to the client that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueUrl(String);

impl QueueUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier the queue assigned to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
}

impl Receipt {
    /// Create a receipt with a fresh random 128-bit hex id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            message_id: hex::encode(bytes),
        }
    }
}

/// A message handed out by a receive call.
///
/// The body is opaque text. Receiving does not acknowledge the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: Option<String>,
    pub body: String,
}

/// Queue service call, used to label errors and log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    Resolve,
    Send,
    Receive,
    Count,
    Close,
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueOperation::Resolve => "resolve",
            QueueOperation::Send => "send",
            QueueOperation::Receive => "receive",
            QueueOperation::Count => "count",
            QueueOperation::Close => "close",
        };
        f.write_str(name)
    }
}

/// Failure talking to the queue service.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue not found: {0}")]
    NotFound(String),

    #[error("failed to connect to queue service: {0}")]
    Connection(#[source] BoxError),

    #[error("queue {operation} failed: {source}")]
    Transport {
        operation: QueueOperation,
        #[source]
        source: BoxError,
    },

    #[error("queue {operation} timed out after {after:?}")]
    Timeout {
        operation: QueueOperation,
        after: Duration,
    },
}

impl QueueError {
    pub fn transport(operation: QueueOperation, source: impl Into<BoxError>) -> Self {
        QueueError::Transport {
            operation,
            source: source.into(),
        }
    }
}
