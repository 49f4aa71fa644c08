//! Queue module for relaying webhook payloads.
//!
//! This module provides:
//! - The [`QueueClient`] seam with RabbitMQ and in-memory implementations
//! - [`QueueRelay`], the send / drain contract used by the web layer
//!
//! ## Architecture
//!
//! ```text
//! POST /webhook → QueueRelay::send → queue
//! GET /read_messages_in_queue → QueueRelay::drain_all ← queue
//! ```

pub mod amqp;
pub mod client;
pub mod memory;
pub mod relay;
pub mod types;

pub use amqp::AmqpQueue;
pub use client::{QueueClient, QueueConsumer};
pub use memory::MemoryQueue;
pub use relay::QueueRelay;
pub use types::{
    QueueError, QueueOperation, QueueUrl, Receipt, ReceivedMessage, MAX_BATCH_SIZE,
};
