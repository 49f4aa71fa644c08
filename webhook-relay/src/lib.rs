//! Webhook relay - signed webhook ingestion onto a durable queue.
//!
//! This library provides the shared modules for the two binaries:
//! - `webhook-relay`: Web server that verifies and enqueues webhooks
//! - `webhook-relay-drain`: Operator tool that drains the queue to stdout
//!
//! ## Architecture
//!
//! ```text
//! Webhooks → SignatureVerifier → QueueRelay → RabbitMQ queue → consumers
//! ```

pub mod config;
pub mod queue;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use queue::{AmqpQueue, MemoryQueue, QueueClient, QueueError, QueueRelay, Receipt};
pub use web::{router, AppState, SignatureVerifier};
