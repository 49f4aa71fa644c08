//! Web server module for handling inbound webhooks.
//!
//! This module provides a thin web server that:
//! - Verifies webhook signatures
//! - Relays verified payloads to the queue
//! - Drains the queue on demand for inspection

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    health, read_messages, webhook, webhook_head, AppState, HealthResponse, WebhookResponse,
};
pub use signature::{compute_signature, SignatureVerifier, SIGNATURE_HEADER, SIGNATURE_PREFIX};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", post(webhook).head(webhook_head))
        .route("/read_messages_in_queue", get(read_messages))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
