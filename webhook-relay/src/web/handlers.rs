//! HTTP endpoint handlers.
//!
//! The webhook handler only verifies, enqueues and returns. Consumers of
//! the queue do all further processing.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::queue::{QueueClient, QueueRelay};
use crate::web::signature::{SignatureVerifier, SIGNATURE_HEADER};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub verifier: Arc<SignatureVerifier>,
    pub relay: QueueRelay,
}

impl AppState {
    pub fn new(config: Config, client: Arc<dyn QueueClient>) -> Self {
        let verifier = SignatureVerifier::from_config(&config);
        let relay = QueueRelay::new(client, config.poll_wait(), config.queue_timeout());
        Self {
            config: Arc::new(config),
            verifier: Arc::new(verifier),
            relay,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<&'static str>,
}

/// Health check endpoint.
///
/// Reports which required settings are absent instead of failing start-up.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let missing = state.config.missing();

    if missing.is_empty() {
        return (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                missing,
            }),
        );
    }

    warn!(missing = ?missing, "health_config_missing");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthResponse {
            status: "misconfigured",
            missing,
        }),
    )
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook response.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl WebhookResponse {
    fn rejected(status: StatusCode, label: &'static str) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(WebhookResponse {
                status: label,
                message_id: None,
            }),
        )
    }
}

/// Webhook endpoint.
///
/// This endpoint:
/// 1. Verifies the HMAC signature over the raw body
/// 2. Re-serializes the JSON body and enqueues it
/// 3. Returns the queue receipt
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    info!(
        body_length = body.len(),
        has_signature = signature.is_some(),
        "webhook_received"
    );

    if !state.verifier.verify(&body, signature) {
        warn!(
            body_length = body.len(),
            signature_length = signature.map(str::len).unwrap_or(0),
            "webhook_signature_invalid"
        );
        return WebhookResponse::rejected(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    let message_body = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(value) => value.to_string(),
        Err(e) => {
            warn!(error = %e, "webhook_payload_invalid");
            return WebhookResponse::rejected(StatusCode::BAD_REQUEST, "invalid_payload");
        }
    };

    let Some(queue_name) = state.config.queue_name.as_deref() else {
        error!("webhook_queue_name_missing");
        return WebhookResponse::rejected(StatusCode::INTERNAL_SERVER_ERROR, "misconfigured");
    };

    match state.relay.send(queue_name, &message_body).await {
        Ok(receipt) => {
            info!(queue = %queue_name, message_id = %receipt.message_id, "webhook_enqueued");
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    status: "enqueued",
                    message_id: Some(receipt.message_id),
                }),
            )
        }
        Err(e) => {
            error!(queue = %queue_name, error = %e, "webhook_enqueue_failed");
            WebhookResponse::rejected(StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
    }
}

/// Liveness check for webhook senders.
pub async fn webhook_head() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// Queue Inspection
// =============================================================================

/// Drain the configured queue and return the bodies, one per line.
pub async fn read_messages(State(state): State<AppState>) -> impl IntoResponse {
    let text_plain = [(header::CONTENT_TYPE, "text/plain; charset=utf-8")];

    let Some(queue_name) = state.config.queue_name.as_deref() else {
        error!("read_queue_name_missing");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            text_plain,
            "Queue name not configured".to_string(),
        );
    };

    match state.relay.drain_all(queue_name).await {
        Ok(bodies) => {
            info!(queue = %queue_name, message_count = bodies.len(), "read_messages_complete");
            (StatusCode::OK, text_plain, bodies.join("\n"))
        }
        Err(e) => {
            error!(queue = %queue_name, error = %e, "read_messages_failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                text_plain,
                "Internal Server Error, please retry later.".to_string(),
            )
        }
    }
}
