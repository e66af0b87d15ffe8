//! Webhook endpoint handlers.
//!
//! These handlers are kept fast - they only:
//! 1. Verify the request signature against the current settings snapshot
//! 2. Enqueue the raw body on the intake queue
//! 3. Return immediately
//!
//! All command handling happens in the running controller.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::controller::{InboundCommand, IntakeError, IntakeQueue};
use crate::metrics::Metrics;
use crate::settings::Settings;
use crate::web::signature::{verify_request, VerificationError};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Augmented snapshot of the active controller
    pub settings: watch::Receiver<Arc<Settings>>,
    pub intake: IntakeQueue,
    pub metrics: Metrics,
    /// Freshness window for request timestamps
    pub signature_max_age: Duration,
}

impl AppState {
    pub fn new(
        settings: watch::Receiver<Arc<Settings>>,
        intake: IntakeQueue,
        metrics: Metrics,
        signature_max_age: Duration,
    ) -> Self {
        Self {
            settings,
            intake,
            metrics,
            signature_max_age,
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
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Channel Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// HTTP status for a rejected request.
fn rejection_status(err: &VerificationError) -> StatusCode {
    match err {
        VerificationError::ChannelNotConfigured(_) => StatusCode::NOT_FOUND,
        VerificationError::SigningSecretMissing(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::UNAUTHORIZED,
    }
}

/// Signed callback endpoint for a named channel.
///
/// This endpoint:
/// 1. Verifies the HMAC signature and timestamp
/// 2. Enqueues the raw body
/// 3. Returns 200 OK
pub async fn channel_webhook(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!(
        channel = %channel,
        body_length = body.len(),
        "webhook_received"
    );

    let settings = state.settings.borrow().clone();

    if let Err(e) = verify_request(
        settings.registry(),
        &channel,
        &body,
        &headers,
        SystemTime::now(),
        state.signature_max_age,
    ) {
        warn!(
            channel = %channel,
            reason = e.kind(),
            revision = %settings.revision(),
            "webhook_verification_failed"
        );
        // Unconfigured names come from the request path; keep them out of labels.
        let label = match &e {
            VerificationError::ChannelNotConfigured(_) => "unknown",
            _ => channel.as_str(),
        };
        state.metrics.record_webhook(label, e.kind());
        return (
            rejection_status(&e),
            Json(WebhookResponse {
                status: e.kind(),
                error: Some(e.to_string()),
            }),
        );
    }

    if let Err(e) = state
        .intake
        .submit(InboundCommand::new(channel.as_str(), body.to_vec()))
    {
        match e {
            IntakeError::Full => warn!(channel = %channel, "webhook_intake_full"),
            IntakeError::Closed => error!(channel = %channel, "webhook_intake_closed"),
        }
        state.metrics.record_webhook(&channel, "busy");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(WebhookResponse {
                status: "busy",
                error: Some(e.to_string()),
            }),
        );
    }

    state.metrics.record_webhook(&channel, "accepted");
    info!(channel = %channel, "webhook_enqueued");

    (
        StatusCode::OK,
        Json(WebhookResponse {
            status: "accepted",
            error: None,
        }),
    )
}
