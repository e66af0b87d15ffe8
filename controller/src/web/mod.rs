//! Web server module for inbound provider callbacks.
//!
//! This module provides a thin, fast web server that:
//! - Receives signed callbacks at `/webhooks/:channel`
//! - Verifies them against the active settings snapshot
//! - Immediately enqueues raw bodies for the controller
//!
//! The server is started once per process and keeps serving across
//! controller reloads.

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{channel_webhook, health, AppState, HealthResponse, WebhookResponse};
pub use signature::{verify_request, VerificationError, DEFAULT_MAX_AGE};

/// Build the webhook router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/:channel", post(channel_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
