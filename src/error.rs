use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Unified error type for the realm bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    // ── OAuth Errors ────────────────────────────────────────────────────
    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    #[error("Authorization code exchange failed: {0}")]
    AuthExchange(String),

    #[error("Token refresh failed: {0}")]
    Refresh(String),

    #[error("Invalid state parameter")]
    InvalidState,

    // ── Request Errors ──────────────────────────────────────────────────
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid webhook payload: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    // ── Storage ─────────────────────────────────────────────────────────
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("{0}")]
    Ingest(IngestFailures),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Accounting API error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BridgeError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        BridgeError::Persistence(e.to_string())
    }
}

/// A single entity of a webhook batch that could not be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    pub notification_index: usize,
    pub entity_index: usize,
    pub realm_id: String,
    pub entity_name: String,
    pub entity_id: String,
    pub reason: String,
}

/// Aggregate of per-entity failures from one ingested batch.
///
/// Entities that were recorded before or after a failure stay recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestFailures {
    pub recorded: usize,
    pub skipped: usize,
    pub failed: Vec<EntityFailure>,
}

impl fmt::Display for IngestFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} webhook entities failed to record",
            self.failed.len(),
            self.failed.len() + self.recorded
        )?;
        for failure in &self.failed {
            write!(
                f,
                "; #{}.{} realm={} {} {}: {}",
                failure.notification_index,
                failure.entity_index,
                failure.realm_id,
                failure.entity_name,
                failure.entity_id,
                failure.reason
            )?;
        }
        Ok(())
    }
}

impl BridgeError {
    /// Status code and plain-text body returned to HTTP callers.
    ///
    /// The body never carries the inner detail, which can hold upstream
    /// responses or token material.
    fn response_parts(&self) -> (StatusCode, &'static str) {
        match self {
            BridgeError::Configuration(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "OAuth client is not configured.",
            ),
            BridgeError::AuthExchange(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error handling the authorization callback.",
            ),
            BridgeError::Refresh(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Authorization expired. Authorize again via /auth.",
            ),
            BridgeError::InvalidState => {
                (StatusCode::BAD_REQUEST, "Invalid or expired state parameter.")
            }
            BridgeError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad request."),
            BridgeError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid webhook payload."),
            BridgeError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized."),
            BridgeError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Storage error.")
            }
            BridgeError::Ingest(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error processing webhook.",
            ),
            BridgeError::Crypto(_) | BridgeError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error.")
            }
            BridgeError::Upstream(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error calling the accounting API.",
            ),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let (status, body) = self.response_parts();
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::warn!("{self}");
        }
        (status, body).into_response()
    }
}
