/// Intuit Webhook Handler
///
/// Receives QuickBooks Online change notifications, optionally verifies the
/// `intuit-signature` header, and hands the batch to the ingestion pipeline.
///
/// Signature verification: the header is base64(HMAC-SHA256(raw_body, verifier_token)).
/// It is only enforced when INTUIT_WEBHOOK_VERIFIER_TOKEN is configured.
use axum::{extract::State, http::HeaderMap, http::StatusCode};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::BridgeError;
use crate::store::Operation;
use crate::SharedState;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "intuit-signature";

const NO_NOTIFICATIONS: &str = "No notifications.";
const PROCESSED: &str = "Notifications processed.";

// =============================================================================
// Intuit Event Shapes
// =============================================================================

/// Body of a webhook delivery.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationBatch {
    #[serde(default)]
    pub event_notifications: Option<Vec<EventNotification>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNotification {
    pub realm_id: String,
    #[serde(default)]
    pub data_change_event: Option<DataChangeEvent>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DataChangeEvent {
    #[serde(default)]
    pub entities: Option<Vec<ChangedEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedEntity {
    /// Entity type, e.g. `Invoice`.
    pub name: String,
    pub operation: Operation,
    pub id: String,
    #[serde(default)]
    pub last_updated: Option<String>,
    /// Set on `Merge`: the id that was merged away.
    #[serde(default)]
    pub deleted_id: Option<String>,
}

impl NotificationBatch {
    pub fn notifications(&self) -> &[EventNotification] {
        self.event_notifications.as_deref().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications().is_empty()
    }
}

impl EventNotification {
    pub fn entities(&self) -> &[ChangedEntity] {
        self.data_change_event
            .as_ref()
            .and_then(|e| e.entities.as_deref())
            .unwrap_or_default()
    }
}

/// Parse a raw delivery. An empty body is an empty batch.
pub fn parse_batch(raw_body: &[u8]) -> Result<NotificationBatch, BridgeError> {
    if raw_body.iter().all(u8::is_ascii_whitespace) {
        return Ok(NotificationBatch::default());
    }
    serde_json::from_slice(raw_body).map_err(|e| BridgeError::Validation(e.to_string()))
}

// =============================================================================
// Signature Verification
// =============================================================================

/// Check `intuit-signature` against the raw body. The MAC comparison is constant-time.
pub fn verify_signature(raw_body: &[u8], signature_header: &str, verifier_token: &str) -> Result<(), BridgeError> {
    let signature = base64::engine::general_purpose::STANDARD
        .decode(signature_header.trim())
        .map_err(|_| BridgeError::Unauthorized)?;

    let mut mac = HmacSha256::new_from_slice(verifier_token.as_bytes())
        .map_err(|_| BridgeError::Internal("HMAC key error".into()))?;
    mac.update(raw_body);
    mac.verify_slice(&signature).map_err(|_| BridgeError::Unauthorized)
}

// =============================================================================
// Main Handler
// =============================================================================

/// POST /webhook
pub async fn intuit_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, &'static str), BridgeError> {
    if let Some(verifier) = &state.config.webhook_verifier_token {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(BridgeError::Unauthorized)?;
        verify_signature(&body, signature, verifier)?;
    }

    // Malformed payloads are acknowledged so the sender does not retry them forever.
    let batch = match parse_batch(&body) {
        Ok(batch) => batch,
        Err(e) => {
            tracing::warn!("[Webhook:Intuit] {e}; acknowledging without processing");
            return Ok((StatusCode::OK, NO_NOTIFICATIONS));
        }
    };

    if batch.is_empty() {
        return Ok((StatusCode::OK, NO_NOTIFICATIONS));
    }

    let report = state.ingestor.ingest(&batch).await?;
    tracing::info!(
        "[Webhook:Intuit] recorded={} skipped={}",
        report.recorded,
        report.skipped
    );

    Ok((StatusCode::OK, PROCESSED))
}
