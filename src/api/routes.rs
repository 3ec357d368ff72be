//! Route handlers for the realm bridge.
//!
//! All handlers receive `SharedState` via Axum state extraction and return
//! plain-text bodies, except `/status` and the invoice read.

use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::error::BridgeError;
use crate::webhooks::intuit as intuit_webhooks;
use crate::SharedState;

// =============================================================================
// Router
// =============================================================================

pub fn app_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/", get(index))
        .route("/status", get(status))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/auth", get(auth_start))
        .route("/callback", get(auth_callback))
        // ── Webhooks ─────────────────────────────────────────────────────
        .route("/webhook", post(intuit_webhooks::intuit_webhook))
        // ── Accounting ───────────────────────────────────────────────────
        .route("/realms/{realm_id}/invoices/{invoice_id}", get(realm_invoice))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn index() -> &'static str {
    "Welcome. Use /auth to authorize a company."
}

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "realm-bridge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

/// GET /auth: Redirect to the Intuit authorization page.
async fn auth_start(State(state): State<SharedState>) -> Result<Redirect, BridgeError> {
    let uri = state.sessions.authorization_uri()?;
    Ok(Redirect::temporary(&uri))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

/// GET /callback: Exchange the authorization code and store the realm's tokens.
///
/// The exchange gets the full request URL, rebuilt from BASE_URL.
async fn auth_callback(
    State(state): State<SharedState>,
    OriginalUri(uri): OriginalUri,
    Query(q): Query<CallbackQuery>,
) -> Result<&'static str, BridgeError> {
    if q.code.as_deref().map_or(true, str::is_empty) {
        return Err(BridgeError::BadRequest("authorization code not provided".into()));
    }

    let path_and_query = uri.path_and_query().map_or("/callback", |pq| pq.as_str());
    let callback_url = state.config.request_url(path_and_query);

    state.sessions.exchange_code(&callback_url).await?;

    Ok("Authentication successful. You can close this window.")
}

// =============================================================================
// Accounting Endpoints
// =============================================================================

/// GET /realms/{realm_id}/invoices/{invoice_id}: Read one invoice with the realm's token.
///
/// Internal only: requires `x-internal-secret` to match INTERNAL_API_SECRET.
async fn realm_invoice(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path((realm_id, invoice_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, BridgeError> {
    let expected = state
        .config
        .internal_api_secret
        .as_deref()
        .ok_or(BridgeError::Unauthorized)?;

    let internal = headers
        .get("x-internal-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(BridgeError::Unauthorized)?;

    if internal != expected {
        return Err(BridgeError::Unauthorized);
    }

    let invoice = state
        .accounting
        .get_invoice(&state.sessions, &realm_id, &invoice_id)
        .await?;

    Ok(Json(json!({ "data": invoice })))
}
