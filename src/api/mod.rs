//! HTTP boundary for the realm bridge.
//!
//! - /: welcome text
//! - /status: health check
//! - /auth: redirect into the OAuth flow
//! - /callback: OAuth callback, stores the realm's tokens
//! - /webhook: Intuit change notifications
//! - /realms/{realm_id}/invoices/{invoice_id}: internal authorized read

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    routes::app_router(state).layer(TraceLayer::new_for_http())
}
