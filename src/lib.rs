pub mod accounting;
pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod oauth;
pub mod store;
pub mod webhooks;

pub use config::Config;
pub use error::BridgeError;

use std::sync::Arc;

use accounting::AccountingClient;
use crypto::CryptoEngine;
use oauth::{OAuthProvider, SessionManager};
use store::RealmStore;
use webhooks::WebhookIngestor;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub sessions: SessionManager,
    pub ingestor: WebhookIngestor,
    pub accounting: AccountingClient,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire the OAuth sessions, webhook pipeline and API client onto one store.
    pub fn new(
        config: Config,
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn RealmStore>,
        crypto: Arc<CryptoEngine>,
    ) -> Result<Self, BridgeError> {
        let sessions = SessionManager::new(provider, store.clone(), crypto, config.redirect_uri.clone());
        let ingestor = WebhookIngestor::new(store);
        let accounting = AccountingClient::new(config.intuit_environment.api_base_url())?;

        Ok(Self {
            config,
            sessions,
            ingestor,
            accounting,
        })
    }
}
