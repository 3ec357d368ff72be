use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Tokens returned by the authorization server after a code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token_expires_in: Option<u64>,
}

/// An OAuth2 authorization-code provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Unique provider identifier (e.g., "intuit").
    fn id(&self) -> &str;

    /// Scopes requested on every authorization.
    fn scopes(&self) -> Vec<String>;

    /// Build the authorization URL the user is redirected to. No network access.
    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> Result<String, BridgeError>;

    /// Exchange an authorization code for a token set.
    ///
    /// Errors are `BridgeError::AuthExchange`.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, BridgeError>;

    /// Trade a refresh token for a new token set.
    ///
    /// Errors are `BridgeError::Refresh`.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, BridgeError>;
}
