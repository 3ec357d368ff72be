use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use super::traits::{OAuthProvider, TokenSet};
use crate::error::BridgeError;

/// Accounting data access scope.
pub const ACCOUNTING_SCOPE: &str = "com.intuit.quickbooks.accounting";
/// OpenID identity scope.
pub const OPENID_SCOPE: &str = "openid";

const AUTHORIZE_URL: &str = "https://appcenter.intuit.com/connect/oauth2";
const TOKEN_URL: &str = "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Intuit (QuickBooks Online) OAuth 2.0 provider.
///
/// Token endpoint takes form-encoded grants with HTTP Basic client credentials.
/// Access tokens live 1 hour; refresh tokens about 100 days and may rotate on
/// every refresh.
pub struct IntuitProvider {
    client_id: String,
    client_secret: String,
    authorize_url: String,
    token_url: String,
    http: reqwest::Client,
}

// Raw token response from Intuit's bearer endpoint
#[derive(Debug, Deserialize)]
struct IntuitTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_in: Option<u64>,
    x_refresh_token_expires_in: Option<u64>,
}

impl From<IntuitTokenResponse> for TokenSet {
    fn from(resp: IntuitTokenResponse) -> Self {
        TokenSet {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            token_type: resp.token_type,
            expires_in: resp.expires_in,
            refresh_token_expires_in: resp.x_refresh_token_expires_in,
        }
    }
}

impl IntuitProvider {
    pub fn new(client_id: &str, client_secret: &str) -> Result<Self, BridgeError> {
        if !is_credential(client_id) {
            return Err(BridgeError::Configuration("Intuit client id is missing or malformed".into()));
        }
        if !is_credential(client_secret) {
            return Err(BridgeError::Configuration(
                "Intuit client secret is missing or malformed".into(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Configuration(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            http,
        })
    }

    /// Point the provider at different authorization and token endpoints.
    pub fn with_endpoints(mut self, authorize_url: &str, token_url: &str) -> Self {
        self.authorize_url = authorize_url.to_string();
        self.token_url = token_url.to_string();
        self
    }

    async fn post_grant(&self, form: &[(&str, &str)]) -> Result<IntuitTokenResponse, String> {
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| format!("token request failed: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(format!("Intuit token endpoint returned {status}: {body}"));
        }

        resp.json()
            .await
            .map_err(|e| format!("Failed to parse token response: {e}"))
    }
}

#[async_trait]
impl OAuthProvider for IntuitProvider {
    fn id(&self) -> &str {
        "intuit"
    }

    fn scopes(&self) -> Vec<String> {
        vec![ACCOUNTING_SCOPE.into(), OPENID_SCOPE.into()]
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> Result<String, BridgeError> {
        let mut url = Url::parse(&self.authorize_url)
            .map_err(|e| BridgeError::Configuration(format!("Invalid authorize URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("scope", &scopes.join(" "))
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state);

        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, BridgeError> {
        let resp = self
            .post_grant(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .await
            .map_err(BridgeError::AuthExchange)?;

        Ok(resp.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, BridgeError> {
        let resp = self
            .post_grant(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
            .map_err(BridgeError::Refresh)?;

        Ok(resp.into())
    }
}

fn is_credential(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use base64::Engine as _;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider_for(server: &MockServer) -> IntuitProvider {
        IntuitProvider::new("client-abc", "secret-xyz")
            .unwrap()
            .with_endpoints(
                &format!("{}/connect/oauth2", server.uri()),
                &format!("{}/oauth2/v1/tokens/bearer", server.uri()),
            )
    }

    fn basic_auth() -> String {
        let creds = base64::engine::general_purpose::STANDARD.encode("client-abc:secret-xyz");
        format!("Basic {creds}")
    }

    #[test]
    fn test_missing_credentials_are_configuration_errors() {
        assert!(matches!(IntuitProvider::new("", "secret"), Err(BridgeError::Configuration(_))));
        assert!(matches!(
            IntuitProvider::new("client", "has space"),
            Err(BridgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_auth_url_carries_scopes_and_state() {
        let provider = IntuitProvider::new("client-abc", "secret-xyz").unwrap();
        let url = provider
            .auth_url(&provider.scopes(), "signed-state", "http://localhost:3000/callback")
            .unwrap();

        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("appcenter.intuit.com"));
        let params: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-abc");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "com.intuit.quickbooks.accounting openid");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/callback");
        assert_eq!(params["state"], "signed-state");
    }

    #[tokio::test]
    async fn test_exchange_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/tokens/bearer"))
            .and(header("authorization", basic_auth().as_str()))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=AB-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "bearer",
                "access_token": "AT1",
                "refresh_token": "RT1",
                "expires_in": 3600,
                "x_refresh_token_expires_in": 8726400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = provider_for(&server)
            .exchange_code("AB-code", "http://localhost:3000/callback")
            .await
            .unwrap();

        assert_eq!(tokens.access_token, "AT1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT1"));
        assert_eq!(tokens.expires_in, Some(3600));
        assert_eq!(tokens.refresh_token_expires_in, Some(8726400));
    }

    #[tokio::test]
    async fn test_consumed_code_is_exchange_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/tokens/bearer"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .exchange_code("used-code", "http://localhost:3000/callback")
            .await
            .unwrap_err();

        match err {
            BridgeError::AuthExchange(msg) => assert!(msg.contains("invalid_grant")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/tokens/bearer"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=RT1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "bearer",
                "access_token": "AT2",
                "refresh_token": "RT2",
                "expires_in": 3600,
                "x_refresh_token_expires_in": 8726400
            })))
            .mount(&server)
            .await;

        let tokens = provider_for(&server).refresh_token("RT1").await.unwrap();
        assert_eq!(tokens.access_token, "AT2");
        assert_eq!(tokens.refresh_token.as_deref(), Some("RT2"));
    }

    #[tokio::test]
    async fn test_revoked_refresh_token_is_refresh_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/v1/tokens/bearer"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({ "error": "invalid_grant" })),
            )
            .mount(&server)
            .await;

        let err = provider_for(&server).refresh_token("RT-revoked").await.unwrap_err();
        assert!(matches!(err, BridgeError::Refresh(_)));
    }
}
