//! Minimal QuickBooks Online accounting API client.
//!
//! Only reads a single invoice; it exists to exercise an authorized call that
//! refreshes the realm's access token on demand.

use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::error::BridgeError;
use crate::oauth::SessionManager;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AccountingClient {
    api_base: Url,
    http: reqwest::Client,
}

impl AccountingClient {
    pub fn new(api_base: &str) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Configuration(format!("HTTP client init failed: {e}")))?;

        let api_base = Url::parse(api_base)
            .map_err(|e| BridgeError::Configuration(format!("Invalid accounting API base URL: {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(BridgeError::Configuration(format!("Accounting API URL {api_base} cannot be a base")));
        }

        Ok(Self { api_base, http })
    }

    /// Fetch one invoice of the realm, returning the `Invoice` object.
    pub async fn get_invoice(
        &self,
        sessions: &SessionManager,
        realm_id: &str,
        invoice_id: &str,
    ) -> Result<Value, BridgeError> {
        let access_token = sessions.ensure_valid_token(realm_id).await?;

        let url = self.invoice_url(realm_id, invoice_id)?;

        let resp = self
            .http
            .get(url)
            .bearer_auth(&access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| BridgeError::Upstream(format!("invoice request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BridgeError::Upstream(format!(
                "invoice {invoice_id} for realm {realm_id} returned {status}: {body}"
            )));
        }

        let mut body: Value = resp
            .json()
            .await
            .map_err(|e| BridgeError::Upstream(format!("Failed to parse invoice response: {e}")))?;

        match body.get_mut("Invoice") {
            Some(invoice) => Ok(invoice.take()),
            None => Err(BridgeError::Upstream("response has no Invoice object".into())),
        }
    }

    /// `{api_base}/v3/company/{realm_id}/invoice/{invoice_id}`, each id one path segment.
    fn invoice_url(&self, realm_id: &str, invoice_id: &str) -> Result<Url, BridgeError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| BridgeError::Configuration(format!("Accounting API URL {} cannot be a base", self.api_base)))?
            .pop_if_empty()
            .extend(["v3", "company", realm_id, "invoice", invoice_id]);
        Ok(url)
    }
}
