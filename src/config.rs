use std::str::FromStr;

use anyhow::{Context, Result};

/// Which Intuit environment the bridge talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntuitEnvironment {
    Sandbox,
    Production,
}

impl IntuitEnvironment {
    /// Base URL of the QuickBooks Online accounting API.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            IntuitEnvironment::Sandbox => "https://sandbox-quickbooks.api.intuit.com",
            IntuitEnvironment::Production => "https://quickbooks.api.intuit.com",
        }
    }
}

impl FromStr for IntuitEnvironment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(IntuitEnvironment::Sandbox),
            "production" => Ok(IntuitEnvironment::Production),
            other => anyhow::bail!("unknown Intuit environment: {other}"),
        }
    }
}

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Public URL of this service; the callback URL is rebuilt from it.
    pub base_url: String,

    // ── Database ────────────────────────────────────────────────────────
    /// PostgreSQL connection string, or `memory` for the in-process store.
    pub database_url: String,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM token encryption.
    pub master_key: String,
    /// Base64-encoded HMAC key for state parameter signing.
    pub hmac_secret: String,

    // ── Intuit OAuth ────────────────────────────────────────────────────
    pub intuit_client_id: String,
    pub intuit_client_secret: String,
    pub intuit_environment: IntuitEnvironment,
    pub redirect_uri: String,
    /// Verifier token for the `intuit-signature` webhook header.
    pub webhook_verifier_token: Option<String>,

    // ── Internal endpoints ──────────────────────────────────────────────
    pub internal_api_secret: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".into())
                .parse()
                .context("Invalid PORT")?,
            redirect_uri: std::env::var("INTUIT_REDIRECT_URI")
                .unwrap_or_else(|_| format!("{base_url}/callback")),
            base_url,

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string or `memory`)")?,
            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: std::env::var("HMAC_SECRET")
                .context("HMAC_SECRET is required (base64)")?,

            intuit_client_id: std::env::var("INTUIT_CLIENT_ID")
                .context("INTUIT_CLIENT_ID is required")?,
            intuit_client_secret: std::env::var("INTUIT_CLIENT_SECRET")
                .context("INTUIT_CLIENT_SECRET is required")?,
            intuit_environment: std::env::var("INTUIT_ENVIRONMENT")
                .unwrap_or_else(|_| "sandbox".into())
                .parse()
                .context("Invalid INTUIT_ENVIRONMENT (sandbox or production)")?,
            webhook_verifier_token: non_empty_var("INTUIT_WEBHOOK_VERIFIER_TOKEN"),

            internal_api_secret: non_empty_var("INTERNAL_API_SECRET"),
        })
    }

    /// Rebuild the full URL of an inbound request from its path and query.
    pub fn request_url(&self, path_and_query: &str) -> String {
        format!("{}{}", self.base_url, path_and_query)
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
