use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use realm_bridge::config::Config;
use realm_bridge::crypto::CryptoEngine;
use realm_bridge::oauth::IntuitProvider;
use realm_bridge::store::{MemoryRealmStore, PgRealmStore, RealmStore};
use realm_bridge::{api, AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realm_bridge=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("realm-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    // Initialize components
    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.hmac_secret)?);

    let store: Arc<dyn RealmStore> = if config.uses_memory_store() {
        warn!("DATABASE_URL=memory: tokens and change events are lost on restart");
        Arc::new(MemoryRealmStore::new())
    } else {
        let store = PgRealmStore::new(&config.database_url, crypto.clone()).await?;
        store.bootstrap().await?;
        info!("Database connected and bootstrapped ✓");
        Arc::new(store)
    };

    let provider = Arc::new(IntuitProvider::new(
        &config.intuit_client_id,
        &config.intuit_client_secret,
    )?);
    info!(
        "Intuit OAuth ready ({:?}, redirect {})",
        config.intuit_environment, config.redirect_uri
    );

    if config.webhook_verifier_token.is_none() {
        warn!("INTUIT_WEBHOOK_VERIFIER_TOKEN not set; webhook signatures are not checked");
    }

    // Build shared state
    let addr = format!("{}:{}", config.host, config.port);
    let state: SharedState = Arc::new(AppState::new(config, provider, store, crypto)?);

    // Build router
    let app = api::router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
