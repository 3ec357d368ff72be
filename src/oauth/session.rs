use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use url::Url;

use super::token::issue_record;
use super::traits::OAuthProvider;
use crate::crypto::CryptoEngine;
use crate::error::BridgeError;
use crate::store::{RealmStore, StoredToken, TokenRecord};

/// Lifecycle position of a realm's OAuth session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never authorized, or the refresh token stopped working.
    Unauthenticated,
    /// Holding an access token inside its validity window.
    Authenticated,
    /// Access token expired; a refresh is needed before the next API call.
    Stale,
}

enum SessionEntry {
    Active(StoredToken),
    /// Refresh failed; only a new authorization brings the realm back.
    Revoked,
}

/// Keeps one token lifecycle per realm on top of a shared OAuth provider.
///
/// The store is the source of truth; the in-memory map only caches the current
/// record per realm and remembers realms whose refresh was rejected. Cached
/// records are ordered by store insertion id, so the cache always agrees with
/// `RealmStore::latest_token` on which record is current.
pub struct SessionManager {
    provider: Arc<dyn OAuthProvider>,
    store: Arc<dyn RealmStore>,
    crypto: Arc<CryptoEngine>,
    redirect_uri: String,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn RealmStore>,
        crypto: Arc<CryptoEngine>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            store,
            crypto,
            redirect_uri: redirect_uri.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Build the URL that starts the authorization-code flow, carrying a fresh signed state.
    pub fn authorization_uri(&self) -> Result<String, BridgeError> {
        let state = self.crypto.issue_state(Utc::now())?;
        self.provider
            .auth_url(&self.provider.scopes(), &state, &self.redirect_uri)
    }

    /// Complete the flow from the full callback URL and persist the issued tokens.
    pub async fn exchange_code(&self, callback_url: &str) -> Result<TokenRecord, BridgeError> {
        let url = Url::parse(callback_url)
            .map_err(|e| BridgeError::BadRequest(format!("invalid callback URL: {e}")))?;
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        if let Some(error) = params.get("error") {
            return Err(BridgeError::AuthExchange(format!("authorization denied: {error}")));
        }

        let state = params.get("state").ok_or(BridgeError::InvalidState)?;
        self.crypto.check_state(state, Utc::now())?;

        let code = params
            .get("code")
            .ok_or_else(|| BridgeError::AuthExchange("callback URL has no code".into()))?;
        let realm_id = params
            .get("realmId")
            .filter(|r| !r.is_empty())
            .ok_or_else(|| BridgeError::AuthExchange("callback URL has no realmId".into()))?;

        let tokens = self.provider.exchange_code(code, &self.redirect_uri).await?;
        let record = issue_record(realm_id, tokens, None, Utc::now()).ok_or_else(|| {
            BridgeError::AuthExchange("authorization server returned no refresh token".into())
        })?;

        let id = self.store.record_token(&record).await?;
        self.remember(StoredToken { id, record: record.clone() }).await;

        info!("[OAuth] realm {realm_id} authorized via {}", self.provider.id());
        Ok(record)
    }

    /// Whether the realm's current access token is inside its validity window.
    ///
    /// No network access; a realm not cached yet is loaded from the store.
    pub async fn is_access_token_valid(&self, realm_id: &str) -> Result<bool, BridgeError> {
        Ok(self
            .current(realm_id)
            .await?
            .is_some_and(|stored| stored.record.is_access_token_valid_at(Utc::now())))
    }

    pub async fn session_state(&self, realm_id: &str) -> Result<SessionState, BridgeError> {
        Ok(match self.current(realm_id).await? {
            None => SessionState::Unauthenticated,
            Some(stored) if stored.record.is_access_token_valid_at(Utc::now()) => {
                SessionState::Authenticated
            }
            Some(_) => SessionState::Stale,
        })
    }

    /// Trade the realm's current refresh token for a new pair and persist it.
    ///
    /// Any failure leaves the realm unauthenticated until it is authorized again,
    /// unless a concurrent refresh has already stored a newer pair.
    pub async fn refresh(&self, realm_id: &str) -> Result<TokenRecord, BridgeError> {
        let current = self.current(realm_id).await?.ok_or_else(|| {
            BridgeError::Refresh(format!("realm {realm_id} has no active session"))
        })?;

        if !current.record.is_refresh_token_valid_at(Utc::now()) {
            self.revoke(&current).await;
            return Err(BridgeError::Refresh(format!(
                "refresh token for realm {realm_id} expired"
            )));
        }

        let tokens = match self.provider.refresh_token(&current.record.refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("[OAuth] refresh rejected for realm {realm_id}: {e}");
                self.revoke(&current).await;
                return Err(e);
            }
        };

        let record = issue_record(realm_id, tokens, Some(&current.record), Utc::now())
            .ok_or_else(|| BridgeError::Refresh("no refresh token available".into()))?;

        let id = match self.store.record_token(&record).await {
            Ok(id) => id,
            Err(e) => {
                error!("[OAuth] refreshed tokens for realm {realm_id} could not be stored: {e}");
                return Err(e);
            }
        };
        self.remember(StoredToken { id, record: record.clone() }).await;

        info!("[OAuth] refreshed tokens for realm {realm_id}");
        Ok(record)
    }

    /// Return a usable access token, refreshing first when the current one is stale.
    pub async fn ensure_valid_token(&self, realm_id: &str) -> Result<String, BridgeError> {
        let current = self.current(realm_id).await?.ok_or_else(|| {
            BridgeError::Refresh(format!("realm {realm_id} is not authorized"))
        })?;

        if current.record.is_access_token_valid_at(Utc::now()) {
            return Ok(current.record.access_token);
        }

        Ok(self.refresh(realm_id).await?.access_token)
    }

    /// Current record of the realm, loading it from the store on a cache miss.
    async fn current(&self, realm_id: &str) -> Result<Option<StoredToken>, BridgeError> {
        match self.sessions.read().await.get(realm_id) {
            Some(SessionEntry::Active(stored)) => return Ok(Some(stored.clone())),
            Some(SessionEntry::Revoked) => return Ok(None),
            None => {}
        }

        let Some(stored) = self.store.latest_token(realm_id).await? else {
            return Ok(None);
        };

        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .entry(realm_id.to_string())
            .or_insert_with(|| SessionEntry::Active(stored));

        Ok(match entry {
            SessionEntry::Active(stored) => Some(stored.clone()),
            SessionEntry::Revoked => None,
        })
    }

    /// Cache a just-stored record unless a later insertion is already cached.
    async fn remember(&self, stored: StoredToken) {
        let mut sessions = self.sessions.write().await;
        if let Some(SessionEntry::Active(existing)) = sessions.get(&stored.record.realm_id) {
            if existing.id > stored.id {
                return;
            }
        }
        sessions.insert(stored.record.realm_id.clone(), SessionEntry::Active(stored));
    }

    /// Mark the realm unauthenticated, unless a later record already replaced `failed`.
    async fn revoke(&self, failed: &StoredToken) {
        let realm_id = &failed.record.realm_id;
        let mut sessions = self.sessions.write().await;
        let superseded = matches!(
            sessions.get(realm_id),
            Some(SessionEntry::Active(current)) if current.id > failed.id
        );
        if superseded {
            return;
        }

        warn!("[OAuth] realm {realm_id} must be authorized again");
        sessions.insert(realm_id.clone(), SessionEntry::Revoked);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use chrono::Duration;

    use super::*;
    use crate::crypto::{test_engine, STATE_TTL_SECS};
    use crate::oauth::TokenSet;
    use crate::store::{ChangeEvent, MemoryRealmStore};

    /// Provider that issues numbered tokens without any network access.
    pub(crate) struct FakeProvider {
        issued: AtomicUsize,
        pub(crate) access_ttl: AtomicUsize,
        pub(crate) reject_refresh: AtomicBool,
    }

    impl FakeProvider {
        pub(crate) fn new() -> Self {
            Self {
                issued: AtomicUsize::new(0),
                access_ttl: AtomicUsize::new(3600),
                reject_refresh: AtomicBool::new(false),
            }
        }

        fn issue(&self) -> TokenSet {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            TokenSet {
                access_token: format!("AT{n}"),
                refresh_token: Some(format!("RT{n}")),
                token_type: "bearer".into(),
                expires_in: Some(self.access_ttl.load(Ordering::SeqCst) as u64),
                refresh_token_expires_in: Some(8_726_400),
            }
        }
    }

    #[async_trait]
    impl OAuthProvider for FakeProvider {
        fn id(&self) -> &str {
            "fake"
        }

        fn scopes(&self) -> Vec<String> {
            vec!["com.intuit.quickbooks.accounting".into(), "openid".into()]
        }

        fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> Result<String, BridgeError> {
            let mut url = Url::parse("https://auth.example.test/connect").unwrap();
            url.query_pairs_mut()
                .append_pair("scope", &scopes.join(" "))
                .append_pair("state", state)
                .append_pair("redirect_uri", redirect_uri);
            Ok(url.to_string())
        }

        async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<TokenSet, BridgeError> {
            if code == "used-code" {
                return Err(BridgeError::AuthExchange("invalid_grant".into()));
            }
            Ok(self.issue())
        }

        async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, BridgeError> {
            if self.reject_refresh.load(Ordering::SeqCst) {
                return Err(BridgeError::Refresh("invalid_grant".into()));
            }
            Ok(self.issue())
        }
    }

    pub(crate) fn state_from(auth_uri: &str) -> String {
        Url::parse(auth_uri)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    pub(crate) fn callback_url(state: &str, code: &str, realm_id: &str) -> String {
        let mut url = Url::parse("http://localhost:3000/callback").unwrap();
        url.query_pairs_mut()
            .append_pair("code", code)
            .append_pair("state", state)
            .append_pair("realmId", realm_id);
        url.to_string()
    }

    /// Provider whose refreshes take 10 ms, 20 ms, ... in call order.
    ///
    /// Exchanges go to a `FakeProvider`. Refresh call `n` issues `AT{n+2}`,
    /// rotating to `RT{n+2}` only when `rotate` is set, and call `fail_call`
    /// is rejected.
    struct SlowRefreshProvider {
        inner: FakeProvider,
        calls: AtomicUsize,
        rotate: bool,
        fail_call: Option<usize>,
    }

    impl SlowRefreshProvider {
        fn new(rotate: bool, fail_call: Option<usize>) -> Self {
            Self {
                inner: FakeProvider::new(),
                calls: AtomicUsize::new(0),
                rotate,
                fail_call,
            }
        }
    }

    #[async_trait]
    impl OAuthProvider for SlowRefreshProvider {
        fn id(&self) -> &str {
            "slow"
        }

        fn scopes(&self) -> Vec<String> {
            self.inner.scopes()
        }

        fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> Result<String, BridgeError> {
            self.inner.auth_url(scopes, state, redirect_uri)
        }

        async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, BridgeError> {
            self.inner.exchange_code(code, redirect_uri).await
        }

        async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, BridgeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_millis(10 * (n as u64 + 1))).await;

            if self.fail_call == Some(n) {
                return Err(BridgeError::Refresh("invalid_grant".into()));
            }
            Ok(TokenSet {
                access_token: format!("AT{}", n + 2),
                refresh_token: self.rotate.then(|| format!("RT{}", n + 2)),
                token_type: "bearer".into(),
                expires_in: Some(3600),
                refresh_token_expires_in: Some(8_726_400),
            })
        }
    }

    /// Memory store that holds back the insert of one access token for 50 ms.
    struct SlowInsertStore {
        inner: MemoryRealmStore,
        slow_access_token: &'static str,
    }

    #[async_trait]
    impl RealmStore for SlowInsertStore {
        async fn realm_exists(&self, realm_id: &str) -> Result<bool, BridgeError> {
            self.inner.realm_exists(realm_id).await
        }

        async fn record_token(&self, record: &TokenRecord) -> Result<i64, BridgeError> {
            if record.access_token == self.slow_access_token {
                tokio::time::sleep(StdDuration::from_millis(50)).await;
            }
            self.inner.record_token(record).await
        }

        async fn latest_token(&self, realm_id: &str) -> Result<Option<StoredToken>, BridgeError> {
            self.inner.latest_token(realm_id).await
        }

        async fn record_change_event(&self, event: &ChangeEvent) -> Result<(), BridgeError> {
            self.inner.record_change_event(event).await
        }
    }

    fn manager() -> (SessionManager, Arc<FakeProvider>, Arc<MemoryRealmStore>) {
        let provider = Arc::new(FakeProvider::new());
        let store = Arc::new(MemoryRealmStore::new());
        let manager = SessionManager::new(
            provider.clone(),
            store.clone(),
            Arc::new(test_engine()),
            "http://localhost:3000/callback",
        );
        (manager, provider, store)
    }

    async fn authorize(manager: &SessionManager, realm_id: &str) -> TokenRecord {
        let state = state_from(&manager.authorization_uri().unwrap());
        manager
            .exchange_code(&callback_url(&state, "AB-code", realm_id))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_authorization_uri_has_scopes_and_signed_state() {
        let (manager, _, _) = manager();
        let uri = manager.authorization_uri().unwrap();
        assert!(uri.contains("com.intuit.quickbooks.accounting"));
        assert!(test_engine().check_state(&state_from(&uri), Utc::now()).is_ok());
    }

    #[tokio::test]
    async fn test_exchange_persists_and_authorizes_realm() {
        let (manager, _, store) = manager();
        assert!(!store.realm_exists("123").await.unwrap());
        assert_eq!(manager.session_state("123").await.unwrap(), SessionState::Unauthenticated);
        assert!(!manager.is_access_token_valid("123").await.unwrap());

        let record = authorize(&manager, "123").await;
        assert_eq!(record.access_token, "AT1");
        assert_eq!(record.refresh_token, "RT1");

        assert!(store.realm_exists("123").await.unwrap());
        assert!(manager.is_access_token_valid("123").await.unwrap());
        assert_eq!(manager.session_state("123").await.unwrap(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_exchange_rejects_bad_state() {
        let (manager, _, store) = manager();
        let err = manager
            .exchange_code(&callback_url("testState", "AB-code", "123"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState));

        let stale = test_engine()
            .issue_state(Utc::now() - Duration::seconds(STATE_TTL_SECS + 60))
            .unwrap();
        let err = manager
            .exchange_code(&callback_url(&stale, "AB-code", "123"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidState));
        assert!(!store.realm_exists("123").await.unwrap());
    }

    #[tokio::test]
    async fn test_exchange_failure_propagates() {
        let (manager, _, store) = manager();
        let state = state_from(&manager.authorization_uri().unwrap());
        let err = manager
            .exchange_code(&callback_url(&state, "used-code", "123"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::AuthExchange(_)));
        assert!(!store.realm_exists("123").await.unwrap());
    }

    #[tokio::test]
    async fn test_ensure_valid_token_refreshes_stale_token() {
        let (manager, provider, store) = manager();
        provider.access_ttl.store(0, Ordering::SeqCst);
        authorize(&manager, "123").await;
        assert!(!manager.is_access_token_valid("123").await.unwrap());
        assert_eq!(manager.session_state("123").await.unwrap(), SessionState::Stale);

        provider.access_ttl.store(3600, Ordering::SeqCst);
        let token = manager.ensure_valid_token("123").await.unwrap();
        assert_eq!(token, "AT2");
        assert_eq!(store.token_history("123").await.len(), 2);

        // Valid now, so no further refresh.
        assert_eq!(manager.ensure_valid_token("123").await.unwrap(), "AT2");
        assert_eq!(store.token_history("123").await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_serves_last_inserted_record() {
        let store = Arc::new(SlowInsertStore {
            inner: MemoryRealmStore::new(),
            slow_access_token: "AT2",
        });
        let manager = SessionManager::new(
            Arc::new(SlowRefreshProvider::new(true, None)),
            store.clone(),
            Arc::new(test_engine()),
            "http://localhost:3000/callback",
        );
        authorize(&manager, "123").await;

        // AT2 is issued first but stored last.
        let (a, b) = tokio::join!(manager.refresh("123"), manager.refresh("123"));
        assert_eq!(a.unwrap().access_token, "AT2");
        assert_eq!(b.unwrap().access_token, "AT3");

        let history = store.inner.token_history("123").await;
        assert_eq!(history.len(), 3);
        let latest = store.latest_token("123").await.unwrap().unwrap();
        assert_eq!(latest.record.access_token, "AT2");

        assert!(manager.is_access_token_valid("123").await.unwrap());
        assert_eq!(manager.ensure_valid_token("123").await.unwrap(), latest.record.access_token);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_concurrent_success_without_rotation() {
        let store = Arc::new(MemoryRealmStore::new());
        let manager = SessionManager::new(
            Arc::new(SlowRefreshProvider::new(false, Some(1))),
            store.clone(),
            Arc::new(test_engine()),
            "http://localhost:3000/callback",
        );
        authorize(&manager, "123").await;

        let (ok, failed) = tokio::join!(manager.refresh("123"), manager.refresh("123"));
        let ok = ok.unwrap();
        assert_eq!(ok.refresh_token, "RT1");
        assert!(matches!(failed, Err(BridgeError::Refresh(_))));

        assert_eq!(manager.session_state("123").await.unwrap(), SessionState::Authenticated);
        assert_eq!(manager.ensure_valid_token("123").await.unwrap(), "AT2");
    }

    #[tokio::test]
    async fn test_refresh_failure_requires_new_authorization() {
        let (manager, provider, _) = manager();
        authorize(&manager, "123").await;

        provider.reject_refresh.store(true, Ordering::SeqCst);
        let err = manager.refresh("123").await.unwrap_err();
        assert!(matches!(err, BridgeError::Refresh(_)));
        assert_eq!(manager.session_state("123").await.unwrap(), SessionState::Unauthenticated);
        assert!(!manager.is_access_token_valid("123").await.unwrap());
        assert!(matches!(manager.ensure_valid_token("123").await, Err(BridgeError::Refresh(_))));

        provider.reject_refresh.store(false, Ordering::SeqCst);
        authorize(&manager, "123").await;
        assert_eq!(manager.session_state("123").await.unwrap(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_session_loaded_from_store() {
        let (first, _, store) = manager();
        authorize(&first, "123").await;

        let restarted = SessionManager::new(
            Arc::new(FakeProvider::new()),
            store.clone(),
            Arc::new(test_engine()),
            "http://localhost:3000/callback",
        );
        assert!(restarted.is_access_token_valid("123").await.unwrap());
        assert_eq!(restarted.session_state("123").await.unwrap(), SessionState::Authenticated);
        assert_eq!(restarted.ensure_valid_token("123").await.unwrap(), "AT1");
        assert_eq!(store.token_history("123").await.len(), 1);
    }
}
