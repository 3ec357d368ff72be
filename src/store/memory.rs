use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ChangeEvent, RealmStore, StoredToken, TokenRecord};
use crate::error::BridgeError;

/// In-process realm store. Same append-only semantics as the PostgreSQL store.
#[derive(Default)]
pub struct MemoryRealmStore {
    tokens: RwLock<Vec<TokenRecord>>,
    events: RwLock<Vec<ChangeEvent>>,
}

impl MemoryRealmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All token records of a realm, oldest first.
    pub async fn token_history(&self, realm_id: &str) -> Vec<TokenRecord> {
        self.tokens
            .read()
            .await
            .iter()
            .filter(|t| t.realm_id == realm_id)
            .cloned()
            .collect()
    }

    /// Every recorded change event, in insertion order.
    pub async fn change_events(&self) -> Vec<ChangeEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl RealmStore for MemoryRealmStore {
    async fn realm_exists(&self, realm_id: &str) -> Result<bool, BridgeError> {
        Ok(self.tokens.read().await.iter().any(|t| t.realm_id == realm_id))
    }

    async fn record_token(&self, record: &TokenRecord) -> Result<i64, BridgeError> {
        let mut tokens = self.tokens.write().await;
        tokens.push(record.clone());
        Ok(tokens.len() as i64)
    }

    async fn latest_token(&self, realm_id: &str) -> Result<Option<StoredToken>, BridgeError> {
        Ok(self
            .tokens
            .read()
            .await
            .iter()
            .enumerate()
            .rev()
            .find(|(_, t)| t.realm_id == realm_id)
            .map(|(i, t)| StoredToken {
                id: i as i64 + 1,
                record: t.clone(),
            }))
    }

    async fn record_change_event(&self, event: &ChangeEvent) -> Result<(), BridgeError> {
        self.events.write().await.push(event.clone());
        Ok(())
    }
}
