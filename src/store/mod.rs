//! Realm store: append-only token history and webhook change events.
//!
//! `PgRealmStore` is the production backend; `MemoryRealmStore` keeps the same
//! contract in process for tests and local runs.

pub mod db;
pub mod memory;

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

pub use db::PgRealmStore;
pub use memory::MemoryRealmStore;

/// One issued token pair for a realm. The newest record of a realm is its current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub realm_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub access_token_issued_at: DateTime<Utc>,
    pub refresh_token_issued_at: DateTime<Utc>,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

/// A token record with its insertion id. Ids grow with insertion order, so the
/// highest id of a realm marks its current record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub id: i64,
    pub record: TokenRecord,
}

/// Kind of change reported by the accounting platform for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Merge,
    Void,
    Emailed,
    /// Operation names this service does not know about are kept verbatim.
    Other(String),
}

impl Operation {
    pub fn as_str(&self) -> &str {
        match self {
            Operation::Create => "Create",
            Operation::Update => "Update",
            Operation::Delete => "Delete",
            Operation::Merge => "Merge",
            Operation::Void => "Void",
            Operation::Emailed => "Emailed",
            Operation::Other(name) => name,
        }
    }
}

impl From<String> for Operation {
    fn from(name: String) -> Self {
        match name.as_str() {
            "Create" => Operation::Create,
            "Update" => Operation::Update,
            "Delete" => Operation::Delete,
            "Merge" => Operation::Merge,
            "Void" => Operation::Void,
            "Emailed" => Operation::Emailed,
            _ => Operation::Other(name),
        }
    }
}

impl From<Operation> for String {
    fn from(op: Operation) -> Self {
        op.as_str().to_string()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded entity change for an authorized realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub realm_id: String,
    pub entity_name: String,
    pub operation: Operation,
    pub entity_id: String,
}

/// Persistence contract used by the OAuth sessions and the webhook pipeline.
///
/// Every call checks a connection out for its own duration only. Failures come
/// back as `BridgeError::Persistence` and are never retried here.
#[async_trait]
pub trait RealmStore: Send + Sync {
    /// Whether the realm has completed authorization at least once.
    async fn realm_exists(&self, realm_id: &str) -> Result<bool, BridgeError>;

    /// The subset of `realm_ids` that have at least one token record.
    async fn authorized_realms(&self, realm_ids: &[String]) -> Result<HashSet<String>, BridgeError> {
        let mut known = HashSet::new();
        for realm_id in realm_ids {
            if self.realm_exists(realm_id).await? {
                known.insert(realm_id.clone());
            }
        }
        Ok(known)
    }

    /// Append a token record and return its insertion id. Older records are kept.
    async fn record_token(&self, record: &TokenRecord) -> Result<i64, BridgeError>;

    /// The most recently inserted token record for the realm.
    async fn latest_token(&self, realm_id: &str) -> Result<Option<StoredToken>, BridgeError>;

    /// Append a change event.
    async fn record_change_event(&self, event: &ChangeEvent) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(Operation::from("Create".to_string()), Operation::Create);
        assert_eq!(Operation::from("Merge".to_string()), Operation::Merge);
        let odd = Operation::from("Archive".to_string());
        assert_eq!(odd, Operation::Other("Archive".into()));
        assert_eq!(odd.as_str(), "Archive");
    }

    #[test]
    fn test_operation_deserializes_from_plain_string() {
        let op: Operation = serde_json::from_str("\"Update\"").unwrap();
        assert_eq!(op, Operation::Update);
        assert_eq!(serde_json::to_string(&Operation::Void).unwrap(), "\"Void\"");
    }
}
