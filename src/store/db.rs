//! PostgreSQL-backed realm store.
//!
//! Tables:
//! - `realm_tokens`: encrypted token pairs per realm, insert-only history
//! - `webhook_events`: entity changes reported for authorized realms

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use super::{ChangeEvent, RealmStore, StoredToken, TokenRecord};
use crate::crypto::CryptoEngine;
use crate::error::BridgeError;

/// Realm store backed by PostgreSQL.
pub struct PgRealmStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgRealmStore {
    pub async fn new(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, BridgeError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| BridgeError::Persistence(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Create the tables if they do not exist yet.
    pub async fn bootstrap(&self) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS realm_tokens (
                id                          BIGSERIAL PRIMARY KEY,
                realm_id                    TEXT NOT NULL,
                access_token                TEXT NOT NULL,
                refresh_token               TEXT NOT NULL,
                token_type                  TEXT NOT NULL DEFAULT 'bearer',
                access_token_issued_at      TIMESTAMPTZ NOT NULL,
                refresh_token_issued_at     TIMESTAMPTZ NOT NULL,
                access_token_expires_at     TIMESTAMPTZ NOT NULL,
                refresh_token_expires_at    TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS webhook_events (
                id          BIGSERIAL PRIMARY KEY,
                realm_id    TEXT NOT NULL,
                entity_name TEXT NOT NULL,
                operation   TEXT NOT NULL,
                entity_id   TEXT NOT NULL,
                received_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_realm_tokens_realm ON realm_tokens(realm_id, id DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_webhook_events_realm ON webhook_events(realm_id, received_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl RealmStore for PgRealmStore {
    async fn realm_exists(&self, realm_id: &str) -> Result<bool, BridgeError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM realm_tokens WHERE realm_id = $1)")
            .bind(realm_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.get(0))
    }

    async fn authorized_realms(&self, realm_ids: &[String]) -> Result<HashSet<String>, BridgeError> {
        if realm_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query("SELECT DISTINCT realm_id FROM realm_tokens WHERE realm_id = ANY($1)")
            .bind(realm_ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    async fn record_token(&self, record: &TokenRecord) -> Result<i64, BridgeError> {
        let sealed_access = self.crypto.seal_token(&record.realm_id, &record.access_token)?;
        let sealed_refresh = self.crypto.seal_token(&record.realm_id, &record.refresh_token)?;

        let row = sqlx::query(
            r#"
            INSERT INTO realm_tokens
                (realm_id, access_token, refresh_token, token_type,
                 access_token_issued_at, refresh_token_issued_at,
                 access_token_expires_at, refresh_token_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&record.realm_id)
        .bind(&sealed_access)
        .bind(&sealed_refresh)
        .bind(&record.token_type)
        .bind(record.access_token_issued_at)
        .bind(record.refresh_token_issued_at)
        .bind(record.access_token_expires_at)
        .bind(record.refresh_token_expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get(0))
    }

    async fn latest_token(&self, realm_id: &str) -> Result<Option<StoredToken>, BridgeError> {
        let row = sqlx::query(
            r#"
            SELECT id, access_token, refresh_token, token_type,
                   access_token_issued_at, refresh_token_issued_at,
                   access_token_expires_at, refresh_token_expires_at
            FROM realm_tokens
            WHERE realm_id = $1
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(realm_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let sealed_access: String = row.get(1);
        let sealed_refresh: String = row.get(2);
        let refresh_token_expires_at: Option<DateTime<Utc>> = row.get(7);

        Ok(Some(StoredToken {
            id: row.get(0),
            record: TokenRecord {
                realm_id: realm_id.to_string(),
                access_token: self.crypto.open_token(realm_id, &sealed_access)?,
                refresh_token: self.crypto.open_token(realm_id, &sealed_refresh)?,
                token_type: row.get(3),
                access_token_issued_at: row.get(4),
                refresh_token_issued_at: row.get(5),
                access_token_expires_at: row.get(6),
                refresh_token_expires_at,
            },
        }))
    }

    async fn record_change_event(&self, event: &ChangeEvent) -> Result<(), BridgeError> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events (realm_id, entity_name, operation, entity_id)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&event.realm_id)
        .bind(&event.entity_name)
        .bind(event.operation.as_str())
        .bind(&event.entity_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
