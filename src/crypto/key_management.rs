use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::store::memory::MemoryStorage;
use crate::event_sourcing::store::postgres::is_unique_violation;
use super::master_key::{MasterKey, SealedKey, UserKey};

// ============================================================================
// Key Management - Per-User Key Lifecycle
// ============================================================================
//
// Deleting a key is the erasure primitive: once gone, every ciphertext the
// key produced is unreadable, whether or not the event rows remain.
//
// ============================================================================

#[async_trait]
pub trait KeyManagementRepository: Send + Sync {
    /// Create and durably store a new key. Fails with `KeyAlreadyExists`.
    async fn generate_key(&self, user_id: Uuid) -> Result<()>;

    async fn get_key(&self, user_id: Uuid) -> Result<Option<UserKey>>;

    /// Permanently remove the key. Returns whether a key existed.
    async fn delete_key(&self, user_id: Uuid) -> Result<bool>;
}

// ============================================================================
// In-Memory Repository
// ============================================================================

/// Shares its storage with `InMemoryEventStore`, so commits can persist
/// freshly minted keys together with events.
pub struct InMemoryKeyRepository {
    storage: MemoryStorage,
    master: Arc<MasterKey>,
}

impl InMemoryKeyRepository {
    pub fn new(storage: MemoryStorage, master: Arc<MasterKey>) -> Self {
        Self { storage, master }
    }
}

#[async_trait]
impl KeyManagementRepository for InMemoryKeyRepository {
    async fn generate_key(&self, user_id: Uuid) -> Result<()> {
        let mut state = self.storage.lock().await;
        if state.keys.contains_key(&user_id) {
            return Err(EventSourcingError::KeyAlreadyExists(user_id));
        }

        let (_, sealed) = self.master.mint(user_id)?;
        state.keys.insert(user_id, sealed);

        tracing::info!(user_id = %user_id, "Generated encryption key");
        Ok(())
    }

    async fn get_key(&self, user_id: Uuid) -> Result<Option<UserKey>> {
        let sealed = self.storage.lock().await.keys.get(&user_id).cloned();
        sealed.map(|sealed| self.master.open(&sealed)).transpose()
    }

    async fn delete_key(&self, user_id: Uuid) -> Result<bool> {
        let removed = self.storage.lock().await.keys.remove(&user_id).is_some();
        if removed {
            tracing::info!(user_id = %user_id, "🗑️ Encryption key deleted");
        }
        Ok(removed)
    }
}

// ============================================================================
// Postgres Repository
// ============================================================================

pub const KEY_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS encryption_keys (
    user_id UUID PRIMARY KEY,
    encrypted_key BYTEA NOT NULL,
    nonce BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)";

pub struct PostgresKeyRepository {
    pool: PgPool,
    master: Arc<MasterKey>,
}

impl PostgresKeyRepository {
    pub fn new(pool: PgPool, master: Arc<MasterKey>) -> Self {
        Self { pool, master }
    }
}

/// Insert a sealed key row on an open connection or transaction.
pub(crate) async fn insert_sealed_key(conn: &mut PgConnection, key: &SealedKey) -> Result<()> {
    sqlx::query(
        "INSERT INTO encryption_keys (user_id, encrypted_key, nonce, created_at)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(key.user_id)
    .bind(&key.encrypted_key)
    .bind(&key.nonce)
    .bind(key.created_at)
    .execute(conn)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            EventSourcingError::KeyAlreadyExists(key.user_id)
        } else {
            err.into()
        }
    })?;

    Ok(())
}

#[async_trait]
impl KeyManagementRepository for PostgresKeyRepository {
    async fn generate_key(&self, user_id: Uuid) -> Result<()> {
        let (_, sealed) = self.master.mint(user_id)?;
        let mut conn = self.pool.acquire().await?;
        insert_sealed_key(&mut conn, &sealed).await?;

        tracing::info!(user_id = %user_id, "Generated encryption key");
        Ok(())
    }

    async fn get_key(&self, user_id: Uuid) -> Result<Option<UserKey>> {
        let row: Option<(Vec<u8>, Vec<u8>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT encrypted_key, nonce, created_at FROM encryption_keys WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(encrypted_key, nonce, created_at)| {
            self.master.open(&SealedKey {
                user_id,
                encrypted_key,
                nonce,
                created_at,
            })
        })
        .transpose()
    }

    async fn delete_key(&self, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM encryption_keys WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            tracing::info!(user_id = %user_id, "🗑️ Encryption key deleted");
        }
        Ok(removed)
    }
}
