use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::crypto::key_management::{insert_sealed_key, KEY_TABLE_DDL};
use crate::error::{EventSourcingError, Result};
use crate::event_sourcing::core::{EventMetadata, StoredEvent};
use super::event_store::{Commit, EventStore, EventStream};

// ============================================================================
// Postgres Event Store
// ============================================================================
//
// `(stream_id, stream_version)` is a unique constraint: it is the
// optimistic-concurrency guard. A commit runs in one transaction together
// with the key rows minted for it; any failure rolls everything back.
//
// ============================================================================

const STREAM_VERSION_CONSTRAINT: &str = "event_store_stream_version_key";

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS event_store (
        sequence_id BIGSERIAL PRIMARY KEY,
        stream_id UUID NOT NULL,
        stream_name TEXT NOT NULL,
        stream_version BIGINT NOT NULL,
        event_name TEXT NOT NULL,
        user_id UUID NOT NULL,
        payload JSONB NOT NULL,
        metadata JSONB NOT NULL,
        occurred_on TIMESTAMPTZ NOT NULL,
        CONSTRAINT event_store_stream_version_key UNIQUE (stream_id, stream_version)
    )",
    "CREATE INDEX IF NOT EXISTS event_store_stream_name_idx ON event_store (stream_name)",
    "CREATE INDEX IF NOT EXISTS event_store_event_name_idx ON event_store (event_name)",
    "CREATE INDEX IF NOT EXISTS event_store_user_id_idx ON event_store (user_id)",
    "CREATE INDEX IF NOT EXISTS event_store_occurred_on_idx ON event_store (occurred_on)",
    KEY_TABLE_DDL,
];

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some("23505")
    )
}

fn violated_constraint(error: &sqlx::Error) -> Option<&str> {
    match error {
        sqlx::Error::Database(db_error) => db_error.constraint(),
        _ => None,
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    sequence_id: i64,
    stream_id: Uuid,
    stream_name: String,
    stream_version: i64,
    event_name: String,
    user_id: Uuid,
    payload: serde_json::Value,
    metadata: Json<EventMetadata>,
    occurred_on: DateTime<Utc>,
}

impl From<EventRow> for StoredEvent {
    fn from(row: EventRow) -> Self {
        Self {
            sequence_id: row.sequence_id,
            stream_id: row.stream_id,
            stream_name: row.stream_name,
            stream_version: row.stream_version,
            event_name: row.event_name,
            user_id: row.user_id,
            payload: row.payload,
            metadata: row.metadata.0,
            occurred_on: row.occurred_on,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("Event store schema ready");
        Ok(())
    }

    async fn select(
        &self,
        stream_id: Uuid,
        event_names: Option<&[String]>,
        desired_time: Option<DateTime<Utc>>,
    ) -> Result<EventStream> {
        let rows = sqlx::query_as::<_, EventRow>(
            "SELECT sequence_id, stream_id, stream_name, stream_version, event_name,
                    user_id, payload, metadata, occurred_on
             FROM event_store
             WHERE stream_id = $1
               AND ($2::timestamptz IS NULL OR occurred_on <= $2)
               AND ($3::text[] IS NULL OR event_name = ANY($3))
             ORDER BY stream_version ASC",
        )
        .bind(stream_id)
        .bind(desired_time)
        .bind(event_names.map(|names| names.to_vec()))
        .fetch(&self.pool)
        .map_ok(StoredEvent::from)
        .try_collect::<Vec<_>>()
        .await?;

        tracing::debug!(stream_id = %stream_id, event_count = rows.len(), "Loaded events");
        Ok(EventStream::new(rows))
    }

    async fn version_of(&self, stream_id: Uuid) -> Result<i64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(stream_version) FROM event_store WHERE stream_id = $1")
                .bind(stream_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(version.unwrap_or(0))
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn load(&self, stream_id: Uuid, desired_time: Option<DateTime<Utc>>) -> Result<EventStream> {
        self.select(stream_id, None, desired_time).await
    }

    async fn load_by_type(
        &self,
        stream_id: Uuid,
        event_names: &[String],
        desired_time: Option<DateTime<Utc>>,
    ) -> Result<EventStream> {
        self.select(stream_id, Some(event_names), desired_time).await
    }

    async fn commit(&self, commit: Commit) -> Result<Vec<i64>> {
        commit.check_distinct_streams()?;
        let mut tx = self.pool.begin().await?;

        for key in &commit.new_keys {
            insert_sealed_key(&mut tx, key).await?;
        }

        let mut versions = Vec::with_capacity(commit.streams.len());
        for stream in &commit.streams {
            // Catches a stale expected version even when appending nothing,
            // and reports the actual version on conflict.
            let actual_version: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(stream_version) FROM event_store WHERE stream_id = $1",
            )
            .bind(stream.stream_id)
            .fetch_one(&mut *tx)
            .await?;
            let actual_version = actual_version.unwrap_or(0);
            if actual_version != stream.expected_version {
                tracing::warn!(
                    stream_id = %stream.stream_id,
                    expected_version = stream.expected_version,
                    actual_version,
                    "Concurrency conflict"
                );
                return Err(EventSourcingError::ConcurrencyConflict {
                    stream_id: stream.stream_id,
                    expected_version: stream.expected_version,
                    actual_version,
                });
            }

            let mut version = stream.expected_version;
            for event in &stream.events {
                version += 1;
                let inserted = sqlx::query(
                    "INSERT INTO event_store (
                        stream_id, stream_name, stream_version, event_name,
                        user_id, payload, metadata, occurred_on
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                )
                .bind(stream.stream_id)
                .bind(&stream.stream_name)
                .bind(version)
                .bind(&event.event_name)
                .bind(event.user_id)
                .bind(&event.payload)
                .bind(Json(&event.metadata))
                .bind(event.occurred_on)
                .execute(&mut *tx)
                .await;

                if let Err(err) = inserted {
                    // A concurrent writer got the same version in between.
                    if is_unique_violation(&err)
                        && violated_constraint(&err) == Some(STREAM_VERSION_CONSTRAINT)
                    {
                        drop(tx);
                        let actual_version = self.version_of(stream.stream_id).await?;
                        tracing::warn!(
                            stream_id = %stream.stream_id,
                            expected_version = stream.expected_version,
                            actual_version,
                            "Concurrency conflict"
                        );
                        return Err(EventSourcingError::ConcurrencyConflict {
                            stream_id: stream.stream_id,
                            expected_version: stream.expected_version,
                            actual_version,
                        });
                    }
                    return Err(err.into());
                }
            }
            versions.push(version);
        }

        tx.commit().await?;
        Ok(versions)
    }

    async fn current_version(&self, stream_id: Uuid) -> Result<i64> {
        self.version_of(stream_id).await
    }
}

// ============================================================================
// Integration Tests
// ============================================================================
//
// Run only when DATABASE_URL points at a disposable Postgres database.
//
// ============================================================================
