//! `PostgreSQL` implementation of the `EventStore` trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::event_store::{EventStore, StoredEvent, validate_batch};

pub(crate) fn storage_error(err: sqlx::Error) -> DomainError {
    DomainError::Storage(err.to_string())
}

/// PostgreSQL-backed event store.
///
/// Appends for one aggregate are serialised with a transaction-scoped
/// advisory lock; the `(aggregate_id, version)` unique index is the final
/// guard against concurrent writers.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a new `PgEventStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_event(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    let attributes: Json<BTreeMap<String, String>> = row.try_get("attributes")?;
    Ok(StoredEvent {
        event_id: row.try_get("event_id")?,
        event_type: row.try_get("event_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        version: row.try_get("version")?,
        payload: row.try_get("payload")?,
        correlation_id: row.try_get("correlation_id")?,
        causation_id: row.try_get("causation_id")?,
        occurred_at: row.try_get("occurred_at")?,
        attributes: attributes.0,
    })
}

#[async_trait]
impl EventStore for PgEventStore {
    #[instrument(skip(self, events), fields(count = events.len()))]
    async fn save_events(
        &self,
        aggregate_id: Uuid,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(aggregate_id, events, expected_version)?;

        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(aggregate_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        let actual: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM domain_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage_error)?;

        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        for event in events {
            let inserted = sqlx::query(
                "INSERT INTO domain_events (event_id, event_type, aggregate_id, aggregate_type, \
                 version, payload, correlation_id, causation_id, attributes, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(event.event_id)
            .bind(&event.event_type)
            .bind(event.aggregate_id)
            .bind(&event.aggregate_type)
            .bind(event.version)
            .bind(&event.payload)
            .bind(event.correlation_id)
            .bind(event.causation_id)
            .bind(Json(&event.attributes))
            .bind(event.occurred_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    return Err(DomainError::ConcurrencyConflict {
                        aggregate_id,
                        expected: expected_version,
                        actual: event.version,
                    });
                }
                Err(e) => return Err(storage_error(e)),
            }
        }

        tx.commit().await.map_err(storage_error)?;
        debug!(%aggregate_id, expected_version, "appended events");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_events(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        from_version: i64,
        to_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query(
            "SELECT event_id, event_type, aggregate_id, aggregate_type, version, payload, \
             correlation_id, causation_id, attributes, occurred_at \
             FROM domain_events \
             WHERE aggregate_id = $1 \
               AND ($2 = '' OR aggregate_type = $2) \
               AND version >= $3 \
               AND ($4::BIGINT IS NULL OR version <= $4) \
             ORDER BY version ASC",
        )
        .bind(aggregate_id)
        .bind(aggregate_type)
        .bind(from_version)
        .bind(to_version)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter()
            .map(decode_event)
            .collect::<Result<Vec<_>, _>>()
            .map_err(storage_error)
    }

    async fn stream_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM domain_events WHERE aggregate_id = $1",
        )
        .bind(aggregate_id)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)
    }
}
