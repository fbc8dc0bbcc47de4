//! `PostgreSQL` implementation of the `SnapshotStore` trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotMetadata, SnapshotStats, SnapshotStore};

use crate::pg_event_store::storage_error;

const SELECT_COLUMNS: &str = "SELECT aggregate_id, aggregate_type, version, data, content_type, \
     compression, size, checksum, policy, metadata, captured_at FROM aggregate_snapshots";

/// PostgreSQL-backed snapshot store.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Creates a new `PgSnapshotStore`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_snapshot(row: &PgRow) -> Result<Snapshot, DomainError> {
    let content_type: String = row.try_get("content_type").map_err(storage_error)?;
    let compression: String = row.try_get("compression").map_err(storage_error)?;
    let size: i64 = row.try_get("size").map_err(storage_error)?;
    let extra: Json<BTreeMap<String, String>> = row.try_get("metadata").map_err(storage_error)?;
    Ok(Snapshot {
        aggregate_id: row.try_get("aggregate_id").map_err(storage_error)?,
        aggregate_type: row.try_get("aggregate_type").map_err(storage_error)?,
        version: row.try_get("version").map_err(storage_error)?,
        data: row.try_get("data").map_err(storage_error)?,
        content_type: content_type
            .parse()
            .map_err(|e| DomainError::Storage(format!("corrupt snapshot row: {e}")))?,
        compression: compression
            .parse()
            .map_err(|e| DomainError::Storage(format!("corrupt snapshot row: {e}")))?,
        timestamp: row.try_get("captured_at").map_err(storage_error)?,
        metadata: SnapshotMetadata {
            size: u64::try_from(size).unwrap_or_default(),
            checksum: row.try_get("checksum").map_err(storage_error)?,
            policy: row.try_get("policy").map_err(storage_error)?,
            extra: extra.0,
        },
    })
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    #[instrument(skip(self, snapshot), fields(aggregate_id = %snapshot.aggregate_id, version = snapshot.version))]
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        let size = i64::try_from(snapshot.metadata.size)
            .map_err(|_| DomainError::Storage("snapshot too large".into()))?;
        sqlx::query(
            "INSERT INTO aggregate_snapshots (id, aggregate_id, aggregate_type, version, data, \
             content_type, compression, size, checksum, policy, metadata, captured_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             ON CONFLICT (id) DO UPDATE SET \
               aggregate_type = EXCLUDED.aggregate_type, data = EXCLUDED.data, \
               content_type = EXCLUDED.content_type, compression = EXCLUDED.compression, \
               size = EXCLUDED.size, checksum = EXCLUDED.checksum, policy = EXCLUDED.policy, \
               metadata = EXCLUDED.metadata, captured_at = EXCLUDED.captured_at",
        )
        .bind(snapshot.record_id())
        .bind(snapshot.aggregate_id)
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version)
        .bind(&snapshot.data)
        .bind(snapshot.content_type.as_str())
        .bind(snapshot.compression.as_str())
        .bind(size)
        .bind(&snapshot.metadata.checksum)
        .bind(&snapshot.metadata.policy)
        .bind(Json(&snapshot.metadata.extra))
        .bind(snapshot.timestamp)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn get_snapshot(
        &self,
        aggregate_id: Uuid,
        max_version: i64,
    ) -> Result<Snapshot, DomainError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE aggregate_id = $1 AND version <= $2 \
             ORDER BY version DESC LIMIT 1"
        ))
        .bind(aggregate_id)
        .bind(max_version)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => decode_snapshot(&row),
            None => Err(DomainError::SnapshotNotFound {
                aggregate_id,
                max_version,
            }),
        }
    }

    async fn get_snapshot_by_version(
        &self,
        aggregate_id: Uuid,
        version: i64,
    ) -> Result<Snapshot, DomainError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE aggregate_id = $1 AND version = $2"
        ))
        .bind(aggregate_id)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        match row {
            Some(row) => decode_snapshot(&row),
            None => Err(DomainError::SnapshotNotFound {
                aggregate_id,
                max_version: version,
            }),
        }
    }

    #[instrument(skip(self))]
    async fn delete_old_snapshots(
        &self,
        aggregate_id: Uuid,
        keep_count: usize,
    ) -> Result<u64, DomainError> {
        let keep = i64::try_from(keep_count).unwrap_or(i64::MAX);
        let result = sqlx::query(
            "DELETE FROM aggregate_snapshots WHERE id IN ( \
               SELECT id FROM aggregate_snapshots WHERE aggregate_id = $1 \
               ORDER BY version DESC OFFSET $2)",
        )
        .bind(aggregate_id)
        .bind(keep)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        debug!(deleted = result.rows_affected(), "deleted old snapshots");
        Ok(result.rows_affected())
    }

    async fn list_snapshots(&self, aggregate_id: Uuid) -> Result<Vec<Snapshot>, DomainError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(decode_snapshot).collect()
    }

    async fn get_snapshot_stats(&self) -> Result<SnapshotStats, DomainError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count, COALESCE(SUM(size), 0)::BIGINT AS total_size, \
             COALESCE(AVG(size), 0)::FLOAT8 AS avg_size, \
             COALESCE(MIN(size), 0) AS min_size, COALESCE(MAX(size), 0) AS max_size, \
             MIN(captured_at) AS oldest, MAX(captured_at) AS newest \
             FROM aggregate_snapshots",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;

        let as_u64 = |column: &str| -> Result<u64, DomainError> {
            let value: i64 = row.try_get(column).map_err(storage_error)?;
            Ok(u64::try_from(value).unwrap_or_default())
        };
        Ok(SnapshotStats {
            count: as_u64("count")?,
            total_size: as_u64("total_size")?,
            avg_size: row.try_get("avg_size").map_err(storage_error)?,
            min_size: as_u64("min_size")?,
            max_size: as_u64("max_size")?,
            oldest: row
                .try_get::<Option<DateTime<Utc>>, _>("oldest")
                .map_err(storage_error)?,
            newest: row
                .try_get::<Option<DateTime<Utc>>, _>("newest")
                .map_err(storage_error)?,
        })
    }
}
