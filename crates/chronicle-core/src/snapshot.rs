//! Snapshot records and the snapshot store abstraction.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Encoding of the serialized aggregate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// Human-readable JSON.
    Json,
    /// Compact binary BSON.
    Bson,
}

impl ContentType {
    /// MIME type recorded with each snapshot.
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Bson => "application/bson",
        }
    }

    /// Short configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bson => "bson",
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "application/json" => Ok(Self::Json),
            "bson" | "application/bson" => Ok(Self::Bson),
            other => Err(DomainError::InvalidConfiguration(format!(
                "unknown serializer {other:?}, expected json or bson"
            ))),
        }
    }
}

/// Compression applied on top of the serialized state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Stored as produced by the serializer.
    #[default]
    None,
    /// Gzip (deflate) stream.
    Gzip,
}

impl Compression {
    /// Short configuration name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Compression {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Ok(Self::None),
            "gzip" => Ok(Self::Gzip),
            other => Err(DomainError::InvalidConfiguration(format!(
                "unknown compression {other:?}, expected none or gzip"
            ))),
        }
    }
}

/// Descriptive metadata stored alongside each snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Size of `data` in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 of `data`.
    pub checksum: String,
    /// Name of the policy that triggered the snapshot.
    pub policy: String,
    /// Additional key/value pairs.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// A serialized point-in-time copy of an aggregate. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Aggregate this snapshot belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Aggregate version at capture time.
    pub version: i64,
    /// Serialized (and possibly compressed) aggregate state.
    pub data: Vec<u8>,
    /// Encoding of `data` before compression.
    pub content_type: ContentType,
    /// Compression applied to `data`.
    pub compression: Compression,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Size, checksum and policy name.
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Logical storage key, `"{aggregate_id}_{version}"`.
    #[must_use]
    pub fn record_id(&self) -> String {
        snapshot_record_id(self.aggregate_id, self.version)
    }

    /// Summary used for diagnostics.
    #[must_use]
    pub fn info(&self) -> SnapshotInfo {
        SnapshotInfo {
            aggregate_id: self.aggregate_id,
            version: self.version,
            size: self.metadata.size,
            content_type: self.content_type,
            compression: self.compression,
            policy: self.metadata.policy.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Builds the logical key of a snapshot record.
#[must_use]
pub fn snapshot_record_id(aggregate_id: Uuid, version: i64) -> String {
    format!("{aggregate_id}_{version}")
}

/// Diagnostic projection of a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Aggregate identifier.
    pub aggregate_id: Uuid,
    /// Captured version.
    pub version: i64,
    /// Stored size in bytes.
    pub size: u64,
    /// Encoding.
    pub content_type: ContentType,
    /// Compression.
    pub compression: Compression,
    /// Triggering policy.
    pub policy: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
}

/// Aggregate metrics across every stored snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Number of snapshots.
    pub count: u64,
    /// Sum of snapshot sizes in bytes.
    pub total_size: u64,
    /// Mean snapshot size in bytes.
    pub avg_size: f64,
    /// Smallest snapshot in bytes.
    pub min_size: u64,
    /// Largest snapshot in bytes.
    pub max_size: u64,
    /// Oldest capture time.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest capture time.
    pub newest: Option<DateTime<Utc>>,
}

impl SnapshotStats {
    /// Folds a sequence of snapshots into stats.
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a Snapshot>) -> Self {
        let mut stats = Self::default();
        for snapshot in snapshots {
            let size = snapshot.metadata.size;
            stats.min_size = if stats.count == 0 {
                size
            } else {
                stats.min_size.min(size)
            };
            stats.max_size = stats.max_size.max(size);
            stats.total_size += size;
            stats.count += 1;
            stats.oldest = Some(
                stats
                    .oldest
                    .map_or(snapshot.timestamp, |t| t.min(snapshot.timestamp)),
            );
            stats.newest = Some(
                stats
                    .newest
                    .map_or(snapshot.timestamp, |t| t.max(snapshot.timestamp)),
            );
        }
        if stats.count > 0 {
            #[allow(clippy::cast_precision_loss)]
            let avg = stats.total_size as f64 / stats.count as f64;
            stats.avg_size = avg;
        }
        stats
    }
}

/// Durable keyed storage for snapshots, keyed by aggregate and version.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Upserts a snapshot; an existing snapshot at the same version is
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` for I/O failures.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), DomainError>;

    /// Highest-version snapshot with `version <= max_version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotNotFound` if none exists.
    async fn get_snapshot(&self, aggregate_id: Uuid, max_version: i64)
    -> Result<Snapshot, DomainError>;

    /// Snapshot at exactly `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotNotFound` if none exists.
    async fn get_snapshot_by_version(
        &self,
        aggregate_id: Uuid,
        version: i64,
    ) -> Result<Snapshot, DomainError>;

    /// Deletes all but the `keep_count` highest-version snapshots of an
    /// aggregate and returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` for I/O failures.
    async fn delete_old_snapshots(
        &self,
        aggregate_id: Uuid,
        keep_count: usize,
    ) -> Result<u64, DomainError>;

    /// All snapshots of an aggregate, ascending by version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` for I/O failures.
    async fn list_snapshots(&self, aggregate_id: Uuid) -> Result<Vec<Snapshot>, DomainError>;

    /// Metrics across all aggregates.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` for I/O failures.
    async fn get_snapshot_stats(&self) -> Result<SnapshotStats, DomainError>;
}
