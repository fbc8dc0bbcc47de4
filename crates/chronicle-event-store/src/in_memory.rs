//! In-memory event and snapshot stores.
//!
//! Both stores keep their collections behind a `std::sync::RwLock`; no lock
//! is held across an await point. A poisoned lock surfaces as
//! `DomainError::Storage`.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event_store::{EventStore, StoredEvent, validate_batch};
use chronicle_core::snapshot::{Snapshot, SnapshotStats, SnapshotStore};
use tracing::debug;
use uuid::Uuid;

fn poisoned<T>(_: T) -> DomainError {
    DomainError::Storage("in-memory store lock poisoned".into())
}

/// Event streams held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<Uuid, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the lock is poisoned.
    pub fn event_count(&self) -> Result<usize, DomainError> {
        let streams = self.streams.read().map_err(poisoned)?;
        Ok(streams.values().map(Vec::len).sum())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
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

        let mut streams = self.streams.write().map_err(poisoned)?;
        let stream = streams.entry(aggregate_id).or_default();
        let actual = stream.last().map_or(0, |e| e.version);
        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        stream.extend_from_slice(events);
        debug!(%aggregate_id, count = events.len(), "appended events");
        Ok(())
    }

    async fn load_events(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        from_version: i64,
        to_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let streams = self.streams.read().map_err(poisoned)?;
        let Some(stream) = streams.get(&aggregate_id) else {
            return Ok(Vec::new());
        };
        Ok(stream
            .iter()
            .filter(|e| aggregate_type.is_empty() || e.aggregate_type == aggregate_type)
            .filter(|e| e.version >= from_version && to_version.is_none_or(|to| e.version <= to))
            .cloned()
            .collect())
    }

    async fn stream_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        let streams = self.streams.read().map_err(poisoned)?;
        Ok(streams
            .get(&aggregate_id)
            .and_then(|s| s.last())
            .map_or(0, |e| e.version))
    }
}

/// Snapshots held in process memory, ordered by version per aggregate.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<Uuid, BTreeMap<i64, Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        let mut snapshots = self.snapshots.write().map_err(poisoned)?;
        snapshots
            .entry(snapshot.aggregate_id)
            .or_default()
            .insert(snapshot.version, snapshot.clone());
        Ok(())
    }

    async fn get_snapshot(
        &self,
        aggregate_id: Uuid,
        max_version: i64,
    ) -> Result<Snapshot, DomainError> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        snapshots
            .get(&aggregate_id)
            .and_then(|by_version| by_version.range(..=max_version).next_back())
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or(DomainError::SnapshotNotFound {
                aggregate_id,
                max_version,
            })
    }

    async fn get_snapshot_by_version(
        &self,
        aggregate_id: Uuid,
        version: i64,
    ) -> Result<Snapshot, DomainError> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        snapshots
            .get(&aggregate_id)
            .and_then(|by_version| by_version.get(&version))
            .cloned()
            .ok_or(DomainError::SnapshotNotFound {
                aggregate_id,
                max_version: version,
            })
    }

    async fn delete_old_snapshots(
        &self,
        aggregate_id: Uuid,
        keep_count: usize,
    ) -> Result<u64, DomainError> {
        let mut snapshots = self.snapshots.write().map_err(poisoned)?;
        let Some(by_version) = snapshots.get_mut(&aggregate_id) else {
            return Ok(0);
        };
        let excess = by_version.len().saturating_sub(keep_count);
        let doomed: Vec<i64> = by_version.keys().take(excess).copied().collect();
        for version in &doomed {
            by_version.remove(version);
        }
        Ok(doomed.len() as u64)
    }

    async fn list_snapshots(&self, aggregate_id: Uuid) -> Result<Vec<Snapshot>, DomainError> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        Ok(snapshots
            .get(&aggregate_id)
            .map(|by_version| by_version.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_snapshot_stats(&self) -> Result<SnapshotStats, DomainError> {
        let snapshots = self.snapshots.read().map_err(poisoned)?;
        Ok(SnapshotStats::from_snapshots(
            snapshots.values().flat_map(BTreeMap::values),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use chronicle_core::snapshot::{Compression, ContentType, SnapshotMetadata};

    fn stored_event(aggregate_id: Uuid, version: i64) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            event_type: "order.item_added".to_owned(),
            aggregate_id,
            aggregate_type: "order".to_owned(),
            version,
            payload: serde_json::json!({"product_id": "sku-1"}),
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    fn snapshot(aggregate_id: Uuid, version: i64) -> Snapshot {
        Snapshot {
            aggregate_id,
            aggregate_type: "order".to_owned(),
            version,
            data: vec![0; usize::try_from(version).unwrap() * 10],
            content_type: ContentType::Json,
            compression: Compression::None,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
                + chrono::TimeDelta::minutes(version),
            metadata: SnapshotMetadata {
                size: u64::try_from(version).unwrap() * 10,
                checksum: String::new(),
                policy: "always".to_owned(),
                extra: BTreeMap::new(),
            },
        }
    }

    // --- events ---

    #[tokio::test]
    async fn test_load_events_returns_empty_vec_for_unknown_aggregate() {
        let store = InMemoryEventStore::new();

        let events = store
            .load_events(Uuid::new_v4(), "order", 1, None)
            .await
            .unwrap();

        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load_range() {
        // Arrange
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        let batch: Vec<_> = (1..=5).map(|v| stored_event(id, v)).collect();
        store.save_events(id, &batch, 0).await.unwrap();

        // Act
        let middle = store.load_events(id, "order", 2, Some(4)).await.unwrap();
        let tail = store.get_event_history(id, "order", 4).await.unwrap();

        // Assert
        assert_eq!(
            middle.iter().map(|e| e.version).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert_eq!(tail.iter().map(|e| e.version).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(store.stream_version(id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_rejected_without_partial_write() {
        // Arrange
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        store
            .save_events(id, &[stored_event(id, 1), stored_event(id, 2), stored_event(id, 3)], 0)
            .await
            .unwrap();

        // Act
        let result = store.save_events(id, &[stored_event(id, 3)], 2).await;

        // Assert
        match result {
            Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            }) => {
                assert_eq!(aggregate_id, id);
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert_eq!(store.event_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_two_writers_with_same_expected_version_exactly_one_wins() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();
        store.save_events(id, &[stored_event(id, 1)], 0).await.unwrap();

        let first = store.save_events(id, &[stored_event(id, 2)], 1).await;
        let second = store.save_events(id, &[stored_event(id, 2)], 1).await;

        assert!(first.is_ok());
        assert!(second.unwrap_err().is_conflict());
        assert_eq!(store.stream_version(id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();

        store.save_events(id, &[], 0).await.unwrap();

        assert_eq!(store.stream_version(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_contiguous_batch_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = Uuid::new_v4();

        let result = store
            .save_events(id, &[stored_event(id, 1), stored_event(id, 3)], 0)
            .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let store = InMemoryEventStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store.save_events(a, &[stored_event(a, 1)], 0).await.unwrap();
        store.save_events(b, &[stored_event(b, 1)], 0).await.unwrap();

        let loaded_a = store.load_events(a, "order", 1, None).await.unwrap();
        assert_eq!(loaded_a.len(), 1);
        assert_eq!(loaded_a[0].aggregate_id, a);
    }

    // --- snapshots ---

    #[tokio::test]
    async fn test_get_snapshot_returns_highest_at_or_below_max_version() {
        // Arrange
        let store = InMemorySnapshotStore::new();
        let id = Uuid::new_v4();
        for version in [2, 4, 6] {
            store.save_snapshot(&snapshot(id, version)).await.unwrap();
        }

        // Act
        let latest = store.get_snapshot(id, i64::MAX).await.unwrap();
        let bounded = store.get_snapshot(id, 5).await.unwrap();
        let missing = store.get_snapshot(id, 1).await;

        // Assert
        assert_eq!(latest.version, 6);
        assert_eq!(bounded.version, 4);
        assert!(missing.unwrap_err().is_snapshot_not_found());
    }

    #[tokio::test]
    async fn test_save_snapshot_overwrites_same_version() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::new_v4();
        let mut snap = snapshot(id, 4);
        store.save_snapshot(&snap).await.unwrap();

        snap.data = vec![1, 2, 3];
        store.save_snapshot(&snap).await.unwrap();

        let listed = store.list_snapshots(id).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_get_snapshot_by_version_is_exact() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::new_v4();
        store.save_snapshot(&snapshot(id, 4)).await.unwrap();

        assert_eq!(store.get_snapshot_by_version(id, 4).await.unwrap().version, 4);
        assert!(
            store
                .get_snapshot_by_version(id, 3)
                .await
                .unwrap_err()
                .is_snapshot_not_found()
        );
    }

    #[tokio::test]
    async fn test_delete_old_snapshots_keeps_highest_versions() {
        // Arrange
        let store = InMemorySnapshotStore::new();
        let id = Uuid::new_v4();
        for version in [2, 4, 6, 8] {
            store.save_snapshot(&snapshot(id, version)).await.unwrap();
        }

        // Act
        let deleted = store.delete_old_snapshots(id, 2).await.unwrap();

        // Assert
        let remaining: Vec<i64> = store
            .list_snapshots(id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.version)
            .collect();
        assert_eq!(deleted, 2);
        assert_eq!(remaining, vec![6, 8]);
    }

    #[tokio::test]
    async fn test_delete_old_snapshots_is_noop_below_keep_count() {
        let store = InMemorySnapshotStore::new();
        let id = Uuid::new_v4();
        store.save_snapshot(&snapshot(id, 2)).await.unwrap();

        let deleted = store.delete_old_snapshots(id, 5).await.unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(store.list_snapshots(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_stats_span_all_aggregates() {
        let store = InMemorySnapshotStore::new();
        store.save_snapshot(&snapshot(Uuid::new_v4(), 2)).await.unwrap();
        store.save_snapshot(&snapshot(Uuid::new_v4(), 6)).await.unwrap();

        let stats = store.get_snapshot_stats().await.unwrap();

        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 80);
        assert_eq!(stats.min_size, 20);
        assert_eq!(stats.max_size, 60);
    }
}
