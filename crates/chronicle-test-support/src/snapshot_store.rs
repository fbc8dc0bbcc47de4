//! Mock `SnapshotStore` implementations for tests.

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStats, SnapshotStore};
use uuid::Uuid;

/// A snapshot store whose every operation fails with a storage error.
/// Useful for proving that snapshot failures never break a save.
#[derive(Debug)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn save_snapshot(&self, _snapshot: &Snapshot) -> Result<(), DomainError> {
        Err(DomainError::Storage("snapshot collection unavailable".into()))
    }

    async fn get_snapshot(
        &self,
        _aggregate_id: Uuid,
        _max_version: i64,
    ) -> Result<Snapshot, DomainError> {
        Err(DomainError::Storage("snapshot collection unavailable".into()))
    }

    async fn get_snapshot_by_version(
        &self,
        _aggregate_id: Uuid,
        _version: i64,
    ) -> Result<Snapshot, DomainError> {
        Err(DomainError::Storage("snapshot collection unavailable".into()))
    }

    async fn delete_old_snapshots(
        &self,
        _aggregate_id: Uuid,
        _keep_count: usize,
    ) -> Result<u64, DomainError> {
        Err(DomainError::Storage("snapshot collection unavailable".into()))
    }

    async fn list_snapshots(&self, _aggregate_id: Uuid) -> Result<Vec<Snapshot>, DomainError> {
        Err(DomainError::Storage("snapshot collection unavailable".into()))
    }

    async fn get_snapshot_stats(&self) -> Result<SnapshotStats, DomainError> {
        Err(DomainError::Storage("snapshot collection unavailable".into()))
    }
}
