//! Snapshot manager.
//!
//! Owns the policy, serializer and snapshot store and is the only component
//! that writes snapshots. Every operation reports a [`SnapshotLifecycleEvent`]
//! through `tracing` and a broadcast channel.
//!
//! Retention cleanup (and snapshot writes when `async_creation` is enabled)
//! run on background tasks bounded by the configured timeout. Those tasks
//! are tracked so callers can await them with
//! [`SnapshotManager::wait_for_background_tasks`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use chronicle_core::aggregate::{Aggregate, AggregateRoot, Snapshottable};
use chronicle_core::clock::Clock;
use chronicle_core::config::SnapshotConfiguration;
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{
    Snapshot, SnapshotInfo, SnapshotMetadata, SnapshotStats, SnapshotStore,
};

use crate::policy::{SnapshotPolicy, policy_from_config};
use crate::serializer::{SnapshotSerializer, StateDocument, serializer_for};

const LIFECYCLE_CHANNEL_CAPACITY: usize = 256;

/// What happened to a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotLifecycleKind {
    /// A snapshot was written.
    Created,
    /// An aggregate was rebuilt from a snapshot.
    Restored,
    /// Background retention removed old snapshots.
    Deleted,
    /// An explicit cleanup removed old snapshots.
    Cleaned,
    /// An operation failed.
    Failed,
}

/// Structured record of one snapshot operation.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotLifecycleEvent {
    /// Operation outcome.
    pub kind: SnapshotLifecycleKind,
    /// Aggregate concerned.
    pub aggregate_id: Uuid,
    /// Snapshot version, when one is involved.
    pub version: Option<i64>,
    /// Wall time spent on the operation.
    pub duration: Duration,
    /// Payload size in bytes, or the number of snapshots removed for
    /// cleanup events.
    pub size: u64,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Failure description.
    pub error: Option<String>,
    /// When the event was emitted.
    pub occurred_at: DateTime<Utc>,
}

#[derive(Clone)]
struct Publisher {
    sender: broadcast::Sender<SnapshotLifecycleEvent>,
    clock: Arc<dyn Clock>,
}

impl Publisher {
    fn emit(
        &self,
        kind: SnapshotLifecycleKind,
        aggregate_id: Uuid,
        version: Option<i64>,
        duration: Duration,
        size: u64,
        error: Option<&DomainError>,
    ) {
        let event = SnapshotLifecycleEvent {
            kind,
            aggregate_id,
            version,
            duration,
            size,
            success: error.is_none(),
            error: error.map(ToString::to_string),
            occurred_at: self.clock.now(),
        };
        match &event.error {
            Some(error) => warn!(
                kind = ?event.kind,
                %aggregate_id,
                ?version,
                duration_ms = duration.as_millis(),
                %error,
                "snapshot operation failed"
            ),
            None => info!(
                kind = ?event.kind,
                %aggregate_id,
                ?version,
                duration_ms = duration.as_millis(),
                size,
                "snapshot lifecycle"
            ),
        }
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}

/// Creates, restores and prunes aggregate snapshots.
pub struct SnapshotManager {
    config: SnapshotConfiguration,
    policy: Arc<dyn SnapshotPolicy>,
    serializer: Arc<dyn SnapshotSerializer>,
    store: Arc<dyn SnapshotStore>,
    publisher: Publisher,
    background: Mutex<JoinSet<()>>,
}

impl fmt::Debug for SnapshotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotManager")
            .field("config", &self.config)
            .field("policy", &self.policy.name())
            .field("serializer", &self.serializer)
            .finish_non_exhaustive()
    }
}

impl SnapshotManager {
    /// Builds a manager whose policy and serializer come from `config`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `config` does not
    /// validate.
    pub fn new(
        config: SnapshotConfiguration,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        config.validate()?;
        let policy = policy_from_config(&config, Arc::clone(&clock))?;
        let serializer: Arc<dyn SnapshotSerializer> =
            Arc::from(serializer_for(config.default_serializer, config.default_compression));
        let (sender, _) = broadcast::channel(LIFECYCLE_CHANNEL_CAPACITY);
        Ok(Self {
            config,
            policy,
            serializer,
            store,
            publisher: Publisher { sender, clock },
            background: Mutex::new(JoinSet::new()),
        })
    }

    /// Replaces the configured policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn SnapshotPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Replaces the configured serializer.
    #[must_use]
    pub fn with_serializer(mut self, serializer: Arc<dyn SnapshotSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SnapshotConfiguration {
        &self.config
    }

    /// Active policy.
    #[must_use]
    pub fn policy(&self) -> &Arc<dyn SnapshotPolicy> {
        &self.policy
    }

    /// Subscribes to lifecycle events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotLifecycleEvent> {
        self.publisher.sender.subscribe()
    }

    /// Whether `aggregate` should be snapshotted after a save. Always false
    /// while snapshots are disabled.
    pub fn should_create_snapshot(&self, aggregate: &dyn Aggregate, event_count: i64) -> bool {
        self.config.enabled && self.policy.should_create_snapshot(aggregate, event_count)
    }

    /// Captures the committed state of `aggregate`.
    ///
    /// With `async_creation` the write itself is handed to a background
    /// task and this returns once the payload is encoded. Retention cleanup
    /// always runs in the background.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::PolicyViolation` for aggregates with no
    /// committed events or with unsaved changes, `DomainError::Serialization`
    /// if encoding fails, or the store error of a synchronous write.
    #[instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.aggregate_id(), version = aggregate.version()))]
    pub async fn create_snapshot<A: Snapshottable>(&self, aggregate: &A) -> Result<(), DomainError> {
        if !self.config.enabled {
            return Ok(());
        }
        let started = Instant::now();
        let aggregate_id = aggregate.aggregate_id();
        let version = aggregate.version();

        let snapshot = match self.build_snapshot(aggregate) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.publisher.emit(
                    SnapshotLifecycleKind::Failed,
                    aggregate_id,
                    Some(version),
                    started.elapsed(),
                    0,
                    Some(&err),
                );
                return Err(err);
            }
        };

        if self.config.async_creation {
            let store = Arc::clone(&self.store);
            let publisher = self.publisher.clone();
            let timeout = self.config.background_timeout();
            let keep = self.config.max_snapshots_per_aggregate;
            self.spawn_background(async move {
                let result = tokio::time::timeout(timeout, store.save_snapshot(&snapshot))
                    .await
                    .unwrap_or_else(|_| Err(timed_out("snapshot write", timeout)));
                let error = result.err();
                publisher.emit(
                    if error.is_some() {
                        SnapshotLifecycleKind::Failed
                    } else {
                        SnapshotLifecycleKind::Created
                    },
                    aggregate_id,
                    Some(version),
                    started.elapsed(),
                    snapshot.metadata.size,
                    error.as_ref(),
                );
                if error.is_none() {
                    retain_latest(&*store, &publisher, aggregate_id, keep, timeout).await;
                }
            });
            return Ok(());
        }

        if let Err(err) = self.store.save_snapshot(&snapshot).await {
            self.publisher.emit(
                SnapshotLifecycleKind::Failed,
                aggregate_id,
                Some(version),
                started.elapsed(),
                snapshot.metadata.size,
                Some(&err),
            );
            return Err(err);
        }
        self.publisher.emit(
            SnapshotLifecycleKind::Created,
            aggregate_id,
            Some(version),
            started.elapsed(),
            snapshot.metadata.size,
            None,
        );

        if self.config.max_snapshots_per_aggregate > 0 {
            let store = Arc::clone(&self.store);
            let publisher = self.publisher.clone();
            let timeout = self.config.background_timeout();
            let keep = self.config.max_snapshots_per_aggregate;
            self.spawn_background(async move {
                retain_latest(&*store, &publisher, aggregate_id, keep, timeout).await;
            });
        }
        Ok(())
    }

    fn build_snapshot<A: Snapshottable>(&self, aggregate: &A) -> Result<Snapshot, DomainError> {
        let version = aggregate.version();
        if version < 1 {
            return Err(DomainError::PolicyViolation(
                "cannot snapshot an aggregate without events".into(),
            ));
        }
        if aggregate.state().has_changes() {
            return Err(DomainError::PolicyViolation(format!(
                "aggregate {} has unsaved changes; snapshot after saving",
                aggregate.aggregate_id()
            )));
        }
        let data = self.serializer.serialize(&StateDocument::capture(aggregate)?)?;
        Ok(Snapshot {
            aggregate_id: aggregate.aggregate_id(),
            aggregate_type: A::AGGREGATE_TYPE.to_owned(),
            version,
            content_type: self.serializer.content_type(),
            compression: self.serializer.compression(),
            timestamp: self.publisher.clock.now(),
            metadata: SnapshotMetadata {
                size: data.len() as u64,
                checksum: checksum(&data),
                policy: self.policy.name(),
                extra: BTreeMap::new(),
            },
            data,
        })
    }

    /// Rebuilds an aggregate from its newest snapshot at or below
    /// `max_version`, returning it with the snapshot version.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SnapshotNotFound` when no snapshot qualifies,
    /// `DomainError::Deserialization` when the payload is corrupt, fails its
    /// checksum or does not match the record, and store errors unchanged.
    #[instrument(skip(self))]
    pub async fn restore_from_snapshot<A: Snapshottable>(
        &self,
        aggregate_id: Uuid,
        max_version: i64,
    ) -> Result<(A, i64), DomainError> {
        let started = Instant::now();
        let snapshot = match self.store.get_snapshot(aggregate_id, max_version).await {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_snapshot_not_found() => {
                debug!(%aggregate_id, max_version, "no snapshot available");
                return Err(err);
            }
            Err(err) => {
                self.publisher.emit(
                    SnapshotLifecycleKind::Failed,
                    aggregate_id,
                    None,
                    started.elapsed(),
                    0,
                    Some(&err),
                );
                return Err(err);
            }
        };

        match self.decode_snapshot::<A>(&snapshot) {
            Ok(aggregate) => {
                self.publisher.emit(
                    SnapshotLifecycleKind::Restored,
                    aggregate_id,
                    Some(snapshot.version),
                    started.elapsed(),
                    snapshot.metadata.size,
                    None,
                );
                Ok((aggregate, snapshot.version))
            }
            Err(err) => {
                self.publisher.emit(
                    SnapshotLifecycleKind::Failed,
                    aggregate_id,
                    Some(snapshot.version),
                    started.elapsed(),
                    snapshot.metadata.size,
                    Some(&err),
                );
                Err(err)
            }
        }
    }

    fn decode_snapshot<A: Snapshottable>(&self, snapshot: &Snapshot) -> Result<A, DomainError> {
        if snapshot.aggregate_type != A::AGGREGATE_TYPE {
            return Err(DomainError::Deserialization(format!(
                "snapshot {} holds a {} aggregate, expected {}",
                snapshot.record_id(),
                snapshot.aggregate_type,
                A::AGGREGATE_TYPE
            )));
        }
        if checksum(&snapshot.data) != snapshot.metadata.checksum {
            return Err(DomainError::Deserialization(format!(
                "snapshot {} failed checksum verification",
                snapshot.record_id()
            )));
        }
        // Stored snapshots name their own encoding; the configured
        // serializer only decides how new snapshots are written.
        let document = serializer_for(snapshot.content_type, snapshot.compression)
            .deserialize(&snapshot.data, A::AGGREGATE_TYPE)?;
        let aggregate: A = document.into_aggregate()?;
        if aggregate.aggregate_id() != snapshot.aggregate_id || aggregate.version() != snapshot.version
        {
            return Err(DomainError::Deserialization(format!(
                "snapshot {} decoded to aggregate {} at version {}",
                snapshot.record_id(),
                aggregate.aggregate_id(),
                aggregate.version()
            )));
        }
        Ok(aggregate)
    }

    /// Removes all but the configured number of newest snapshots. A
    /// retention of zero keeps everything.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    #[instrument(skip(self))]
    pub async fn cleanup_old_snapshots(&self, aggregate_id: Uuid) -> Result<u64, DomainError> {
        let keep = self.config.max_snapshots_per_aggregate;
        if keep == 0 {
            return Ok(0);
        }
        let started = Instant::now();
        match self.store.delete_old_snapshots(aggregate_id, keep).await {
            Ok(deleted) => {
                self.publisher.emit(
                    SnapshotLifecycleKind::Cleaned,
                    aggregate_id,
                    None,
                    started.elapsed(),
                    deleted,
                    None,
                );
                Ok(deleted)
            }
            Err(err) => {
                self.publisher.emit(
                    SnapshotLifecycleKind::Failed,
                    aggregate_id,
                    None,
                    started.elapsed(),
                    0,
                    Some(&err),
                );
                Err(err)
            }
        }
    }

    /// Summaries of every stored snapshot of `aggregate_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_snapshot_info(&self, aggregate_id: Uuid) -> Result<Vec<SnapshotInfo>, DomainError> {
        let snapshots = self.store.list_snapshots(aggregate_id).await?;
        Ok(snapshots.iter().map(Snapshot::info).collect())
    }

    /// Store-wide snapshot statistics.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn snapshot_stats(&self) -> Result<SnapshotStats, DomainError> {
        self.store.get_snapshot_stats().await
    }

    /// Forwards a measured restore duration to the policy.
    pub fn update_performance_metrics(&self, aggregate_id: Uuid, restore_time: Duration) {
        self.policy.update_performance_metrics(aggregate_id, restore_time);
    }

    /// Waits until every background write and cleanup task has finished,
    /// including tasks spawned while waiting.
    pub async fn wait_for_background_tasks(&self) {
        loop {
            let mut tasks = std::mem::take(
                &mut *self
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "snapshot background task aborted");
                }
            }
        }
    }

    fn spawn_background<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while let Some(finished) = tasks.try_join_next() {
            if let Err(err) = finished {
                warn!(error = %err, "snapshot background task aborted");
            }
        }
        tasks.spawn(task);
    }
}

async fn retain_latest(
    store: &dyn SnapshotStore,
    publisher: &Publisher,
    aggregate_id: Uuid,
    keep: usize,
    timeout: Duration,
) {
    if keep == 0 {
        return;
    }
    let started = Instant::now();
    let result = tokio::time::timeout(timeout, store.delete_old_snapshots(aggregate_id, keep))
        .await
        .unwrap_or_else(|_| Err(timed_out("snapshot cleanup", timeout)));
    match result {
        Ok(deleted) => publisher.emit(
            SnapshotLifecycleKind::Deleted,
            aggregate_id,
            None,
            started.elapsed(),
            deleted,
            None,
        ),
        Err(err) => publisher.emit(
            SnapshotLifecycleKind::Failed,
            aggregate_id,
            None,
            started.elapsed(),
            0,
            Some(&err),
        ),
    }
}

fn timed_out(operation: &str, after: Duration) -> DomainError {
    DomainError::Timeout(format!("{operation} exceeded {}s", after.as_secs()))
}

/// Hex SHA-256 of a snapshot payload.
#[must_use]
pub fn checksum(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
