//! Aggregate persistence façade.
//!
//! The event store is the source of truth. Snapshots only shorten replay:
//! a failed snapshot write never fails a save, and an unusable snapshot
//! falls back to a full replay.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use chronicle_core::aggregate::{Aggregate, AggregateRoot, Snapshottable};
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::event_store::{EventStore, StoredEvent};

use crate::manager::SnapshotManager;

/// How an aggregate was reconstructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    /// Version of the snapshot used as a starting point, if any.
    pub snapshot_version: Option<i64>,
    /// Number of events applied on top of the starting point.
    pub events_replayed: usize,
    /// Wall time of the whole load.
    pub duration: Duration,
}

/// Loads and saves aggregates of type `A`.
pub struct AggregateRepository<A> {
    events: Arc<dyn EventStore>,
    snapshots: Arc<SnapshotManager>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for AggregateRepository<A> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            snapshots: Arc::clone(&self.snapshots),
            _aggregate: PhantomData,
        }
    }
}

impl<A> fmt::Debug for AggregateRepository<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRepository")
            .field("aggregate", &std::any::type_name::<A>())
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl<A: Snapshottable> AggregateRepository<A> {
    /// Creates a repository over `events` and `snapshots`.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, snapshots: Arc<SnapshotManager>) -> Self {
        Self {
            events,
            snapshots,
            _aggregate: PhantomData,
        }
    }

    /// Underlying event store.
    #[must_use]
    pub fn event_store(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Snapshot manager used on save and load.
    #[must_use]
    pub fn snapshot_manager(&self) -> &Arc<SnapshotManager> {
        &self.snapshots
    }

    /// Persists the aggregate's uncommitted events.
    ///
    /// On success the aggregate is marked committed and, if the policy asks
    /// for it, snapshotted. On failure the aggregate is left untouched so the
    /// caller can reload and retry.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream moved past
    /// the aggregate's original version, or any event store error.
    #[instrument(skip(self, aggregate), fields(aggregate_id = %aggregate.aggregate_id()))]
    pub async fn save(&self, aggregate: &mut A) -> Result<(), DomainError> {
        let changes = aggregate.uncommitted_events();
        if changes.is_empty() {
            return Ok(());
        }
        let stored = changes
            .iter()
            .map(|event| event.to_stored())
            .collect::<Result<Vec<StoredEvent>, _>>()?;

        self.events
            .save_events(aggregate.aggregate_id(), &stored, aggregate.original_version())
            .await?;
        aggregate.mark_committed();
        debug!(
            version = aggregate.version(),
            appended = stored.len(),
            "aggregate saved"
        );

        if self
            .snapshots
            .should_create_snapshot(&*aggregate, aggregate.version())
        {
            if let Err(err) = self.snapshots.create_snapshot(&*aggregate).await {
                warn!(
                    aggregate_id = %aggregate.aggregate_id(),
                    error = %err,
                    "snapshot creation failed; events were saved"
                );
            }
        }
        Ok(())
    }

    /// Loads an aggregate, starting from its newest snapshot when one is
    /// usable.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if there is neither a
    /// snapshot nor any event, and event store or decoding errors.
    pub async fn get_by_id(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        self.load_with_stats(aggregate_id, true)
            .await
            .map(|(aggregate, _)| aggregate)
    }

    /// Loads an aggregate by replaying its whole event stream.
    ///
    /// # Errors
    ///
    /// Same as [`AggregateRepository::get_by_id`].
    pub async fn get_by_id_full_replay(&self, aggregate_id: Uuid) -> Result<A, DomainError> {
        self.load_with_stats(aggregate_id, false)
            .await
            .map(|(aggregate, _)| aggregate)
    }

    /// Loads an aggregate and reports how it was rebuilt. Snapshot-assisted
    /// loads feed their duration back into the snapshot policy.
    ///
    /// # Errors
    ///
    /// Same as [`AggregateRepository::get_by_id`].
    #[instrument(skip(self))]
    pub async fn load_with_stats(
        &self,
        aggregate_id: Uuid,
        use_snapshot: bool,
    ) -> Result<(A, LoadStats), DomainError> {
        let started = Instant::now();

        let restored = if use_snapshot {
            match self
                .snapshots
                .restore_from_snapshot::<A>(aggregate_id, i64::MAX)
                .await
            {
                Ok(found) => Some(found),
                Err(err) if err.is_snapshot_not_found() => None,
                Err(err) => {
                    warn!(%aggregate_id, error = %err, "snapshot unusable; replaying all events");
                    None
                }
            }
        } else {
            None
        };

        let snapshot_version = restored.as_ref().map(|(_, version)| *version);
        let (mut aggregate, from_version) = match restored {
            Some((aggregate, version)) => (aggregate, version + 1),
            None => (A::empty(aggregate_id), 1),
        };

        let stored = self
            .events
            .load_events(aggregate_id, A::AGGREGATE_TYPE, from_version, None)
            .await?;
        if snapshot_version.is_none() && stored.is_empty() {
            return Err(DomainError::AggregateNotFound(aggregate_id));
        }

        for record in &stored {
            let event = A::Event::from_stored(record)?;
            aggregate.replay(&event)?;
        }
        let version = aggregate.version();
        aggregate.set_original_version(version);

        let stats = LoadStats {
            snapshot_version,
            events_replayed: stored.len(),
            duration: started.elapsed(),
        };
        if use_snapshot {
            self.snapshots
                .update_performance_metrics(aggregate_id, stats.duration);
        }
        debug!(
            version,
            ?snapshot_version,
            events_replayed = stats.events_replayed,
            "aggregate loaded"
        );
        Ok((aggregate, stats))
    }

    /// Loads the aggregate, applies `command` and saves, reloading and
    /// retrying up to `max_attempts` times while saves hit concurrency
    /// conflicts.
    ///
    /// # Errors
    ///
    /// Returns the command's error, the last conflict once attempts are
    /// exhausted, or any other load/save error immediately.
    pub async fn save_with_retry<F>(
        &self,
        aggregate_id: Uuid,
        max_attempts: u32,
        mut command: F,
    ) -> Result<A, DomainError>
    where
        F: FnMut(&mut A) -> Result<(), DomainError> + Send,
    {
        if max_attempts == 0 {
            return Err(DomainError::Validation(
                "save_with_retry needs at least one attempt".into(),
            ));
        }
        let mut attempt = 1;
        loop {
            let mut aggregate = self.get_by_id(aggregate_id).await?;
            command(&mut aggregate)?;
            match self.save(&mut aggregate).await {
                Ok(()) => return Ok(aggregate),
                Err(err) if err.is_conflict() && attempt < max_attempts => {
                    debug!(%aggregate_id, attempt, "concurrency conflict; retrying");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{EventCountPolicy, NeverPolicy};
    use crate::testing::{Ledger, LedgerEvent};
    use chronicle_core::clock::{Clock, SystemClock};
    use chronicle_core::config::SnapshotConfiguration;
    use chronicle_core::snapshot::SnapshotStore;
    use chronicle_event_store::{InMemoryEventStore, InMemorySnapshotStore};
    use chronicle_test_support::{
        EmptyEventStore, FailingEventStore, FailingSnapshotStore, RecordingEventStore,
    };

    struct Fixture {
        repository: AggregateRepository<Ledger>,
        events: Arc<InMemoryEventStore>,
        snapshots: Arc<InMemorySnapshotStore>,
    }

    fn fixture(threshold: i64) -> Fixture {
        let events = Arc::new(InMemoryEventStore::new());
        let snapshots = Arc::new(InMemorySnapshotStore::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let manager = SnapshotManager::new(
            SnapshotConfiguration::default(),
            snapshots.clone(),
            clock,
        )
        .unwrap()
        .with_policy(Arc::new(EventCountPolicy::new(threshold).unwrap()));
        Fixture {
            repository: AggregateRepository::new(events.clone(), Arc::new(manager)),
            events,
            snapshots,
        }
    }

    async fn snapshot_versions(fixture: &Fixture, id: Uuid) -> Vec<i64> {
        fixture
            .snapshots
            .list_snapshots(id)
            .await
            .unwrap()
            .iter()
            .map(|s| s.version)
            .collect()
    }

    #[tokio::test]
    async fn test_save_commits_and_snapshots_on_policy() {
        // Arrange
        let fx = fixture(2);
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        fx.repository.save(&mut ledger).await.unwrap();

        // Act
        for amount in [10, 20, 30, 40] {
            ledger.deposit(amount);
            fx.repository.save(&mut ledger).await.unwrap();
        }

        // Assert
        assert_eq!(ledger.version(), 5);
        assert_eq!(ledger.original_version(), 5);
        assert!(ledger.uncommitted_events().is_empty());
        assert_eq!(snapshot_versions(&fx, id).await, vec![2, 4]);
        assert_eq!(fx.events.event_count().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_save_without_changes_is_a_noop() {
        let store = Arc::new(RecordingEventStore::new(Vec::new()));
        let manager = SnapshotManager::new(
            SnapshotConfiguration::default(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(SystemClock),
        )
        .unwrap();
        let repository: AggregateRepository<Ledger> =
            AggregateRepository::new(store.clone(), Arc::new(manager));
        let mut ledger = Ledger::committed_at(Uuid::new_v4(), 3);

        repository.save(&mut ledger).await.unwrap();

        assert!(store.saved_events().is_empty());
    }

    #[tokio::test]
    async fn test_get_by_id_restores_snapshot_then_replays_tail() {
        // Arrange
        let fx = fixture(2);
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        fx.repository.save(&mut ledger).await.unwrap();
        for amount in [10, 20, 30, 40] {
            ledger.deposit(amount);
            fx.repository.save(&mut ledger).await.unwrap();
        }

        // Act
        let (restored, stats) = fx.repository.load_with_stats(id, true).await.unwrap();

        // Assert
        assert_eq!(stats.snapshot_version, Some(4));
        assert_eq!(stats.events_replayed, 1);
        assert_eq!(restored.version(), 5);
        assert_eq!(restored.original_version(), 5);
        assert_eq!(restored.balance(), 100);
        assert_eq!(restored.entries(), &[10, 20, 30, 40]);
    }

    #[tokio::test]
    async fn test_snapshot_load_requests_only_the_tail() {
        // Arrange
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        for amount in 1..=5 {
            ledger.deposit(amount);
        }
        let stored: Vec<StoredEvent> = ledger
            .uncommitted_events()
            .iter()
            .map(|e| e.to_stored().unwrap())
            .collect();
        let store = Arc::new(RecordingEventStore::new(stored.clone()));
        let manager = Arc::new(
            SnapshotManager::new(
                SnapshotConfiguration::default(),
                Arc::new(InMemorySnapshotStore::new()),
                Arc::new(SystemClock),
            )
            .unwrap(),
        );
        let mut partial = Ledger::empty(id);
        for record in &stored[..4] {
            partial
                .replay(&LedgerEvent::from_stored(record).unwrap())
                .unwrap();
        }
        partial.mark_committed();
        manager.create_snapshot(&partial).await.unwrap();
        let repository: AggregateRepository<Ledger> =
            AggregateRepository::new(store.clone(), manager);

        // Act
        let (restored, stats) = repository.load_with_stats(id, true).await.unwrap();

        // Assert
        assert_eq!(stats.snapshot_version, Some(4));
        assert_eq!(restored.version(), 6);
        assert_eq!(store.load_requests(), vec![(id, 5, None)]);
    }

    #[tokio::test]
    async fn test_snapshot_and_full_replay_are_equivalent_at_every_version() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::new());
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        for amount in 1..=6 {
            ledger.deposit(amount * 7);
        }
        let stored: Vec<StoredEvent> = ledger
            .uncommitted_events()
            .iter()
            .map(|e| e.to_stored().unwrap())
            .collect();
        events.save_events(id, &stored, 0).await.unwrap();

        for k in 0..=stored.len() {
            let manager = Arc::new(
                SnapshotManager::new(
                    SnapshotConfiguration::default(),
                    Arc::new(InMemorySnapshotStore::new()),
                    Arc::new(SystemClock),
                )
                .unwrap()
                .with_policy(Arc::new(NeverPolicy)),
            );
            let repository: AggregateRepository<Ledger> =
                AggregateRepository::new(events.clone(), Arc::clone(&manager));
            if k > 0 {
                let mut partial = Ledger::empty(id);
                for record in &stored[..k] {
                    partial
                        .replay(&LedgerEvent::from_stored(record).unwrap())
                        .unwrap();
                }
                partial.mark_committed();
                manager.create_snapshot(&partial).await.unwrap();
            }

            // Act
            let (restored, stats) = repository.load_with_stats(id, true).await.unwrap();
            let replayed = repository.get_by_id_full_replay(id).await.unwrap();

            // Assert
            let expected_snapshot = (k > 0).then(|| i64::try_from(k).unwrap());
            assert_eq!(stats.snapshot_version, expected_snapshot);
            assert_eq!(stats.events_replayed, stored.len() - k);
            assert_eq!(
                serde_json::to_value(&restored).unwrap(),
                serde_json::to_value(&replayed).unwrap(),
                "snapshot at version {k}"
            );
        }
    }

    #[tokio::test]
    async fn test_get_by_id_of_unknown_aggregate_is_not_found() {
        let fx = fixture(2);
        let id = Uuid::new_v4();

        let result = fx.repository.get_by_id(id).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(found)) if found == id));
    }

    #[tokio::test]
    async fn test_get_by_id_with_empty_store_is_not_found() {
        let manager = SnapshotManager::new(
            SnapshotConfiguration::default(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(SystemClock),
        )
        .unwrap();
        let repository: AggregateRepository<Ledger> =
            AggregateRepository::new(Arc::new(EmptyEventStore), Arc::new(manager));

        let result = repository.get_by_id(Uuid::new_v4()).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(_))));
    }

    #[tokio::test]
    async fn test_stale_save_is_a_conflict_and_keeps_local_changes() {
        // Arrange
        let fx = fixture(100);
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        ledger.deposit(5);
        fx.repository.save(&mut ledger).await.unwrap();

        let mut first = fx.repository.get_by_id(id).await.unwrap();
        let mut second = fx.repository.get_by_id(id).await.unwrap();
        first.deposit(1);
        fx.repository.save(&mut first).await.unwrap();

        // Act
        second.deposit(2);
        let result = fx.repository.save(&mut second).await;

        // Assert
        match result {
            Err(DomainError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 3);
            }
            other => panic!("expected ConcurrencyConflict, got {other:?}"),
        }
        assert_eq!(second.uncommitted_events().len(), 1);
        assert_eq!(second.original_version(), 2);
        assert_eq!(second.version(), 3);
    }

    #[tokio::test]
    async fn test_reload_and_retry_after_conflict_succeeds() {
        let fx = fixture(100);
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        fx.repository.save(&mut ledger).await.unwrap();
        let mut stale = fx.repository.get_by_id(id).await.unwrap();
        ledger.deposit(1);
        fx.repository.save(&mut ledger).await.unwrap();
        stale.deposit(2);
        assert!(fx.repository.save(&mut stale).await.unwrap_err().is_conflict());

        let mut fresh = fx.repository.get_by_id(id).await.unwrap();
        fresh.deposit(2);
        fx.repository.save(&mut fresh).await.unwrap();

        let loaded = fx.repository.get_by_id(id).await.unwrap();
        assert_eq!(loaded.version(), 3);
        assert_eq!(loaded.balance(), 3);
    }

    #[tokio::test]
    async fn test_save_with_retry_applies_command_on_latest_state() {
        let fx = fixture(100);
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        fx.repository.save(&mut ledger).await.unwrap();

        let saved = fx
            .repository
            .save_with_retry(id, 3, |ledger| {
                ledger.deposit(25);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(saved.version(), 2);
        assert_eq!(saved.balance(), 25);
    }

    #[tokio::test]
    async fn test_save_with_retry_rejects_zero_attempts() {
        let fx = fixture(100);

        let result = fx
            .repository
            .save_with_retry(Uuid::new_v4(), 0, |_| Ok(()))
            .await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_snapshot_failure_does_not_fail_save() {
        // Arrange
        let events = Arc::new(InMemoryEventStore::new());
        let manager = SnapshotManager::new(
            SnapshotConfiguration::default(),
            Arc::new(FailingSnapshotStore),
            Arc::new(SystemClock),
        )
        .unwrap()
        .with_policy(Arc::new(EventCountPolicy::new(1).unwrap()));
        let repository: AggregateRepository<Ledger> =
            AggregateRepository::new(events.clone(), Arc::new(manager));
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);

        // Act
        repository.save(&mut ledger).await.unwrap();
        let loaded = repository.get_by_id(id).await.unwrap();

        // Assert
        assert_eq!(events.event_count().unwrap(), 1);
        assert_eq!(loaded.version(), 1);
    }

    #[tokio::test]
    async fn test_event_store_failure_surfaces_and_leaves_aggregate_dirty() {
        let manager = SnapshotManager::new(
            SnapshotConfiguration::default(),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(SystemClock),
        )
        .unwrap()
        .with_policy(Arc::new(NeverPolicy));
        let repository: AggregateRepository<Ledger> =
            AggregateRepository::new(Arc::new(FailingEventStore), Arc::new(manager));
        let mut ledger = Ledger::open(Uuid::new_v4());

        let result = repository.save(&mut ledger).await;

        assert!(matches!(result, Err(DomainError::Storage(_))));
        assert_eq!(ledger.uncommitted_events().len(), 1);
        assert_eq!(ledger.original_version(), 0);
    }

    #[tokio::test]
    async fn test_unusable_snapshot_falls_back_to_full_replay() {
        // Arrange
        let fx = fixture(1);
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        ledger.deposit(9);
        fx.repository.save(&mut ledger).await.unwrap();
        let mut snapshot = fx.snapshots.get_snapshot(id, i64::MAX).await.unwrap();
        snapshot.data = b"{}".to_vec();
        fx.snapshots.save_snapshot(&snapshot).await.unwrap();

        // Act
        let (loaded, stats) = fx.repository.load_with_stats(id, true).await.unwrap();

        // Assert
        assert_eq!(stats.snapshot_version, None);
        assert_eq!(stats.events_replayed, 2);
        assert_eq!(loaded.balance(), 9);
    }

    #[tokio::test]
    async fn test_full_replay_ignores_snapshots() {
        let fx = fixture(1);
        let id = Uuid::new_v4();
        let mut ledger = Ledger::open(id);
        fx.repository.save(&mut ledger).await.unwrap();
        ledger.deposit(3);
        fx.repository.save(&mut ledger).await.unwrap();

        let (loaded, stats) = fx.repository.load_with_stats(id, false).await.unwrap();

        assert_eq!(stats.snapshot_version, None);
        assert_eq!(stats.events_replayed, 2);
        assert_eq!(loaded.version(), 2);
    }
}
