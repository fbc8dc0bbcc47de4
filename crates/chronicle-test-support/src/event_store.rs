//! Mock `EventStore` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event_store::{EventStore, StoredEvent};
use uuid::Uuid;

/// An event store that records every `save_events` call and returns the
/// configured events from `load_events`, filtered by the requested range.
/// Saves always succeed and are not visible to later loads.
#[derive(Debug, Default)]
pub struct RecordingEventStore {
    load_result: Mutex<Vec<StoredEvent>>,
    saved: Mutex<Vec<(Uuid, i64, Vec<StoredEvent>)>>,
    loads: Mutex<Vec<(Uuid, i64, Option<i64>)>>,
}

impl RecordingEventStore {
    /// Create a recording store that serves `events` from `load_events`.
    #[must_use]
    pub fn new(events: Vec<StoredEvent>) -> Self {
        Self {
            load_result: Mutex::new(events),
            saved: Mutex::new(Vec::new()),
            loads: Mutex::new(Vec::new()),
        }
    }

    /// Returns every `(aggregate_id, expected_version, events)` saved.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_events(&self) -> Vec<(Uuid, i64, Vec<StoredEvent>)> {
        self.saved.lock().unwrap().clone()
    }

    /// Returns every `(aggregate_id, from_version, to_version)` requested.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn load_requests(&self) -> Vec<(Uuid, i64, Option<i64>)> {
        self.loads.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn save_events(
        &self,
        aggregate_id: Uuid,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError> {
        self.saved
            .lock()
            .unwrap()
            .push((aggregate_id, expected_version, events.to_vec()));
        Ok(())
    }

    async fn load_events(
        &self,
        aggregate_id: Uuid,
        _aggregate_type: &str,
        from_version: i64,
        to_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.loads
            .lock()
            .unwrap()
            .push((aggregate_id, from_version, to_version));
        Ok(self
            .load_result
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.version >= from_version && to_version.is_none_or(|to| e.version <= to))
            .cloned()
            .collect())
    }

    async fn stream_version(&self, _aggregate_id: Uuid) -> Result<i64, DomainError> {
        Ok(self
            .load_result
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.version)
            .max()
            .unwrap_or(0))
    }
}

/// An event store that always returns an empty stream and silently accepts
/// saves. Useful for "aggregate not found" scenarios and creation commands.
#[derive(Debug)]
pub struct EmptyEventStore;

#[async_trait]
impl EventStore for EmptyEventStore {
    async fn save_events(
        &self,
        _aggregate_id: Uuid,
        _events: &[StoredEvent],
        _expected_version: i64,
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn load_events(
        &self,
        _aggregate_id: Uuid,
        _aggregate_type: &str,
        _from_version: i64,
        _to_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn stream_version(&self, _aggregate_id: Uuid) -> Result<i64, DomainError> {
        Ok(0)
    }
}

/// An event store whose every operation fails with a storage error.
#[derive(Debug)]
pub struct FailingEventStore;

#[async_trait]
impl EventStore for FailingEventStore {
    async fn save_events(
        &self,
        _aggregate_id: Uuid,
        _events: &[StoredEvent],
        _expected_version: i64,
    ) -> Result<(), DomainError> {
        Err(DomainError::Storage("connection refused".into()))
    }

    async fn load_events(
        &self,
        _aggregate_id: Uuid,
        _aggregate_type: &str,
        _from_version: i64,
        _to_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Storage("connection refused".into()))
    }

    async fn stream_version(&self, _aggregate_id: Uuid) -> Result<i64, DomainError> {
        Err(DomainError::Storage("connection refused".into()))
    }
}
