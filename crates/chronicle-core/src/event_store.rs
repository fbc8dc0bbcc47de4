//! Event store abstraction.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Event type tag for deserialization routing.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate type name.
    pub aggregate_type: String,
    /// Version within the aggregate stream. Unique per aggregate and
    /// contiguous from 1.
    pub version: i64,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Free-form key/value metadata.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Append-only storage of event streams with optimistic concurrency.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to the stream of `aggregate_id` only if the stream's
    /// current highest version equals `expected_version`. Either every event
    /// is written or none is. An empty batch is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` when the stream head moved,
    /// `DomainError::Validation` when the batch is not a contiguous run
    /// starting at `expected_version + 1` for this aggregate, and
    /// `DomainError::Storage` for I/O failures.
    async fn save_events(
        &self,
        aggregate_id: Uuid,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError>;

    /// Loads events with `from_version <= version <= to_version`, ascending.
    /// `to_version = None` means "to the latest event". A stream without
    /// events in range yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` for I/O failures.
    async fn load_events(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        from_version: i64,
        to_version: Option<i64>,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Returns the highest stored version of a stream, 0 when empty.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` for I/O failures.
    async fn stream_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError>;

    /// All events from `from_version` to the latest.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::load_events`].
    async fn get_event_history(
        &self,
        aggregate_id: Uuid,
        aggregate_type: &str,
        from_version: i64,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.load_events(aggregate_id, aggregate_type, from_version, None)
            .await
    }
}

/// Checks that `events` form a contiguous run of versions for
/// `aggregate_id`, starting right after `expected_version`.
///
/// Store implementations call this before touching storage so a malformed
/// batch never produces a partial write.
///
/// # Errors
///
/// Returns `DomainError::Validation` describing the first offending event.
pub fn validate_batch(
    aggregate_id: Uuid,
    events: &[StoredEvent],
    expected_version: i64,
) -> Result<(), DomainError> {
    if expected_version < 0 {
        return Err(DomainError::Validation(format!(
            "expected version must not be negative, got {expected_version}"
        )));
    }
    for (offset, event) in (1_i64..).zip(events) {
        if event.aggregate_id != aggregate_id {
            return Err(DomainError::Validation(format!(
                "event {} belongs to aggregate {}, not {aggregate_id}",
                event.event_id, event.aggregate_id
            )));
        }
        let wanted = expected_version + offset;
        if event.version != wanted {
            return Err(DomainError::Validation(format!(
                "event {} has version {}, expected {wanted}",
                event.event_id, event.version
            )));
        }
    }
    Ok(())
}
