//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by the stores, the snapshot engine and the
/// bounded contexts.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate has neither a snapshot nor any events.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict. The caller should reload the
    /// aggregate, re-apply its command and retry.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// No snapshot exists at or below the requested version.
    #[error("no snapshot for aggregate {aggregate_id} at or below version {max_version}")]
    SnapshotNotFound {
        /// The aggregate that was looked up.
        aggregate_id: Uuid,
        /// Upper version bound of the lookup.
        max_version: i64,
    },

    /// Aggregate state could not be turned into bytes.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Stored bytes could not be turned back into aggregate state.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// A stored event carries a tag the aggregate does not know.
    #[error("unknown event type {event_type:?} for aggregate type {aggregate_type}")]
    UnknownEventType {
        /// The aggregate type that rejected the event.
        aggregate_type: String,
        /// The unrecognised event tag.
        event_type: String,
    },

    /// Underlying storage I/O failed. Never retried inside the engine.
    #[error("storage error: {0}")]
    Storage(String),

    /// A snapshot policy was asked to do something it does not support.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Snapshot or store configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An operation exceeded its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl DomainError {
    /// Returns `true` for optimistic concurrency conflicts, which are the
    /// only errors a caller can recover from by reloading and retrying.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns `true` when the error only means "no usable snapshot".
    #[must_use]
    pub fn is_snapshot_not_found(&self) -> bool {
        matches!(self, Self::SnapshotNotFound { .. })
    }
}
