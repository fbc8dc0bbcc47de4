//! Domain event abstractions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event_store::StoredEvent;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type tag used to route the payload to a concrete event variant.
    pub event_type: String,
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate type name of the stream.
    pub aggregate_type: String,
    /// Position within the aggregate stream, starting at 1.
    pub version: i64,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Free-form key/value metadata (schema tag and similar).
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl EventMetadata {
    /// Builds metadata for a freshly raised event. The causation ID defaults
    /// to the correlation ID.
    #[must_use]
    pub fn new(
        event_type: &str,
        aggregate_id: Uuid,
        aggregate_type: &str,
        version: i64,
        correlation_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            aggregate_id,
            aggregate_type: aggregate_type.to_owned(),
            version,
            correlation_id,
            causation_id: correlation_id,
            occurred_at,
            attributes: BTreeMap::new(),
        }
    }

    /// Adds a metadata attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Copies the envelope fields of a stored event.
    #[must_use]
    pub fn from_stored(stored: &StoredEvent) -> Self {
        Self {
            event_id: stored.event_id,
            event_type: stored.event_type.clone(),
            aggregate_id: stored.aggregate_id,
            aggregate_type: stored.aggregate_type.clone(),
            version: stored.version,
            correlation_id: stored.correlation_id,
            causation_id: stored.causation_id,
            occurred_at: stored.occurred_at,
            attributes: stored.attributes.clone(),
        }
    }
}

/// Trait that all domain events implement.
///
/// Each aggregate owns one closed event type; decoding a stored event is a
/// total match over known tags and unknown tags are rejected.
pub trait DomainEvent: Send + Sync + std::fmt::Debug {
    /// Returns the event type tag.
    fn event_type(&self) -> &'static str;

    /// Serializes the variant payload (without the tag) to JSON.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Returns the metadata for this event.
    fn metadata(&self) -> &EventMetadata;

    /// Decodes a stored event into the concrete event type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` for unrecognised tags and
    /// `DomainError::Deserialization` for malformed payloads.
    fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError>
    where
        Self: Sized;

    /// Converts the event into its persisted representation.
    ///
    /// # Errors
    ///
    /// Propagates payload serialization failures.
    fn to_stored(&self) -> Result<StoredEvent, DomainError> {
        let meta = self.metadata();
        Ok(StoredEvent {
            event_id: meta.event_id,
            event_type: self.event_type().to_owned(),
            aggregate_id: meta.aggregate_id,
            aggregate_type: meta.aggregate_type.clone(),
            version: meta.version,
            payload: self.to_payload()?,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
            attributes: meta.attributes.clone(),
        })
    }
}
