//! Aggregate root abstraction.
//!
//! Version and uncommitted-change bookkeeping lives in [`AggregateState`],
//! a value each domain aggregate owns. The bookkeeping invariant is
//! `current_version == original_version + uncommitted.len()` outside of
//! replay.

use std::any::Any;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Version and pending-change bookkeeping shared by every aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct AggregateState<E> {
    id: Uuid,
    aggregate_type: String,
    original_version: i64,
    current_version: i64,
    #[serde(skip, default = "Vec::new")]
    uncommitted: Vec<E>,
}

impl<E> AggregateState<E> {
    /// Fresh state at version 0.
    #[must_use]
    pub fn new(id: Uuid, aggregate_type: &str) -> Self {
        Self {
            id,
            aggregate_type: aggregate_type.to_owned(),
            original_version: 0,
            current_version: 0,
            uncommitted: Vec::new(),
        }
    }

    /// Aggregate identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Aggregate type name.
    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    /// Version as loaded or last saved; used for the concurrency check.
    #[must_use]
    pub fn original_version(&self) -> i64 {
        self.original_version
    }

    /// Version after all locally applied events.
    #[must_use]
    pub fn current_version(&self) -> i64 {
        self.current_version
    }

    /// Version the next raised event must carry.
    #[must_use]
    pub fn next_version(&self) -> i64 {
        self.current_version + 1
    }

    /// Events applied locally but not yet saved.
    #[must_use]
    pub fn uncommitted(&self) -> &[E] {
        &self.uncommitted
    }

    /// Whether there are unsaved events.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    /// Bumps the current version by one.
    pub fn advance(&mut self) {
        self.current_version += 1;
    }

    /// Queues an already applied event for persistence.
    pub fn record(&mut self, event: E) {
        self.uncommitted.push(event);
    }

    /// Drops the queued events.
    pub fn clear_uncommitted(&mut self) {
        self.uncommitted.clear();
    }

    /// Overrides the loaded/saved version marker.
    pub fn set_original_version(&mut self, version: i64) {
        self.original_version = version;
    }
}

/// Object-safe view of an aggregate, used by snapshot policies.
pub trait Aggregate: Send + Sync + 'static {
    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid;

    /// Returns the aggregate type name.
    fn aggregate_type(&self) -> &str;

    /// Returns the current version (number of events applied).
    fn version(&self) -> i64;

    /// Downcasting hook for business predicates.
    fn as_any(&self) -> &dyn Any;
}

/// Trait for aggregate roots that reconstitute from event history.
pub trait AggregateRoot: Send + Sync + Sized + 'static {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent + Clone;

    /// Aggregate type name stored with every event and snapshot.
    const AGGREGATE_TYPE: &'static str;

    /// Zero-state aggregate at version 0.
    fn empty(id: Uuid) -> Self;

    /// Shared bookkeeping.
    fn state(&self) -> &AggregateState<Self::Event>;

    /// Mutable shared bookkeeping.
    fn state_mut(&mut self) -> &mut AggregateState<Self::Event>;

    /// Mutates domain fields for one event. Versioning is handled by
    /// [`AggregateRoot::apply`].
    fn mutate(&mut self, event: &Self::Event);

    /// Applies an event and advances the current version by exactly one.
    fn apply(&mut self, event: &Self::Event) {
        self.mutate(event);
        self.state_mut().advance();
    }

    /// Applies a historical event, rejecting out-of-order versions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the event does not carry the
    /// next expected version.
    fn replay(&mut self, event: &Self::Event) -> Result<(), DomainError> {
        let expected = self.state().next_version();
        let actual = event.metadata().version;
        if actual != expected {
            return Err(DomainError::Validation(format!(
                "aggregate {} expected event version {expected}, got {actual}",
                self.state().id()
            )));
        }
        self.apply(event);
        Ok(())
    }

    /// Applies a newly raised event and queues it for persistence.
    fn raise(&mut self, event: Self::Event) {
        self.apply(&event);
        self.state_mut().record(event);
    }

    /// Version as loaded or last saved.
    fn original_version(&self) -> i64 {
        self.state().original_version()
    }

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[Self::Event] {
        self.state().uncommitted()
    }

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self) {
        self.state_mut().clear_uncommitted();
    }

    /// Sets the loaded/saved version marker.
    fn set_original_version(&mut self, version: i64) {
        self.state_mut().set_original_version(version);
    }

    /// Marks every local change as durably saved.
    fn mark_committed(&mut self) {
        let current = self.state().current_version();
        let state = self.state_mut();
        state.clear_uncommitted();
        state.set_original_version(current);
    }
}

impl<T: AggregateRoot> Aggregate for T {
    fn aggregate_id(&self) -> Uuid {
        self.state().id()
    }

    fn aggregate_type(&self) -> &str {
        self.state().aggregate_type()
    }

    fn version(&self) -> i64 {
        self.state().current_version()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Aggregates whose full state can be captured in a snapshot.
pub trait Snapshottable: AggregateRoot + Serialize + DeserializeOwned {}

impl<T: AggregateRoot + Serialize + DeserializeOwned> Snapshottable for T {}
