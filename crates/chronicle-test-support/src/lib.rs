//! Shared test mocks and utilities for the Chronicle persistence engine.

mod clock;
mod event_store;
mod snapshot_store;

pub use clock::{FixedClock, ManualClock};
pub use event_store::{EmptyEventStore, FailingEventStore, RecordingEventStore};
pub use snapshot_store::FailingSnapshotStore;
