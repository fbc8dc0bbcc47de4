//! Chronicle snapshot engine.
//!
//! Accelerates aggregate reconstruction with policy-driven, serialized
//! state snapshots:
//!
//! - [`policy`] decides when a snapshot is captured.
//! - [`serializer`] turns aggregate state into bytes (JSON or BSON,
//!   optionally gzip-compressed) and back.
//! - [`manager::SnapshotManager`] creates, restores and prunes snapshots and
//!   publishes lifecycle events.
//! - [`repository::AggregateRepository`] is the save/load façade used by
//!   application code: events are authoritative, snapshots are best-effort.
//! - [`monitor::PerformanceMonitor`] measures restore cost with and without
//!   snapshots.

pub mod manager;
pub mod monitor;
pub mod policy;
pub mod repository;
pub mod serializer;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{SnapshotLifecycleEvent, SnapshotLifecycleKind, SnapshotManager};
pub use monitor::{PerformanceMonitor, PerformanceReport, RestoreComparison, RestoreMeasurement};
pub use policy::SnapshotPolicy;
pub use repository::{AggregateRepository, LoadStats};
pub use serializer::SnapshotSerializer;
