//! Chronicle storage adapters.
//!
//! Two families of stores implement the `EventStore` and `SnapshotStore`
//! contracts from `chronicle-core`: an in-memory collection store used for
//! tests and single-process deployments, and PostgreSQL adapters.

pub mod in_memory;
pub mod pg_event_store;
pub mod pg_snapshot_store;

pub use in_memory::{InMemoryEventStore, InMemorySnapshotStore};
pub use pg_event_store::PgEventStore;
pub use pg_snapshot_store::PgSnapshotStore;
