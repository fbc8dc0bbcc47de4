//! Shared application state.

use std::fmt;
use std::sync::Arc;

use chronicle_core::clock::Clock;
use chronicle_core::config::SnapshotConfiguration;
use chronicle_core::error::DomainError;
use chronicle_core::event_store::EventStore;
use chronicle_core::snapshot::SnapshotStore;
use chronicle_event_store::{
    InMemoryEventStore, InMemorySnapshotStore, PgEventStore, PgSnapshotStore,
};
use chronicle_orders::domain::aggregates::Order;
use chronicle_snapshot::{AggregateRepository, SnapshotManager};
use sqlx::PgPool;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Clock used to timestamp events.
    pub clock: Arc<dyn Clock>,
    /// Snapshot-aware repository for orders.
    pub orders: Arc<AggregateRepository<Order>>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, orders: Arc<AggregateRepository<Order>>) -> Self {
        Self { clock, orders }
    }

    /// Wires a snapshot manager and repository over the given stores.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `config` is invalid.
    pub fn with_stores(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        config: SnapshotConfiguration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        let manager = SnapshotManager::new(config, snapshots, Arc::clone(&clock))?;
        let orders = AggregateRepository::new(events, Arc::new(manager));
        Ok(Self::new(clock, Arc::new(orders)))
    }

    /// State backed by process-local stores.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `config` is invalid.
    pub fn in_memory(
        config: SnapshotConfiguration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        Self::with_stores(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
            config,
            clock,
        )
    }

    /// State backed by PostgreSQL.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidConfiguration` if `config` is invalid.
    pub fn postgres(
        pool: PgPool,
        config: SnapshotConfiguration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DomainError> {
        Self::with_stores(
            Arc::new(PgEventStore::new(pool.clone())),
            Arc::new(PgSnapshotStore::new(pool)),
            config,
            clock,
        )
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("orders", &self.orders)
            .finish_non_exhaustive()
    }
}
