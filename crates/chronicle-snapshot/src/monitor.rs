//! Restore performance measurements.
//!
//! Compares snapshot-assisted loads against full replays of the same
//! aggregate: latency, approximate in-memory footprint (serialized state
//! size) and whether both paths produce the same state.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use chronicle_core::aggregate::Snapshottable;
use chronicle_core::error::DomainError;

use crate::repository::{AggregateRepository, LoadStats};

/// Latency and footprint of repeated loads along one path.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreMeasurement {
    /// Number of loads measured.
    pub iterations: u32,
    /// Mean load time.
    pub average: Duration,
    /// Fastest load.
    pub min: Duration,
    /// Slowest load.
    pub max: Duration,
    /// Snapshot version the loads started from.
    pub snapshot_version: Option<i64>,
    /// Events applied per load.
    pub events_replayed: usize,
    /// Serialized size of the loaded state in bytes.
    pub state_bytes: usize,
}

/// Side-by-side comparison of both load paths for one aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreComparison {
    /// Aggregate measured.
    pub aggregate_id: Uuid,
    /// Loads starting from the newest snapshot.
    pub with_snapshot: RestoreMeasurement,
    /// Loads replaying every event.
    pub without_snapshot: RestoreMeasurement,
    /// `without / with` average latency; above 1.0 means snapshots help.
    pub speedup: f64,
    /// Whether both paths produced identical state.
    pub states_equal: bool,
}

/// Comparisons across several aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    /// One entry per aggregate.
    pub comparisons: Vec<RestoreComparison>,
    /// Mean speed-up over all comparisons.
    pub average_speedup: f64,
    /// Whether every comparison produced identical state.
    pub all_states_equal: bool,
}

/// Measures restore cost through an [`AggregateRepository`].
#[derive(Debug)]
pub struct PerformanceMonitor<A> {
    repository: Arc<AggregateRepository<A>>,
}

impl<A: Snapshottable> PerformanceMonitor<A> {
    /// Creates a monitor over `repository`.
    #[must_use]
    pub fn new(repository: Arc<AggregateRepository<A>>) -> Self {
        Self { repository }
    }

    /// Loads `aggregate_id` `iterations` times along each path and compares
    /// the results.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for zero iterations and any load
    /// error.
    #[instrument(skip(self))]
    pub async fn compare(
        &self,
        aggregate_id: Uuid,
        iterations: u32,
    ) -> Result<RestoreComparison, DomainError> {
        if iterations == 0 {
            return Err(DomainError::Validation(
                "at least one iteration is required".into(),
            ));
        }
        let (with_state, with_snapshot) = self.measure(aggregate_id, iterations, true).await?;
        let (without_state, without_snapshot) =
            self.measure(aggregate_id, iterations, false).await?;

        let speedup = ratio(without_snapshot.average, with_snapshot.average);
        let comparison = RestoreComparison {
            aggregate_id,
            states_equal: with_state == without_state,
            with_snapshot,
            without_snapshot,
            speedup,
        };
        info!(
            %aggregate_id,
            speedup,
            states_equal = comparison.states_equal,
            with_snapshot_us = comparison.with_snapshot.average.as_micros(),
            full_replay_us = comparison.without_snapshot.average.as_micros(),
            "restore performance measured"
        );
        Ok(comparison)
    }

    /// Runs [`PerformanceMonitor::compare`] for every aggregate.
    ///
    /// # Errors
    ///
    /// Stops at the first failing comparison.
    pub async fn report(
        &self,
        aggregate_ids: &[Uuid],
        iterations: u32,
    ) -> Result<PerformanceReport, DomainError> {
        let mut comparisons = Vec::with_capacity(aggregate_ids.len());
        for id in aggregate_ids {
            comparisons.push(self.compare(*id, iterations).await?);
        }
        #[allow(clippy::cast_precision_loss)]
        let average_speedup = if comparisons.is_empty() {
            0.0
        } else {
            comparisons.iter().map(|c| c.speedup).sum::<f64>() / comparisons.len() as f64
        };
        Ok(PerformanceReport {
            all_states_equal: comparisons.iter().all(|c| c.states_equal),
            comparisons,
            average_speedup,
        })
    }

    async fn measure(
        &self,
        aggregate_id: Uuid,
        iterations: u32,
        use_snapshot: bool,
    ) -> Result<(serde_json::Value, RestoreMeasurement), DomainError> {
        let mut total = Duration::ZERO;
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        let mut last: Option<(A, LoadStats)> = None;

        for _ in 0..iterations {
            let (aggregate, stats) = self
                .repository
                .load_with_stats(aggregate_id, use_snapshot)
                .await?;
            total += stats.duration;
            min = min.min(stats.duration);
            max = max.max(stats.duration);
            last = Some((aggregate, stats));
        }

        let Some((aggregate, stats)) = last else {
            return Err(DomainError::Validation(
                "at least one iteration is required".into(),
            ));
        };
        let state = serde_json::to_value(&aggregate)
            .map_err(|e| DomainError::Serialization(e.to_string()))?;
        let state_bytes = serde_json::to_vec(&state)
            .map_err(|e| DomainError::Serialization(e.to_string()))?
            .len();

        Ok((
            state,
            RestoreMeasurement {
                iterations,
                average: total / iterations,
                min,
                max,
                snapshot_version: stats.snapshot_version,
                events_replayed: stats.events_replayed,
                state_bytes,
            },
        ))
    }
}

fn ratio(numerator: Duration, denominator: Duration) -> f64 {
    let denominator = denominator.as_secs_f64();
    if denominator > 0.0 {
        numerator.as_secs_f64() / denominator
    } else {
        1.0
    }
}
