//! Restore performance comparison for a single aggregate.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::{Json, Router, routing::get};
use chronicle_core::error::DomainError;
use chronicle_snapshot::{PerformanceMonitor, RestoreComparison};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound on loads per path for one request.
pub const MAX_ITERATIONS: u32 = 100;

/// Query parameters for GET /{aggregate_id}.
#[derive(Debug, Deserialize)]
pub struct PerformanceParams {
    /// Loads per path; defaults to 5.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    5
}

/// GET /{aggregate_id}
#[instrument(skip(state))]
async fn compare_restore(
    State(state): State<AppState>,
    Path(aggregate_id): Path<Uuid>,
    Query(params): Query<PerformanceParams>,
) -> Result<Json<RestoreComparison>, ApiError> {
    if params.iterations > MAX_ITERATIONS {
        return Err(DomainError::Validation(format!(
            "iterations must not exceed {MAX_ITERATIONS}"
        ))
        .into());
    }
    let monitor = PerformanceMonitor::new(Arc::clone(&state.orders));
    let comparison = monitor.compare(aggregate_id, params.iterations).await?;
    Ok(Json(comparison))
}

/// Returns the router for performance diagnostics.
pub fn router() -> Router<AppState> {
    Router::new().route("/{aggregate_id}", get(compare_restore))
}
